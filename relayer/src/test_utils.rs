// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory test doubles for the destination chain.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bridge_relayer_types::{RelayResult, Transfer, TransferKey, WitnessSignature};
use ethers::types::{Address, H256, U256};

use crate::quorum;
use crate::validator::{StatusOnChain, Submission, TransferValidator};

#[derive(Debug, Clone)]
pub struct RecordedSubmission {
    pub key: TransferKey,
    pub signers: Vec<Address>,
    pub payload: Vec<u8>,
    pub resubmit: bool,
    pub submission: Submission,
}

/// A [`TransferValidator`] that applies the real quorum policy but never
/// touches a chain. `check` answers from a scripted queue, submissions are
/// recorded for assertions.
pub struct MockValidator {
    address: Address,
    active: Mutex<HashSet<Address>>,
    check_results: Mutex<VecDeque<RelayResult<StatusOnChain>>>,
    submissions: Mutex<Vec<RecordedSubmission>>,
    next_nonce: AtomicU64,
    tx_seq: AtomicU64,
    gas_price: U256,
    gas_price_gap: U256,
}

impl MockValidator {
    pub fn new(address: Address, witnesses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            address,
            active: Mutex::new(witnesses.into_iter().collect()),
            check_results: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            next_nonce: AtomicU64::new(1),
            tx_seq: AtomicU64::new(1),
            gas_price: U256::from(100u64),
            gas_price_gap: U256::from(10u64),
        }
    }

    pub fn set_witnesses(&self, witnesses: impl IntoIterator<Item = Address>) {
        *self.active.lock().unwrap() = witnesses.into_iter().collect();
    }

    pub fn push_check_result(&self, result: RelayResult<StatusOnChain>) {
        self.check_results.lock().unwrap().push_back(result);
    }

    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    fn next_tx_hash(&self) -> H256 {
        let seq = self.tx_seq.fetch_add(1, Ordering::SeqCst);
        H256::from_low_u64_be(seq)
    }
}

#[async_trait]
impl TransferValidator for MockValidator {
    fn address(&self) -> Address {
        self.address
    }

    async fn check(&self, _transfer: &Transfer) -> RelayResult<StatusOnChain> {
        self.check_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(StatusOnChain::NotConfirmed))
    }

    async fn submit(
        &self,
        transfer: &Transfer,
        signatures: &[WitnessSignature],
    ) -> RelayResult<Submission> {
        let active = self.active.lock().unwrap().clone();
        let quorum = quorum::aggregate(&active, signatures)?;
        let submission = Submission {
            tx_hash: self.next_tx_hash(),
            nonce: self.next_nonce.fetch_add(1, Ordering::SeqCst),
            gas_price: self.gas_price,
        };
        self.submissions.lock().unwrap().push(RecordedSubmission {
            key: transfer.key(),
            signers: quorum.signers,
            payload: quorum.payload,
            resubmit: false,
            submission,
        });
        Ok(submission)
    }

    async fn speed_up(
        &self,
        transfer: &Transfer,
        signatures: &[WitnessSignature],
    ) -> RelayResult<Submission> {
        let active = self.active.lock().unwrap().clone();
        let quorum = quorum::aggregate(&active, signatures)?;
        let submission = Submission {
            tx_hash: self.next_tx_hash(),
            nonce: transfer.nonce.expect("speed-up requires a recorded nonce"),
            gas_price: transfer
                .gas_price
                .expect("speed-up requires a recorded gas price")
                + self.gas_price_gap,
        };
        self.submissions.lock().unwrap().push(RecordedSubmission {
            key: transfer.key(),
            signers: quorum.signers,
            payload: quorum.payload,
            resubmit: true,
            submission,
        });
        Ok(submission)
    }
}
