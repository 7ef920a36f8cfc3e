// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transfer validator driver for IoTeX destinations, speaking to the chain's
//! eth-compatible JSON-RPC endpoint.
//!
//! Two conventions differ from the ethereum-family driver and must not be
//! generalized: account nonces are offset by one on this chain, and the gas
//! price is a protocol constant rather than a market price, so a speed-up
//! rebroadcasts the identical action instead of bidding higher.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bridge_relayer_types::{RelayError, RelayResult, Transfer, WitnessSignature};
use ethers::providers::Middleware;
use ethers::types::{Address, U256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::abi::{TransferValidatorContract, WitnessListContract};
use crate::alert::SlackAlerter;
use crate::metrics::RelayerMetrics;
use crate::quorum;
use crate::validator::{StatusOnChain, Submission, TransferValidator};

const WITNESS_PAGE_SIZE: u8 = 10;

/// Designed maximum cardinality of the active witness set.
const MAX_ACTIVE_WITNESSES: usize = 1024;

/// Protocol gas price: 1 Qev (10^12 Rau).
const IOTEX_GAS_PRICE: u64 = 1_000_000_000_000;

const IOTEX_GAS_LIMIT: u64 = 2_000_000;

pub struct IotexValidator<M: Middleware> {
    client: Arc<M>,
    relayer: Address,
    validator_address: Address,
    validator: TransferValidatorContract<M>,
    witness_list: WitnessListContract<M>,
    gas_price: U256,
    gas_limit: u64,
    witnesses: RwLock<HashSet<Address>>,
    alerter: Arc<SlackAlerter>,
    metrics: Arc<RelayerMetrics>,
}

impl<M: Middleware + 'static> IotexValidator<M> {
    pub async fn new(
        client: Arc<M>,
        validator_address: Address,
        alerter: Arc<SlackAlerter>,
        metrics: Arc<RelayerMetrics>,
    ) -> anyhow::Result<Self> {
        let relayer = client
            .default_sender()
            .ok_or_else(|| anyhow::anyhow!("client has no signer attached"))?;
        let validator = TransferValidatorContract::new(validator_address, client.clone());
        let witness_list_address = validator.witness_list().call().await?;
        info!(
            "IotexValidator ready: validator={:#x}, witness list={:#x}, relayer={:#x}",
            validator_address, witness_list_address, relayer
        );
        Ok(Self {
            client: client.clone(),
            relayer,
            validator_address,
            validator,
            witness_list: WitnessListContract::new(witness_list_address, client),
            gas_price: U256::from(IOTEX_GAS_PRICE),
            gas_limit: IOTEX_GAS_LIMIT,
            witnesses: RwLock::new(HashSet::new()),
            alerter,
            metrics,
        })
    }

    async fn refresh_witnesses(&self) -> RelayResult<HashSet<Address>> {
        let count = self
            .witness_list
            .count()
            .call()
            .await
            .map_err(|e| RelayError::NonCritical(format!("witness count query failed: {}", e)))?;
        let mut witnesses: Vec<Address> = Vec::new();
        let mut offset = U256::zero();
        while offset < count {
            let (active_count, items) = self
                .witness_list
                .get_active_items(offset, WITNESS_PAGE_SIZE)
                .call()
                .await
                .map_err(|e| {
                    RelayError::NonCritical(format!("witness page query failed: {}", e))
                })?;
            let filled = active_count.min(U256::from(items.len())).as_usize();
            witnesses.extend_from_slice(&items[..filled]);
            if witnesses.len() > MAX_ACTIVE_WITNESSES {
                return Err(RelayError::NonCritical(format!(
                    "witness list reports more than {} active members",
                    MAX_ACTIVE_WITNESSES
                )));
            }
            offset += U256::from(WITNESS_PAGE_SIZE);
        }
        info!("refreshed {} active witnesses", witnesses.len());
        for witness in &witnesses {
            debug!("\tactive witness {:#x}", witness);
        }
        self.metrics.active_witnesses.set(witnesses.len() as i64);
        Ok(witnesses.into_iter().collect())
    }

    async fn submit_internal(
        &self,
        transfer: &Transfer,
        signatures: &[WitnessSignature],
        active: &HashSet<Address>,
        resubmit_nonce: Option<u64>,
    ) -> RelayResult<Submission> {
        let quorum::QuorumPayload { signers, payload } = quorum::aggregate(active, signatures)?;
        info!(
            "submitting transfer {} with {} of {} active witnesses",
            transfer.key(),
            signers.len(),
            active.len()
        );

        let nonce = match resubmit_nonce {
            Some(nonce) => nonce,
            // Account nonces are one-based on this chain
            None => {
                self.client
                    .get_transaction_count(self.relayer, None)
                    .await
                    .map_err(|e| {
                        RelayError::NonCritical(format!("account nonce query failed: {}", e))
                    })?
                    .as_u64()
                    + 1
            }
        };

        match self.client.get_balance(self.relayer, None).await {
            Ok(balance) if balance < self.gas_price * U256::from(self.gas_limit) => {
                self.alerter
                    .alert(&format!(
                        "IOTX native balance has dropped to {}, please refill account {:#x} for gas",
                        balance, self.relayer
                    ))
                    .await;
            }
            Ok(_) => {}
            Err(e) => warn!("balance query failed: {}", e),
        }

        let call = self
            .validator
            .submit(
                transfer.cashier,
                transfer.token,
                U256::from(transfer.index),
                transfer.sender,
                transfer.recipient,
                transfer.amount,
                payload.into(),
            )
            .gas(self.gas_limit)
            .gas_price(self.gas_price)
            .nonce(nonce);
        let pending = call
            .send()
            .await
            .map_err(|e| RelayError::Provider(format!("submission broadcast failed: {}", e)))?;
        Ok(Submission {
            tx_hash: *pending,
            nonce,
            gas_price: self.gas_price,
        })
    }
}

#[async_trait]
impl<M: Middleware + 'static> TransferValidator for IotexValidator<M> {
    fn address(&self) -> Address {
        self.validator_address
    }

    async fn check(&self, transfer: &Transfer) -> RelayResult<StatusOnChain> {
        let _shared = self.witnesses.read().await;
        let id = transfer.id.ok_or_else(|| {
            RelayError::InvalidInput(format!("transfer {} has no aggregate id", transfer.key()))
        })?;

        // Blocks are final once produced; no confirmation depth needed
        let settle_height: U256 = self
            .validator
            .settles(id.to_fixed_bytes())
            .call()
            .await
            .map_err(|e| RelayError::Provider(format!("settle height query failed: {}", e)))?;
        if !settle_height.is_zero() {
            return Ok(StatusOnChain::Settled);
        }

        let receipt = self
            .client
            .get_transaction_receipt(transfer.tx_hash)
            .await
            .map_err(|e| RelayError::Provider(format!("receipt query failed: {}", e)))?;
        if receipt.is_some() {
            // No matter what the receipt says, the submission is spent
            return Ok(StatusOnChain::Rejected);
        }

        let in_flight = self
            .client
            .get_transaction(transfer.tx_hash)
            .await
            .map_err(|e| RelayError::Provider(format!("transaction query failed: {}", e)))?;
        match in_flight {
            Some(_) => Ok(StatusOnChain::NotConfirmed),
            None => Ok(StatusOnChain::NeedSpeedUp),
        }
    }

    async fn submit(
        &self,
        transfer: &Transfer,
        signatures: &[WitnessSignature],
    ) -> RelayResult<Submission> {
        let mut witnesses = self.witnesses.write().await;
        *witnesses = self.refresh_witnesses().await?;
        self.submit_internal(transfer, signatures, &witnesses, None)
            .await
    }

    async fn speed_up(
        &self,
        transfer: &Transfer,
        signatures: &[WitnessSignature],
    ) -> RelayResult<Submission> {
        let mut witnesses = self.witnesses.write().await;
        *witnesses = self.refresh_witnesses().await?;
        let nonce = transfer.nonce.ok_or_else(|| {
            RelayError::InvalidInput(format!(
                "transfer {} has no recorded nonce to reuse",
                transfer.key()
            ))
        })?;
        self.submit_internal(transfer, signatures, &witnesses, Some(nonce))
            .await
    }
}
