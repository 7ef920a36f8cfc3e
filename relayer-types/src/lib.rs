// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared primitives of the token-transfer relayer: transfer identities,
//! the transfer state machine, witness attestations, and the text codecs
//! used at the storage and RPC boundaries.
//!
//! Addresses are 20 bytes, hashes 32 bytes, amounts 256-bit unsigned; all
//! three render as lowercase `0x`-prefixed hex, amounts additionally as
//! decimal text (up to 78 characters) for persistence.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

pub mod error;

pub use error::{RelayError, RelayResult};

/// Largest transfer index the store is designed for. The index is persisted
/// as a signed 64-bit integer; reaching this value requires a software
/// upgrade and is treated as fatal.
pub const MAX_TRANSFER_INDEX: u64 = i64::MAX as u64 - 1;

/// Aborts the process when a cashier-assigned transfer index reaches the
/// designed maximum. Sequential indexes make this impossible to hit without
/// the store overflowing first, so there is no recovery path.
pub fn validate_transfer_index(index: u64) {
    if index >= MAX_TRANSFER_INDEX {
        panic!(
            "transfer index {} hit the largest value designed for the store, software upgrade needed",
            index
        );
    }
}

/// Lifecycle of a transfer as recorded by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Witnessed on the source chain, not yet submitted to the validator
    New,
    /// Submission broadcast to the destination chain
    Submitted,
    /// The validator contract accepted the proof
    Confirmed,
    /// Destination acceptance fully reconciled locally (terminal)
    Settled,
    /// Submission rejected on chain (terminal)
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::New => "new",
            TransferStatus::Submitted => "submitted",
            TransferStatus::Confirmed => "confirmed",
            TransferStatus::Settled => "settled",
            TransferStatus::Failed => "failed",
        }
    }

    /// The permitted transition DAG. `new → submitted → confirmed → settled`,
    /// with `failed` reachable from `submitted` and `confirmed`.
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (New, Submitted)
                | (Submitted, Confirmed)
                | (Confirmed, Settled)
                | (Submitted, Failed)
                | (Confirmed, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Settled | TransferStatus::Failed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(TransferStatus::New),
            "submitted" => Ok(TransferStatus::Submitted),
            "confirmed" => Ok(TransferStatus::Confirmed),
            "settled" => Ok(TransferStatus::Settled),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(RelayError::InvalidInput(format!(
                "unknown transfer status '{}'",
                other
            ))),
        }
    }
}

/// Primary identity of a transfer: the cashier contract that emitted the
/// lock event, the locked token, and the cashier-assigned monotonic index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferKey {
    pub cashier: Address,
    pub token: Address,
    pub index: u64,
}

impl TransferKey {
    pub fn new(cashier: Address, token: Address, index: u64) -> Self {
        Self {
            cashier,
            token,
            index,
        }
    }
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#x}/{:#x}/{}",
            self.cashier, self.token, self.index
        )
    }
}

/// One unit of cross-chain movement, tracked from the source-chain lock
/// event to destination-side settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub cashier: Address,
    pub token: Address,
    pub index: u64,
    pub sender: Address,
    pub recipient: Address,
    pub amount: U256,
    /// Source-chain block of the originating lock event
    pub block_height: u64,
    /// Source lock transaction at ingress; overwritten with the destination
    /// submission hash once the transfer is submitted
    pub tx_hash: H256,
    /// Aggregate identity under the destination validator contract; absent
    /// until the first submission attempt assembles a quorum
    pub id: Option<H256>,
    pub status: TransferStatus,
    /// Destination-chain submission coordinates, reused on speed-up
    pub nonce: Option<u64>,
    pub gas_price: Option<U256>,
    pub creation_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl Transfer {
    pub fn key(&self) -> TransferKey {
        TransferKey::new(self.cashier, self.token, self.index)
    }

    /// The aggregate identity the destination validator contract derives for
    /// this transfer: a keccak over the packed submission tuple, salted with
    /// the validator contract address so the same lock event maps to
    /// distinct ids on distinct destinations.
    pub fn id_on(&self, validator: Address) -> H256 {
        let mut buf = Vec::with_capacity(164);
        let mut word = [0u8; 32];
        buf.extend_from_slice(validator.as_bytes());
        buf.extend_from_slice(self.cashier.as_bytes());
        buf.extend_from_slice(self.token.as_bytes());
        U256::from(self.index).to_big_endian(&mut word);
        buf.extend_from_slice(&word);
        buf.extend_from_slice(self.sender.as_bytes());
        buf.extend_from_slice(self.recipient.as_bytes());
        self.amount.to_big_endian(&mut word);
        buf.extend_from_slice(&word);
        H256::from(keccak256(buf))
    }
}

/// One witness attestation over a transfer. The signature is opaque to the
/// relayer; the destination contract verifies the concatenation of
/// signatures ordered by ascending witness address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessSignature {
    pub transfer: TransferKey,
    pub witness: Address,
    pub signature: Vec<u8>,
}

/// Renders an address as full lowercase `0x`-prefixed hex, the form every
/// address takes in the store and on the wire.
pub fn address_to_hex(addr: &Address) -> String {
    format!("{:#x}", addr)
}

pub fn hash_to_hex(hash: &H256) -> String {
    format!("{:#x}", hash)
}

pub fn parse_address(s: &str) -> RelayResult<Address> {
    Address::from_str(s.trim())
        .map_err(|e| RelayError::InvalidInput(format!("invalid address '{}': {}", s, e)))
}

pub fn parse_hash(s: &str) -> RelayResult<H256> {
    H256::from_str(s.trim())
        .map_err(|e| RelayError::InvalidInput(format!("invalid hash '{}': {}", s, e)))
}

/// Decimal-text amount codec used for persistence. The full 256-bit range
/// fits in 78 decimal digits.
pub fn parse_amount(s: &str) -> RelayResult<U256> {
    U256::from_dec_str(s.trim())
        .map_err(|e| RelayError::InvalidInput(format!("invalid amount '{}': {}", s, e)))
}

pub fn amount_to_decimal(amount: &U256) -> String {
    amount.to_string()
}

/// Hex amount codec used at the RPC boundary.
pub fn amount_to_hex(amount: &U256) -> String {
    format!("{:#x}", amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    fn sample_transfer() -> Transfer {
        Transfer {
            cashier: addr(0x11),
            token: addr(0x22),
            index: 7,
            sender: addr(0x33),
            recipient: addr(0x44),
            amount: U256::from(1_000_000u64),
            block_height: 1234,
            tx_hash: H256::from([0x55; 32]),
            id: None,
            status: TransferStatus::New,
            nonce: None,
            gas_price: None,
            creation_time: Utc::now(),
            update_time: Utc::now(),
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TransferStatus::New,
            TransferStatus::Submitted,
            TransferStatus::Confirmed,
            TransferStatus::Settled,
            TransferStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TransferStatus>().unwrap(), status);
        }
        assert!("pending".parse::<TransferStatus>().is_err());
    }

    #[test]
    fn test_status_transition_dag() {
        use TransferStatus::*;
        let all = [New, Submitted, Confirmed, Settled, Failed];
        let allowed = [
            (New, Submitted),
            (Submitted, Confirmed),
            (Confirmed, Settled),
            (Submitted, Failed),
            (Confirmed, Failed),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "transition {:?} -> {:?}",
                    from,
                    to
                );
            }
        }
        // No transition leaves a terminal state
        for to in all {
            assert!(!Settled.can_transition_to(to));
            assert!(!Failed.can_transition_to(to));
        }
    }

    #[test]
    fn test_address_hex_is_lowercase_and_full_width() {
        let a = parse_address("0xAbCdEf0123456789aBcDeF0123456789abcdef01").unwrap();
        let rendered = address_to_hex(&a);
        assert_eq!(rendered, "0xabcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(rendered.len(), 42);
        assert_eq!(parse_address(&rendered).unwrap(), a);
    }

    #[test]
    fn test_hash_hex_round_trip() {
        let h = H256::from([0xab; 32]);
        let rendered = hash_to_hex(&h);
        assert_eq!(rendered.len(), 66);
        assert_eq!(parse_hash(&rendered).unwrap(), h);
    }

    #[test]
    fn test_amount_decimal_codec() {
        let max = U256::MAX;
        let rendered = amount_to_decimal(&max);
        assert!(rendered.len() <= 78);
        assert_eq!(parse_amount(&rendered).unwrap(), max);
        assert!(parse_amount("not a number").is_err());
        assert!(parse_amount("-5").is_err());
    }

    #[test]
    fn test_transfer_id_is_deterministic_and_field_sensitive() {
        let validator = addr(0xee);
        let transfer = sample_transfer();
        let id = transfer.id_on(validator);
        assert_eq!(id, transfer.id_on(validator));

        let mut other = transfer.clone();
        other.index += 1;
        assert_ne!(id, other.id_on(validator));

        let mut other = transfer.clone();
        other.amount += U256::one();
        assert_ne!(id, other.id_on(validator));

        // Distinct destination validators derive distinct ids
        assert_ne!(id, transfer.id_on(addr(0xef)));
    }

    #[test]
    #[should_panic(expected = "software upgrade needed")]
    fn test_index_overflow_is_fatal() {
        validate_transfer_index(MAX_TRANSFER_INDEX);
    }

    #[test]
    fn test_index_below_maximum_is_accepted() {
        validate_transfer_index(0);
        validate_transfer_index(MAX_TRANSFER_INDEX - 1);
    }

    proptest! {
        #[test]
        fn prop_amount_decimal_round_trip(words in proptest::array::uniform4(any::<u64>())) {
            let amount = U256(words);
            let rendered = amount_to_decimal(&amount);
            prop_assert!(rendered.len() <= 78);
            prop_assert_eq!(parse_amount(&rendered).unwrap(), amount);
        }

        #[test]
        fn prop_amount_hex_parses_back(words in proptest::array::uniform4(any::<u64>())) {
            let amount = U256(words);
            let rendered = amount_to_hex(&amount);
            let parsed = U256::from_str_radix(rendered.trim_start_matches("0x"), 16).unwrap();
            prop_assert_eq!(parsed, amount);
        }
    }
}
