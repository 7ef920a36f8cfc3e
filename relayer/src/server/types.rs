// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use bridge_relayer_types::{
    address_to_hex, amount_to_decimal, hash_to_hex, parse_address, parse_amount, parse_hash,
    RelayResult, Transfer, TransferKey, TransferStatus, WitnessSignature,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One witness attestation as posted by a witness process. Carries the full
/// transfer payload so ingress stays idempotent: whichever witness reports
/// first creates the row, everyone else only adds a signature.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WitnessSubmission {
    pub cashier: String,
    pub token: String,
    pub tidx: u64,
    pub sender: String,
    pub recipient: String,
    /// Decimal text
    pub amount: String,
    pub block_height: u64,
    /// Source-chain lock transaction
    pub tx_hash: String,
    pub witness: String,
    /// Hex, with or without 0x prefix
    pub signature: String,
}

impl WitnessSubmission {
    pub fn transfer(&self) -> RelayResult<Transfer> {
        let amount = parse_amount(&self.amount)?;
        Ok(Transfer {
            cashier: parse_address(&self.cashier)?,
            token: parse_address(&self.token)?,
            index: self.tidx,
            sender: parse_address(&self.sender)?,
            recipient: parse_address(&self.recipient)?,
            amount,
            block_height: self.block_height,
            tx_hash: parse_hash(&self.tx_hash)?,
            id: None,
            status: TransferStatus::New,
            nonce: None,
            gas_price: None,
            creation_time: Utc::now(),
            update_time: Utc::now(),
        })
    }

    pub fn witness_signature(&self) -> RelayResult<WitnessSignature> {
        let transfer = TransferKey::new(
            parse_address(&self.cashier)?,
            parse_address(&self.token)?,
            self.tidx,
        );
        let signature = hex::decode(self.signature.trim_start_matches("0x")).map_err(|e| {
            bridge_relayer_types::RelayError::InvalidInput(format!(
                "invalid signature hex: {}",
                e
            ))
        })?;
        Ok(WitnessSignature {
            transfer,
            witness: parse_address(&self.witness)?,
            signature,
        })
    }
}

/// Read model of a transfer as served by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransferView {
    pub cashier: String,
    pub token: String,
    pub tidx: u64,
    pub sender: String,
    pub recipient: String,
    pub amount: String,
    pub status: String,
    pub id: Option<String>,
    pub block_height: u64,
    pub tx_hash: String,
    pub nonce: Option<u64>,
    pub gas_price: Option<String>,
    pub creation_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl From<&Transfer> for TransferView {
    fn from(transfer: &Transfer) -> Self {
        Self {
            cashier: address_to_hex(&transfer.cashier),
            token: address_to_hex(&transfer.token),
            tidx: transfer.index,
            sender: address_to_hex(&transfer.sender),
            recipient: address_to_hex(&transfer.recipient),
            amount: amount_to_decimal(&transfer.amount),
            status: transfer.status.to_string(),
            id: transfer.id.as_ref().map(hash_to_hex),
            block_height: transfer.block_height,
            tx_hash: hash_to_hex(&transfer.tx_hash),
            nonce: transfer.nonce,
            gas_price: transfer.gas_price.as_ref().map(amount_to_decimal),
            creation_time: transfer.creation_time,
            update_time: transfer.update_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;

    fn submission() -> WitnessSubmission {
        serde_json::from_value(serde_json::json!({
            "cashier": "0x1111111111111111111111111111111111111111",
            "token": "0x2222222222222222222222222222222222222222",
            "tidx": 42,
            "sender": "0x3333333333333333333333333333333333333333",
            "recipient": "0x4444444444444444444444444444444444444444",
            "amount": "1000000",
            "block-height": 1234,
            "tx-hash": "0x5555555555555555555555555555555555555555555555555555555555555555",
            "witness": "0x6666666666666666666666666666666666666666",
            "signature": "0xdeadbeef"
        }))
        .unwrap()
    }

    #[test]
    fn test_submission_to_transfer() {
        let transfer = submission().transfer().unwrap();
        assert_eq!(transfer.index, 42);
        assert_eq!(transfer.amount, U256::from(1_000_000u64));
        assert_eq!(transfer.status, TransferStatus::New);
        assert!(transfer.id.is_none());
        assert!(transfer.nonce.is_none());
    }

    #[test]
    fn test_submission_to_signature() {
        let signature = submission().witness_signature().unwrap();
        assert_eq!(signature.transfer.index, 42);
        assert_eq!(signature.signature, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_malformed_fields_are_rejected() {
        let mut bad = submission();
        bad.amount = "one million".to_string();
        assert!(bad.transfer().is_err());

        let mut bad = submission();
        bad.cashier = "0x123".to_string();
        assert!(bad.transfer().is_err());

        let mut bad = submission();
        bad.signature = "zz".to_string();
        assert!(bad.witness_signature().is_err());
    }

    #[test]
    fn test_transfer_view_rendering() {
        let transfer = submission().transfer().unwrap();
        let view = TransferView::from(&transfer);
        assert_eq!(view.cashier, "0x1111111111111111111111111111111111111111");
        assert_eq!(view.amount, "1000000");
        assert_eq!(view.status, "new");
        assert!(view.id.is_none());

        let round_tripped: TransferView =
            serde_json::from_str(&serde_json::to_string(&view).unwrap()).unwrap();
        assert_eq!(round_tripped.tidx, 42);
    }
}
