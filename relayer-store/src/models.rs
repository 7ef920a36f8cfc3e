// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Row shapes returned by the recorder's raw queries. Field names must match
//! the column names selected by the SQL in `recorder.rs`.

use bridge_relayer_types::{
    parse_address, parse_amount, parse_hash, RelayError, Transfer, TransferKey, WitnessSignature,
};
use chrono::{DateTime, Utc};
use diesel::sql_types::{BigInt, Binary, Nullable, Text, Timestamptz};

#[derive(diesel::QueryableByName)]
pub(crate) struct TransferRow {
    #[diesel(sql_type = Text)]
    pub cashier: String,
    #[diesel(sql_type = Text)]
    pub token: String,
    #[diesel(sql_type = BigInt)]
    pub tidx: i64,
    #[diesel(sql_type = Text)]
    pub sender: String,
    #[diesel(sql_type = Text)]
    pub recipient: String,
    #[diesel(sql_type = Text)]
    pub amount: String,
    #[diesel(sql_type = Text)]
    pub status: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub id: Option<String>,
    #[diesel(sql_type = BigInt)]
    pub block_height: i64,
    #[diesel(sql_type = Text)]
    pub tx_hash: String,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub nonce: Option<i64>,
    #[diesel(sql_type = Nullable<Text>)]
    pub gas_price: Option<String>,
    #[diesel(sql_type = Timestamptz)]
    pub creation_time: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    pub update_time: DateTime<Utc>,
}

impl TryFrom<TransferRow> for Transfer {
    type Error = RelayError;

    fn try_from(row: TransferRow) -> Result<Self, Self::Error> {
        let amount = parse_amount(&row.amount)?;
        if amount.is_zero() {
            // A zero amount can only mean a corrupted row; ingress rejects it
            return Err(RelayError::InvariantViolation(format!(
                "stored transfer carries amount {}",
                row.amount
            )));
        }
        Ok(Transfer {
            cashier: parse_address(&row.cashier)?,
            token: parse_address(&row.token)?,
            index: row.tidx as u64,
            sender: parse_address(&row.sender)?,
            recipient: parse_address(&row.recipient)?,
            amount,
            block_height: row.block_height as u64,
            tx_hash: parse_hash(&row.tx_hash)?,
            id: row.id.as_deref().map(parse_hash).transpose()?,
            status: row.status.parse()?,
            nonce: row.nonce.map(|n| n as u64),
            gas_price: row.gas_price.as_deref().map(parse_amount).transpose()?,
            creation_time: row.creation_time,
            update_time: row.update_time,
        })
    }
}

#[derive(diesel::QueryableByName)]
pub(crate) struct WitnessRow {
    #[diesel(sql_type = Text)]
    pub witness: String,
    #[diesel(sql_type = Binary)]
    pub signature: Vec<u8>,
}

impl WitnessRow {
    pub(crate) fn into_signature(
        self,
        transfer: TransferKey,
    ) -> Result<WitnessSignature, RelayError> {
        Ok(WitnessSignature {
            transfer,
            witness: parse_address(&self.witness)?,
            signature: self.signature,
        })
    }
}

#[derive(diesel::QueryableByName)]
pub(crate) struct CountRow {
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

#[derive(diesel::QueryableByName)]
pub(crate) struct TipRow {
    #[diesel(sql_type = BigInt)]
    pub tip: i64,
}
