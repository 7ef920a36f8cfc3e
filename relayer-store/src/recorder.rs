// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The transfer lifecycle recorder.
//!
//! Every durable fact about a transfer lives here: the transfer row itself,
//! one signature row per witness, and the status column that drives the
//! service loop. Mutators are single conditional updates — the prior status
//! is part of the `WHERE` predicate and exactly one affected row means
//! success — so concurrent loops and RPC handlers cannot push a transfer
//! backwards through its lifecycle.
//!
//! Table names are taken from configuration, so statements are issued as raw
//! SQL with typed binds rather than through a static schema DSL.

use std::collections::HashMap;

use bridge_relayer_types::{
    address_to_hex, amount_to_decimal, hash_to_hex, validate_transfer_index, RelayError,
    RelayResult, Transfer, TransferKey, TransferStatus, WitnessSignature,
};
use diesel::sql_query;
use diesel::sql_types::{BigInt, Binary, Text};
use diesel_async::RunQueryDsl;
use ethers::types::{Address, H256, U256};
use tracing::{debug, info, warn};

use crate::models::{CountRow, TipRow, TransferRow, WitnessRow};
use crate::Db;

const TRANSFER_COLUMNS: &str = "cashier, token, tidx, sender, recipient, amount, status, id, \
     block_height, tx_hash, nonce, gas_price, creation_time, update_time";

/// Durable, idempotent store of transfers and their witness signatures.
pub struct Recorder {
    db: Db,
    transfer_table: String,
    witness_table: String,
    /// Source token → destination token. Transfers of unmapped tokens are
    /// never handed to the submitter.
    token_pairs: HashMap<Address, Address>,
}

impl Recorder {
    pub fn new(
        db: Db,
        transfer_table: impl Into<String>,
        witness_table: impl Into<String>,
        token_pairs: HashMap<Address, Address>,
    ) -> RelayResult<Self> {
        let transfer_table = validated_table_name(transfer_table.into())?;
        let witness_table = validated_table_name(witness_table.into())?;
        Ok(Self {
            db,
            transfer_table,
            witness_table,
            token_pairs,
        })
    }

    /// Creates both tables and their secondary indexes when absent. Called
    /// once at startup before the service loop is spawned.
    pub async fn initialize(&self) -> RelayResult<()> {
        let mut conn = self.conn().await?;
        for statement in self.schema_statements() {
            sql_query(statement)
                .execute(&mut conn)
                .await
                .map_err(storage)?;
        }
        info!(
            "Recorder initialized (transfers='{}', witnesses='{}', {} token pairs)",
            self.transfer_table,
            self.witness_table,
            self.token_pairs.len()
        );
        Ok(())
    }

    fn schema_statements(&self) -> Vec<String> {
        let t = &self.transfer_table;
        let w = &self.witness_table;
        let mut statements = vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {t} (\
                 cashier VARCHAR(42) NOT NULL, \
                 token VARCHAR(42) NOT NULL, \
                 tidx BIGINT NOT NULL, \
                 sender VARCHAR(42) NOT NULL, \
                 recipient VARCHAR(42) NOT NULL, \
                 amount VARCHAR(78) NOT NULL, \
                 creation_time TIMESTAMPTZ NOT NULL DEFAULT now(), \
                 update_time TIMESTAMPTZ NOT NULL DEFAULT now(), \
                 status VARCHAR(10) NOT NULL DEFAULT '{new}', \
                 id VARCHAR(66), \
                 block_height BIGINT NOT NULL, \
                 tx_hash VARCHAR(66) NOT NULL, \
                 nonce BIGINT, \
                 gas_price VARCHAR(78), \
                 PRIMARY KEY (cashier, token, tidx))",
                t = t,
                new = TransferStatus::New,
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {w} (\
                 cashier VARCHAR(42) NOT NULL, \
                 token VARCHAR(42) NOT NULL, \
                 tidx BIGINT NOT NULL, \
                 witness VARCHAR(42) NOT NULL, \
                 signature BYTEA NOT NULL, \
                 creation_time TIMESTAMPTZ NOT NULL DEFAULT now(), \
                 PRIMARY KEY (cashier, token, tidx, witness))",
                w = w,
            ),
        ];
        for column in [
            "id",
            "cashier",
            "token",
            "sender",
            "recipient",
            "status",
            "tx_hash",
            "block_height",
        ] {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {index} ON {t} ({column})",
                index = index_name(t, column),
                t = t,
                column = column,
            ));
        }
        statements
    }

    /// Records a freshly witnessed transfer with status `new`. Re-inserting
    /// an already-known `(cashier, token, tidx)` is a no-op: ingress is
    /// idempotent and the first insertion wins.
    pub async fn add_transfer(&self, transfer: &Transfer) -> RelayResult<()> {
        validate_transfer_index(transfer.index);
        if transfer.amount.is_zero() {
            return Err(RelayError::InvariantViolation(format!(
                "transfer {} amount must be larger than 0",
                transfer.key()
            )));
        }
        let mut conn = self.conn().await?;
        let affected = sql_query(format!(
            "INSERT INTO {} (cashier, token, tidx, sender, recipient, amount, block_height, tx_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (cashier, token, tidx) DO NOTHING",
            self.transfer_table,
        ))
        .bind::<Text, _>(address_to_hex(&transfer.cashier))
        .bind::<Text, _>(address_to_hex(&transfer.token))
        .bind::<BigInt, _>(transfer.index as i64)
        .bind::<Text, _>(address_to_hex(&transfer.sender))
        .bind::<Text, _>(address_to_hex(&transfer.recipient))
        .bind::<Text, _>(amount_to_decimal(&transfer.amount))
        .bind::<BigInt, _>(transfer.block_height as i64)
        .bind::<Text, _>(hash_to_hex(&transfer.tx_hash))
        .execute(&mut conn)
        .await
        .map_err(storage)?;

        if affected == 0 {
            info!("duplicate transfer {} ignored", transfer.key());
        }
        Ok(())
    }

    /// Records one witness attestation. Idempotent on `(transfer, witness)`;
    /// fails when the referenced transfer has never been recorded.
    pub async fn add_witness(
        &self,
        key: &TransferKey,
        witness: Address,
        signature: &[u8],
    ) -> RelayResult<()> {
        let mut conn = self.conn().await?;
        let known: CountRow = sql_query(format!(
            "SELECT COUNT(*) AS count FROM {} WHERE cashier = $1 AND token = $2 AND tidx = $3",
            self.transfer_table,
        ))
        .bind::<Text, _>(address_to_hex(&key.cashier))
        .bind::<Text, _>(address_to_hex(&key.token))
        .bind::<BigInt, _>(key.index as i64)
        .get_result(&mut conn)
        .await
        .map_err(storage)?;
        if known.count == 0 {
            return Err(RelayError::UnknownTransfer(key.to_string()));
        }

        let affected = sql_query(format!(
            "INSERT INTO {} (cashier, token, tidx, witness, signature) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (cashier, token, tidx, witness) DO NOTHING",
            self.witness_table,
        ))
        .bind::<Text, _>(address_to_hex(&key.cashier))
        .bind::<Text, _>(address_to_hex(&key.token))
        .bind::<BigInt, _>(key.index as i64)
        .bind::<Text, _>(address_to_hex(&witness))
        .bind::<Binary, _>(signature)
        .execute(&mut conn)
        .await
        .map_err(storage)?;

        if affected == 0 {
            debug!(
                "duplicate signature from witness {:#x} on {} ignored",
                witness, key
            );
        }
        Ok(())
    }

    /// All signatures for a transfer, ascending by witness address byte
    /// value. The destination contract verifies the concatenated payload in
    /// exactly this order, so the ordering is part of the contract.
    pub async fn witnesses(&self, key: &TransferKey) -> RelayResult<Vec<WitnessSignature>> {
        let mut conn = self.conn().await?;
        let rows: Vec<WitnessRow> = sql_query(format!(
            "SELECT witness, signature FROM {} \
             WHERE cashier = $1 AND token = $2 AND tidx = $3 \
             ORDER BY witness ASC",
            self.witness_table,
        ))
        .bind::<Text, _>(address_to_hex(&key.cashier))
        .bind::<Text, _>(address_to_hex(&key.token))
        .bind::<BigInt, _>(key.index as i64)
        .load(&mut conn)
        .await
        .map_err(storage)?;

        rows.into_iter()
            .map(|row| row.into_signature(*key))
            .collect()
    }

    /// Transition `new → submitted`, recording the aggregate id and the
    /// destination submission coordinates.
    pub async fn mark_submitted(
        &self,
        key: &TransferKey,
        id: H256,
        nonce: u64,
        gas_price: U256,
        tx_hash: H256,
    ) -> RelayResult<()> {
        info!("mark transfer {} as submitted, id {:#x}", key, id);
        let mut conn = self.conn().await?;
        let affected = sql_query(format!(
            "UPDATE {} SET status = '{}', id = $1, nonce = $2, gas_price = $3, tx_hash = $4, \
             update_time = now() \
             WHERE cashier = $5 AND token = $6 AND tidx = $7 AND status = '{}'",
            self.transfer_table,
            TransferStatus::Submitted,
            TransferStatus::New,
        ))
        .bind::<Text, _>(hash_to_hex(&id))
        .bind::<BigInt, _>(nonce as i64)
        .bind::<Text, _>(amount_to_decimal(&gas_price))
        .bind::<Text, _>(hash_to_hex(&tx_hash))
        .bind::<Text, _>(address_to_hex(&key.cashier))
        .bind::<Text, _>(address_to_hex(&key.token))
        .bind::<BigInt, _>(key.index as i64)
        .execute(&mut conn)
        .await
        .map_err(storage)?;
        expect_one(affected, key, TransferStatus::New)
    }

    /// Overwrites the submission coordinates of a stuck transfer after a
    /// speed-up resubmission. Status stays `submitted`; same id, same row.
    pub async fn mark_speed_up(
        &self,
        key: &TransferKey,
        nonce: u64,
        gas_price: U256,
        tx_hash: H256,
    ) -> RelayResult<()> {
        info!("record speed-up of transfer {}", key);
        let mut conn = self.conn().await?;
        let affected = sql_query(format!(
            "UPDATE {} SET nonce = $1, gas_price = $2, tx_hash = $3, update_time = now() \
             WHERE cashier = $4 AND token = $5 AND tidx = $6 AND status = '{}'",
            self.transfer_table,
            TransferStatus::Submitted,
        ))
        .bind::<BigInt, _>(nonce as i64)
        .bind::<Text, _>(amount_to_decimal(&gas_price))
        .bind::<Text, _>(hash_to_hex(&tx_hash))
        .bind::<Text, _>(address_to_hex(&key.cashier))
        .bind::<Text, _>(address_to_hex(&key.token))
        .bind::<BigInt, _>(key.index as i64)
        .execute(&mut conn)
        .await
        .map_err(storage)?;
        expect_one(affected, key, TransferStatus::Submitted)
    }

    /// Transition `submitted → confirmed`.
    pub async fn mark_confirmed(&self, key: &TransferKey) -> RelayResult<()> {
        info!("mark transfer {} as confirmed", key);
        self.transition(key, TransferStatus::Submitted, TransferStatus::Confirmed)
            .await
    }

    /// Transition `confirmed → settled`, the terminal bookkeeping state.
    pub async fn mark_settled(&self, key: &TransferKey) -> RelayResult<()> {
        info!("mark transfer {} as settled", key);
        self.transition(key, TransferStatus::Confirmed, TransferStatus::Settled)
            .await
    }

    /// Terminal failure, reachable from `submitted` or `confirmed`.
    pub async fn mark_failed(&self, key: &TransferKey, reason: &str) -> RelayResult<()> {
        warn!("mark transfer {} as failed: {}", key, reason);
        let mut conn = self.conn().await?;
        let affected = sql_query(format!(
            "UPDATE {} SET status = '{}', update_time = now() \
             WHERE cashier = $1 AND token = $2 AND tidx = $3 AND status IN ('{}', '{}')",
            self.transfer_table,
            TransferStatus::Failed,
            TransferStatus::Submitted,
            TransferStatus::Confirmed,
        ))
        .bind::<Text, _>(address_to_hex(&key.cashier))
        .bind::<Text, _>(address_to_hex(&key.token))
        .bind::<BigInt, _>(key.index as i64)
        .execute(&mut conn)
        .await
        .map_err(storage)?;
        if affected == 1 {
            Ok(())
        } else {
            Err(RelayError::StaleState(format!(
                "transfer {} was in neither '{}' nor '{}' ({} rows updated)",
                key,
                TransferStatus::Submitted,
                TransferStatus::Confirmed,
                affected
            )))
        }
    }

    async fn transition(
        &self,
        key: &TransferKey,
        from: TransferStatus,
        to: TransferStatus,
    ) -> RelayResult<()> {
        let mut conn = self.conn().await?;
        let affected = sql_query(format!(
            "UPDATE {} SET status = '{}', update_time = now() \
             WHERE cashier = $1 AND token = $2 AND tidx = $3 AND status = '{}'",
            self.transfer_table, to, from,
        ))
        .bind::<Text, _>(address_to_hex(&key.cashier))
        .bind::<Text, _>(address_to_hex(&key.token))
        .bind::<BigInt, _>(key.index as i64)
        .execute(&mut conn)
        .await
        .map_err(storage)?;
        expect_one(affected, key, from)
    }

    /// Transfers awaiting their first submission, oldest first, restricted
    /// to tokens with a configured destination counterpart.
    pub async fn transfers_to_submit(&self) -> RelayResult<Vec<Transfer>> {
        let transfers = self.transfers_with_status(TransferStatus::New).await?;
        Ok(transfers
            .into_iter()
            .filter(|t| {
                let mapped = self.token_pairs.contains_key(&t.token);
                if !mapped {
                    debug!("skipping transfer {} of unmapped token {:#x}", t.key(), t.token);
                }
                mapped
            })
            .collect())
    }

    /// Submitted transfers awaiting destination confirmation, oldest first.
    pub async fn transfers_to_settle(&self) -> RelayResult<Vec<Transfer>> {
        self.transfers_with_status(TransferStatus::Submitted).await
    }

    /// Confirmed transfers awaiting the final bookkeeping transition.
    pub async fn transfers_to_check(&self) -> RelayResult<Vec<Transfer>> {
        self.transfers_with_status(TransferStatus::Confirmed).await
    }

    /// All transfers in the given status, oldest first.
    pub async fn transfers_with_status(
        &self,
        status: TransferStatus,
    ) -> RelayResult<Vec<Transfer>> {
        let mut conn = self.conn().await?;
        let rows: Vec<TransferRow> = sql_query(format!(
            "SELECT {} FROM {} WHERE status = $1 ORDER BY creation_time ASC",
            TRANSFER_COLUMNS, self.transfer_table,
        ))
        .bind::<Text, _>(status.as_str())
        .load(&mut conn)
        .await
        .map_err(storage)?;
        rows.into_iter().map(Transfer::try_from).collect()
    }

    /// Looks a transfer up by its aggregate id; absent while still `new`.
    pub async fn transfer_by_id(&self, id: H256) -> RelayResult<Option<Transfer>> {
        let mut conn = self.conn().await?;
        let rows: Vec<TransferRow> = sql_query(format!(
            "SELECT {} FROM {} WHERE id = $1 LIMIT 1",
            TRANSFER_COLUMNS, self.transfer_table,
        ))
        .bind::<Text, _>(hash_to_hex(&id))
        .load(&mut conn)
        .await
        .map_err(storage)?;
        rows.into_iter().next().map(Transfer::try_from).transpose()
    }

    /// Highest source-chain block height among non-failed transfers, 0 when
    /// the store is empty. Storage errors are surfaced, not folded into 0.
    pub async fn tip_height(&self) -> RelayResult<u64> {
        let mut conn = self.conn().await?;
        let row: TipRow = sql_query(format!(
            "SELECT COALESCE(MAX(block_height), 0) AS tip FROM {} WHERE status != '{}'",
            self.transfer_table,
            TransferStatus::Failed,
        ))
        .get_result(&mut conn)
        .await
        .map_err(storage)?;
        Ok(row.tip as u64)
    }

    pub fn token_pairs(&self) -> &HashMap<Address, Address> {
        &self.token_pairs
    }

    async fn conn(
        &self,
    ) -> RelayResult<
        diesel_async::pooled_connection::bb8::PooledConnection<
            '_,
            diesel_async::AsyncPgConnection,
        >,
    > {
        self.db
            .connect()
            .await
            .map_err(|e| RelayError::Storage(format!("failed to get connection: {}", e)))
    }
}

fn storage(e: diesel::result::Error) -> RelayError {
    RelayError::Storage(e.to_string())
}

fn expect_one(affected: usize, key: &TransferKey, expected: TransferStatus) -> RelayResult<()> {
    if affected == 1 {
        Ok(())
    } else {
        Err(RelayError::StaleState(format!(
            "transfer {} was not in status '{}' ({} rows updated)",
            key, expected, affected
        )))
    }
}

/// Table names reach the SQL text directly, so anything beyond a plain
/// (optionally schema-qualified) identifier is rejected up front.
fn validated_table_name(name: String) -> RelayResult<String> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(RelayError::InvalidInput(format!(
            "invalid table name '{}'",
            name
        )))
    }
}

fn index_name(table: &str, column: &str) -> String {
    format!("{}_{}_index", table.replace('.', "_"), column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_validation() {
        assert!(validated_table_name("transfers".to_string()).is_ok());
        assert!(validated_table_name("relayer.transfers".to_string()).is_ok());
        assert!(validated_table_name("transfers_2".to_string()).is_ok());
        assert!(validated_table_name(String::new()).is_err());
        assert!(validated_table_name("transfers; DROP TABLE x".to_string()).is_err());
        assert!(validated_table_name("1transfers".to_string()).is_err());
    }

    #[test]
    fn test_index_names_are_distinct_per_table() {
        assert_ne!(index_name("a.t", "status"), index_name("b.t", "status"));
        assert_eq!(index_name("relayer.transfers", "id"), "relayer_transfers_id_index");
    }

    #[test]
    fn test_expect_one() {
        let key = TransferKey::new(Address::zero(), Address::zero(), 1);
        assert!(expect_one(1, &key, TransferStatus::New).is_ok());
        assert!(matches!(
            expect_one(0, &key, TransferStatus::New),
            Err(RelayError::StaleState(_))
        ));
        assert!(matches!(
            expect_one(2, &key, TransferStatus::New),
            Err(RelayError::StaleState(_))
        ));
    }
}
