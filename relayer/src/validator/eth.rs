// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transfer validator driver for ethereum-family destinations (ethereum,
//! bsc, heco, matic — identical JSON-RPC and contract surfaces, different
//! endpoints and gas markets).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bridge_relayer_types::{RelayError, RelayResult, Transfer, WitnessSignature};
use ethers::providers::Middleware;
use ethers::types::{Address, BlockId, BlockNumber, U256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::abi::{TransferValidatorContract, WitnessListContract};
use crate::alert::SlackAlerter;
use crate::metrics::RelayerMetrics;
use crate::quorum;
use crate::validator::{StatusOnChain, Submission, TransferValidator};

/// Witness-list contract page size for `getActiveItems`.
const WITNESS_PAGE_SIZE: u8 = 10;

/// Designed maximum cardinality of the active witness set.
const MAX_ACTIVE_WITNESSES: usize = 1024;

#[derive(Debug, Clone)]
pub struct EthereumValidatorConfig {
    /// Confirmations required before destination reads are trusted
    pub confirm_block_number: u64,
    /// Fixed gas limit for submissions
    pub gas_limit: u64,
    /// Hard ceiling on any gas price this driver will sign
    pub gas_price_limit: U256,
    /// Signed percentage applied to the node's suggested gas price
    pub gas_price_deviation: i64,
    /// Absolute increment applied on speed-up
    pub gas_price_gap: U256,
}

impl Default for EthereumValidatorConfig {
    fn default() -> Self {
        Self {
            confirm_block_number: 20,
            gas_limit: 2_000_000,
            gas_price_limit: U256::from(120_000_000_000u64),
            gas_price_deviation: 0,
            gas_price_gap: U256::zero(),
        }
    }
}

pub struct EthereumValidator<M: Middleware> {
    client: Arc<M>,
    relayer: Address,
    validator_address: Address,
    validator: TransferValidatorContract<M>,
    witness_list: WitnessListContract<M>,
    config: EthereumValidatorConfig,
    /// Refreshed from chain before every submission; guarded so submissions
    /// are mutually exclusive while checks share the lock.
    witnesses: RwLock<HashSet<Address>>,
    alerter: Arc<SlackAlerter>,
    metrics: Arc<RelayerMetrics>,
}

impl<M: Middleware + 'static> EthereumValidator<M> {
    /// Resolves the witness-list contract through the validator contract and
    /// builds the driver. The client must carry a signer (the relayer key).
    pub async fn new(
        client: Arc<M>,
        validator_address: Address,
        config: EthereumValidatorConfig,
        alerter: Arc<SlackAlerter>,
        metrics: Arc<RelayerMetrics>,
    ) -> anyhow::Result<Self> {
        let relayer = client
            .default_sender()
            .ok_or_else(|| anyhow::anyhow!("client has no signer attached"))?;
        let validator = TransferValidatorContract::new(validator_address, client.clone());
        let witness_list_address = validator.witness_list().call().await?;
        info!(
            "EthereumValidator ready: validator={:#x}, witness list={:#x}, relayer={:#x}",
            validator_address, witness_list_address, relayer
        );
        Ok(Self {
            client: client.clone(),
            relayer,
            validator_address,
            validator,
            witness_list: WitnessListContract::new(witness_list_address, client),
            config,
            witnesses: RwLock::new(HashSet::new()),
            alerter,
            metrics,
        })
    }

    /// Pages the full active witness set out of the witness-list contract.
    /// Failures here are non-critical: the submission is retried next tick.
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

        let gas_price = match resubmit_nonce {
            Some(_) => {
                let prior = transfer.gas_price.ok_or_else(|| {
                    RelayError::InvalidInput(format!(
                        "transfer {} has no recorded gas price to bump",
                        transfer.key()
                    ))
                })?;
                bumped_gas_price(prior, self.config.gas_price_gap, self.config.gas_price_limit)?
            }
            None => {
                let suggested = self.client.get_gas_price().await.map_err(|e| {
                    RelayError::NonCritical(format!("gas price query failed: {}", e))
                })?;
                adjusted_gas_price(
                    suggested,
                    self.config.gas_price_deviation,
                    self.config.gas_price_limit,
                )
            }
        };
        let nonce = match resubmit_nonce {
            Some(nonce) => nonce,
            None => self
                .client
                .get_transaction_count(self.relayer, None)
                .await
                .map_err(|e| RelayError::NonCritical(format!("nonce query failed: {}", e)))?
                .as_u64(),
        };

        self.warn_on_low_balance(gas_price).await;

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
            .gas(self.config.gas_limit)
            .gas_price(gas_price)
            .nonce(nonce);
        let pending = call
            .send()
            .await
            .map_err(|e| RelayError::Provider(format!("submission broadcast failed: {}", e)))?;
        Ok(Submission {
            tx_hash: *pending,
            nonce,
            gas_price,
        })
    }

    /// Shortfall does not block the submission: an alerted operator can
    /// refill before the transaction actually runs out of retries.
    async fn warn_on_low_balance(&self, gas_price: U256) {
        let required = gas_price * U256::from(self.config.gas_limit);
        match self.client.get_balance(self.relayer, None).await {
            Ok(balance) if balance < required => {
                self.alerter
                    .alert(&format!(
                        "relayer {:#x} balance has dropped to {}, below the {} needed for gas; please refill",
                        self.relayer, balance, required
                    ))
                    .await;
            }
            Ok(_) => {}
            Err(e) => warn!("balance query failed: {}", e),
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> TransferValidator for EthereumValidator<M> {
    fn address(&self) -> Address {
        self.validator_address
    }

    async fn check(&self, transfer: &Transfer) -> RelayResult<StatusOnChain> {
        let _shared = self.witnesses.read().await;
        let id = transfer.id.ok_or_else(|| {
            RelayError::InvalidInput(format!("transfer {} has no aggregate id", transfer.key()))
        })?;

        let latest = self
            .client
            .get_block_number()
            .await
            .map_err(|e| RelayError::Provider(format!("block number query failed: {}", e)))?
            .as_u64();
        let trusted = latest.saturating_sub(self.config.confirm_block_number);

        let settle_height: U256 = self
            .validator
            .settles(id.to_fixed_bytes())
            .block(BlockId::Number(BlockNumber::Number(trusted.into())))
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
        if let Some(receipt) = receipt {
            return match receipt.block_number {
                // Mined deep enough to trust without a settle height: the
                // contract turned the submission down and will not take the
                // same id again
                Some(block) if block.as_u64() <= trusted => Ok(StatusOnChain::Rejected),
                _ => Ok(StatusOnChain::NotConfirmed),
            };
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

/// Applies the configured signed percentage to the node's suggested gas
/// price and caps the result. A zero limit disables the cap.
fn adjusted_gas_price(suggested: U256, deviation_percent: i64, limit: U256) -> U256 {
    let deviation = deviation_percent.clamp(-100, i64::MAX);
    let adjusted = if deviation >= 0 {
        suggested + suggested * U256::from(deviation as u64) / U256::from(100u64)
    } else {
        suggested - suggested * U256::from((-deviation) as u64) / U256::from(100u64)
    };
    if limit.is_zero() {
        adjusted
    } else {
        adjusted.min(limit)
    }
}

/// Replacement price for a stuck submission: prior plus the configured gap,
/// capped. A prior already at the cap cannot be replaced this tick.
fn bumped_gas_price(prior: U256, gap: U256, limit: U256) -> RelayResult<U256> {
    if !limit.is_zero() && prior >= limit {
        return Err(RelayError::NonCritical(format!(
            "gas price {} already at the configured limit {}",
            prior, limit
        )));
    }
    let bumped = prior + gap;
    if limit.is_zero() {
        Ok(bumped)
    } else {
        Ok(bumped.min(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjusted_gas_price_deviation() {
        let limit = U256::from(1_000u64);
        assert_eq!(
            adjusted_gas_price(U256::from(100u64), 0, limit),
            U256::from(100u64)
        );
        assert_eq!(
            adjusted_gas_price(U256::from(100u64), 15, limit),
            U256::from(115u64)
        );
        assert_eq!(
            adjusted_gas_price(U256::from(100u64), -15, limit),
            U256::from(85u64)
        );
        // Deviations below -100% clamp to zero rather than underflow
        assert_eq!(
            adjusted_gas_price(U256::from(100u64), -250, limit),
            U256::zero()
        );
    }

    #[test]
    fn test_adjusted_gas_price_is_capped() {
        assert_eq!(
            adjusted_gas_price(U256::from(500u64), 50, U256::from(600u64)),
            U256::from(600u64)
        );
        // Zero limit means no cap
        assert_eq!(
            adjusted_gas_price(U256::from(500u64), 50, U256::zero()),
            U256::from(750u64)
        );
    }

    #[test]
    fn test_bumped_gas_price() {
        let limit = U256::from(1_000u64);
        assert_eq!(
            bumped_gas_price(U256::from(100u64), U256::from(10u64), limit).unwrap(),
            U256::from(110u64)
        );
        assert_eq!(
            bumped_gas_price(U256::from(995u64), U256::from(10u64), limit).unwrap(),
            U256::from(1_000u64)
        );
        assert!(matches!(
            bumped_gas_price(U256::from(1_000u64), U256::from(10u64), limit),
            Err(RelayError::NonCritical(_))
        ));
    }
}
