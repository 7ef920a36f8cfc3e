// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Destination-chain adapters.
//!
//! The service loop only sees the [`TransferValidator`] capability; one
//! concrete driver per destination family implements it as a standalone
//! value. Drivers own nothing durable — the witness-set cache and gas
//! parameters are transient, and every transfer handed in is an immutable
//! snapshot whose mutations round-trip through the recorder.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bridge_relayer_types::{RelayResult, Transfer, WitnessSignature};
use ethers::core::k256::ecdsa::SigningKey;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{Signer, Wallet};
use ethers::types::{Address, H256, U256};

pub mod eth;
pub mod iotex;

pub use eth::{EthereumValidator, EthereumValidatorConfig};
pub use iotex::IotexValidator;

/// Destination-chain view of a submitted transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOnChain {
    /// Submission seen but not yet trustable; check again next tick
    NotConfirmed,
    /// Submission vanished from mempool and chain; rebroadcast at the same
    /// nonce with a higher gas price
    NeedSpeedUp,
    /// The validator contract recorded a settle height for the id
    Settled,
    /// The submission mined without settling; the contract will never accept
    /// the same id again
    Rejected,
}

/// Coordinates of a broadcast submission, persisted by the recorder and
/// reused on speed-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub tx_hash: H256,
    pub nonce: u64,
    pub gas_price: U256,
}

/// One destination chain, as seen by the service loop.
#[async_trait]
pub trait TransferValidator: Send + Sync {
    /// Address of the validator contract; salts aggregate transfer ids.
    fn address(&self) -> Address;

    /// Classifies the last submission of `transfer` on the destination
    /// chain. An `Err` means the answer is unknown this tick (ambiguous or
    /// failed RPC); callers treat it as [`StatusOnChain::NotConfirmed`].
    async fn check(&self, transfer: &Transfer) -> RelayResult<StatusOnChain>;

    /// Assembles a quorum payload and broadcasts the submission.
    async fn submit(
        &self,
        transfer: &Transfer,
        signatures: &[WitnessSignature],
    ) -> RelayResult<Submission>;

    /// Rebroadcasts a stuck submission at `transfer.nonce` with a higher gas
    /// price.
    async fn speed_up(
        &self,
        transfer: &Transfer,
        signatures: &[WitnessSignature],
    ) -> RelayResult<Submission>;
}

pub type EthSigner = SignerMiddleware<Provider<Http>, Wallet<SigningKey>>;

const RPC_CONNECT_TIMEOUT_SECS: u64 = 10;
const RPC_CALL_TIMEOUT_SECS: u64 = 60;

/// Connects a signing client to an eth-style JSON-RPC endpoint. The wallet
/// is bound to the endpoint's chain id so submissions are replay-protected,
/// and every RPC carries a call timeout so a wedged node cannot stall the
/// service loop forever.
pub async fn connect_signer(url: &str, private_key_hex: &str) -> anyhow::Result<Arc<EthSigner>> {
    let http_client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(RPC_CONNECT_TIMEOUT_SECS))
        .timeout(std::time::Duration::from_secs(RPC_CALL_TIMEOUT_SECS))
        .build()?;
    let transport = Http::new_with_client(url::Url::parse(url)?, http_client);
    let provider =
        Provider::new(transport).interval(std::time::Duration::from_millis(2000));
    let chain_id = provider.get_chainid().await?;
    let wallet = Wallet::from_str(private_key_hex)
        .map_err(|e| anyhow::anyhow!("invalid relayer private key: {}", e))?
        .with_chain_id(chain_id.as_u64());
    Ok(Arc::new(SignerMiddleware::new(provider, wallet)))
}
