// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;

use bridge_relayer::alert::SlackAlerter;
use bridge_relayer::config::RelayerConfig;
use bridge_relayer::metrics::RelayerMetrics;
use bridge_relayer::server::{run_server, ApiState};
use bridge_relayer::service::RelayService;
use bridge_relayer::validator::{
    connect_signer, EthereumValidator, EthereumValidatorConfig, IotexValidator, TransferValidator,
};
use bridge_relayer_store::{Db, DbArgs, Recorder};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Init logging
    let (_log_guard, _filter_handle) = telemetry_subscribers::TelemetryConfig::new(env!("CARGO_BIN_NAME"))
        .with_env()
        .init();

    let config = RelayerConfig::load(&args.config_path)?;
    info!("starting relayer for chain {:?}", config.chain);

    let registry = prometheus::Registry::new();
    let metrics = Arc::new(RelayerMetrics::new(&registry));
    let alerter = Arc::new(SlackAlerter::new(Some(config.slack_web_hook.clone())));
    if !alerter.is_configured() {
        warn!("no slack webhook configured, alerts are log-only");
    }

    let db = Db::new(&config.database_url, DbArgs::default()).await?;
    let recorder = Arc::new(Recorder::new(
        db,
        &config.transfer_table_name,
        &config.witness_table_name,
        config.token_pair_map()?,
    )?);
    recorder.initialize().await?;

    let client = connect_signer(&config.client_url, &config.private_key).await?;
    let validator_address = config.parsed_validator_address()?;
    let validator: Arc<dyn TransferValidator> = if config.chain.is_ethereum_family() {
        let driver_config = EthereumValidatorConfig {
            confirm_block_number: config.eth_confirm_block_number,
            gas_price_limit: config.gas_price_limit(),
            gas_price_deviation: config.eth_gas_price_deviation,
            gas_price_gap: config.gas_price_gap(),
            ..Default::default()
        };
        Arc::new(
            EthereumValidator::new(
                client,
                validator_address,
                driver_config,
                alerter.clone(),
                metrics.clone(),
            )
            .await?,
        )
    } else {
        Arc::new(
            IotexValidator::new(client, validator_address, alerter.clone(), metrics.clone())
                .await?,
        )
    };

    let cancel = CancellationToken::new();
    let service = RelayService::new(
        recorder.clone(),
        validator,
        config.interval,
        metrics.clone(),
        cancel.clone(),
    );
    let service_handle = service.spawn();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("shutdown signal received");
        shutdown.cancel();
    });

    let state = Arc::new(ApiState {
        recorder,
        registry,
    });
    let served = run_server(config.port, state, cancel.clone()).await;

    // Stop the loop whether the server exited cleanly or not
    cancel.cancel();
    service_handle
        .await
        .map_err(|e| anyhow::anyhow!("service task join error: {}", e))?;
    served
}
