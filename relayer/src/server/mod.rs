// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! JSON API of the relayer.
//!
//! Witnesses push their attestations through `POST /submit`; operators and
//! downstream services read transfer state by status or aggregate id. The
//! wire model is plain JSON with hex addresses and decimal amounts; all
//! durable effects go through the recorder.

mod handlers;
mod types;

pub use handlers::create_api_router;
pub use types::{TransferView, WitnessSubmission};

use std::sync::Arc;

use bridge_relayer_store::Recorder;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub recorder: Arc<Recorder>,
    pub registry: Registry,
}

/// Binds the listener and serves until cancellation. A bind failure is
/// returned so the process can exit non-zero.
pub async fn run_server(
    port: u16,
    state: Arc<ApiState>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let router = create_api_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("API server listening on port {}", port);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
