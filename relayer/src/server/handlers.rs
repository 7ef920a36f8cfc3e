// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bridge_relayer_types::{parse_hash, RelayError, TransferStatus};
use prometheus::TextEncoder;
use serde_json::json;
use tracing::{info, warn};

use super::types::{TransferView, WitnessSubmission};
use super::ApiState;

pub fn create_api_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/submit", post(submit_witness))
        .route("/transfers/:status", get(list_transfers))
        .route("/transfer/:id", get(get_transfer))
        .route("/health", get(health_check))
        .route("/metrics", get(export_metrics))
        .with_state(state)
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(error: RelayError) -> ApiError {
    let status = match &error {
        RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        RelayError::UnknownTransfer(_) => StatusCode::NOT_FOUND,
        RelayError::InvariantViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!("request failed: {}", error);
    }
    (status, Json(json!({ "error": error.to_string() })))
}

/// Ingress for witness attestations. Creating the transfer and adding the
/// signature are both idempotent, so witnesses can repost freely.
async fn submit_witness(
    State(state): State<Arc<ApiState>>,
    Json(submission): Json<WitnessSubmission>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let transfer = submission.transfer().map_err(error_response)?;
    let signature = submission.witness_signature().map_err(error_response)?;
    info!(
        "witness {:#x} submitted signature for transfer {}",
        signature.witness,
        transfer.key()
    );

    state
        .recorder
        .add_transfer(&transfer)
        .await
        .map_err(error_response)?;
    state
        .recorder
        .add_witness(&signature.transfer, signature.witness, &signature.signature)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "success": true })))
}

async fn list_transfers(
    State(state): State<Arc<ApiState>>,
    Path(status): Path<String>,
) -> Result<Json<Vec<TransferView>>, ApiError> {
    let status = TransferStatus::from_str(&status).map_err(error_response)?;
    let transfers = state
        .recorder
        .transfers_with_status(status)
        .await
        .map_err(error_response)?;
    Ok(Json(transfers.iter().map(TransferView::from).collect()))
}

async fn get_transfer(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<TransferView>, ApiError> {
    let id = parse_hash(&id).map_err(error_response)?;
    let transfer = state
        .recorder
        .transfer_by_id(id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| {
            error_response(RelayError::UnknownTransfer(format!("{:#x}", id)))
        })?;
    Ok(Json(TransferView::from(&transfer)))
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn export_metrics(State(state): State<Arc<ApiState>>) -> Result<String, ApiError> {
    TextEncoder::new()
        .encode_to_string(&state.registry.gather())
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let (status, _) = error_response(RelayError::InvalidInput("bad hex".to_string()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = error_response(RelayError::UnknownTransfer("k".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = error_response(RelayError::InvariantViolation("zero".to_string()));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let (status, _) = error_response(RelayError::Storage("down".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
