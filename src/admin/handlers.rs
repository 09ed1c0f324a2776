use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::credentials::SecretStatus;
use crate::http::response::{ok, reject};
use crate::security::LimiterStats;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub cache: &'static str,
    pub limiter: LimiterStats,
    pub csrf_memory_tokens: usize,
    pub secrets: SecretStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct RotateParams {
    #[serde(default)]
    pub force: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Response {
    ok(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        cache: if state.cache.is_connected() {
            "connected"
        } else {
            "degraded"
        },
        limiter: state.limiter.stats(),
        csrf_memory_tokens: state.csrf.memory_len(),
        secrets: state.rotator.status(),
    })
}

pub async fn unblock_client(
    State(state): State<AdminState>,
    Path(client): Path<String>,
) -> Response {
    if state.limiter.unblock(&client) {
        ok(serde_json::json!({ "client": client, "unblocked": true }))
    } else {
        reject(StatusCode::NOT_FOUND, "Client is not tracked", None)
    }
}

pub async fn rotate_secret(
    State(state): State<AdminState>,
    Query(params): Query<RotateParams>,
) -> Response {
    // Rotation fsyncs the secret file under a lock; keep it off the runtime.
    let rotator = state.rotator.clone();
    match tokio::task::spawn_blocking(move || rotator.rotate(params.force, false)).await {
        Ok(Ok(outcome)) => ok(outcome),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Admin-triggered rotation failed");
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Rotation failed", None)
        }
        Err(e) => {
            tracing::error!(error = %e, "Admin-triggered rotation task failed");
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Rotation failed", None)
        }
    }
}

pub async fn get_secrets(State(state): State<AdminState>) -> Response {
    ok(state.rotator.status())
}
