use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use crate::AppState;

#[derive(Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub history: String,
    pub deployment: String,
}

pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "ok" })
}

pub async fn readiness(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadinessResponse>) {
    // An unconfigured store is not a readiness failure; a broken one is.
    let history = match &state.history {
        None => "disabled",
        Some(store) => match store.ensure().await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::error!("Readiness check: history error: {}", e);
                "error"
            }
        },
    };

    let deployment_ok = state.settings.primary.is_configured();
    if !deployment_ok {
        tracing::error!("Readiness check: no primary deployment configured");
    }

    let ready = history != "error" && deployment_ok;
    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "unready" }.to_string(),
            history: history.to_string(),
            deployment: if deployment_ok { "ok" } else { "missing" }.to_string(),
        }),
    )
}
