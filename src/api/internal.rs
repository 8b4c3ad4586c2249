//! Internal machine-to-machine endpoints
//!
//! Every route here sits behind `require_internal_secret`.

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::api::middleware::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub removed: u64,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/sessions/sweep", post(sweep_sessions))
}

/// POST /api/internal/sessions/sweep - Delete expired sessions
async fn sweep_sessions(State(state): State<AppState>) -> Result<Json<SweepResponse>, ApiError> {
    let removed = state.sessions.sweep_expired().await?;
    Ok(Json(SweepResponse { removed }))
}
