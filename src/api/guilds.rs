//! Guild API endpoints
//!
//! - GET /api/guilds/{guild_id}/access - Access decision for one guild
//! - POST /api/guilds/{guild_id}/settings/verify - Gate for settings writes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState};
use crate::error::AuthError;
use crate::models::{AuthenticatedUser, GuildAccess};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{guild_id}/access", get(guild_access))
        .route("/{guild_id}/settings/verify", post(verify_settings_access))
}

async fn guild_access(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    mut user: AuthenticatedUser,
) -> Result<Json<GuildAccess>, ApiError> {
    Ok(Json(state.permissions.guild_access(&mut user, &guild_id).await?))
}

/// 204 when the user may change the guild's settings, 403 otherwise
async fn verify_settings_access(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    mut user: AuthenticatedUser,
) -> Result<StatusCode, ApiError> {
    if !state.permissions.has_extended_access(&mut user, &guild_id).await? {
        tracing::info!(user_id = %user.id, guild_id = %guild_id, "Settings access denied");
        return Err(AuthError::PermissionDenied.into());
    }
    Ok(StatusCode::NO_CONTENT)
}
