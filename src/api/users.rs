//! User API endpoints
//!
//! - GET /api/users/@me - Upstream profile with dashboard roles
//! - GET /api/users/guilds - Bot-active guilds the user administers

use axum::{extract::State, routing::get, Json, Router};

use crate::api::middleware::{ApiError, AppState};
use crate::error::AuthError;
use crate::models::{AuthenticatedUser, CurrentUser, GuildSummary, UserProfile};
use crate::services::UpstreamRequest;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/@me", get(current_user))
        .route("/guilds", get(administered_guilds))
}

async fn current_user(
    State(state): State<AppState>,
    mut user: AuthenticatedUser,
) -> Result<Json<CurrentUser>, ApiError> {
    let resp = state
        .refresher
        .call_with_refresh(&mut user, &UpstreamRequest::get("/users/@me"))
        .await?;

    if !resp.is_success() {
        tracing::warn!(user_id = %user.id, status = resp.status, "Profile request failed");
        return Err(AuthError::UpstreamUnavailable.into());
    }

    let profile: UserProfile = resp.json().map_err(|e| {
        tracing::warn!(user_id = %user.id, error = %e, "Profile could not be decoded");
        ApiError::from(AuthError::UpstreamUnavailable)
    })?;

    Ok(Json(CurrentUser {
        is_master_admin: state.access.shows_master_admin(&profile.id),
        is_calendar_admin: state.access.is_calendar_admin(&profile.id),
        profile,
    }))
}

async fn administered_guilds(
    State(state): State<AppState>,
    mut user: AuthenticatedUser,
) -> Result<Json<Vec<GuildSummary>>, ApiError> {
    Ok(Json(state.permissions.administered_guilds(&mut user).await?))
}
