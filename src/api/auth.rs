//! Authentication API endpoints
//!
//! Handles HTTP requests for sign-in and sign-out:
//! - GET /api/auth/callback - OAuth redirect target, opens a session
//! - POST /api/auth/logout - Ends the presented session

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use crate::api::middleware::{extract_session_token, ApiError, AppState};

/// Query string of the OAuth redirect
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
}

/// Build the auth router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/callback", get(callback))
        .route("/logout", post(logout))
}

/// GET /api/auth/callback - Complete the OAuth code exchange
///
/// Sets the session cookie and redirects to the dashboard root.
async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::validation_error("Missing authorization code"))?;

    let signed_in = state.authenticator.open_session(&code, &state.redirect_uri).await?;

    Ok((
        StatusCode::FOUND,
        [
            (header::SET_COOKIE, state.cookies.issue(&signed_in.session_id)),
            (header::LOCATION, "/".to_string()),
        ],
    ))
}

/// POST /api/auth/logout - End the presented session
///
/// Always succeeds and always clears the cookie.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        if let Err(e) = state.authenticator.logout(&token).await {
            tracing::warn!(error = %e, "Session invalidation failed during logout");
        }
    }

    (StatusCode::NO_CONTENT, [(header::SET_COOKIE, state.cookies.clear())])
}
