//! API middleware
//!
//! Contains middleware for:
//! - Authentication (session cookie resolution)
//! - Authorization (master admin allowlist, internal shared secret)
//! - Session cookie clearing on responses that end a session

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

use crate::config::AccessConfig;
use crate::db::DynDatabasePool;
use crate::error::AuthError;
use crate::models::AuthenticatedUser;
use crate::services::{Authenticator, ClearSessionCookie, PermissionVerifier, SessionStore, TokenRefresher};

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session_token";

/// Header carrying the machine-to-machine secret
pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub cache: Arc<crate::cache::Cache>,
    pub sessions: Arc<SessionStore>,
    pub authenticator: Arc<Authenticator>,
    pub refresher: Arc<TokenRefresher>,
    pub permissions: Arc<PermissionVerifier>,
    pub access: Arc<AccessConfig>,
    pub cookies: CookiePolicy,
    /// Absolute OAuth redirect URI registered with the provider
    pub redirect_uri: String,
}

/// Attributes of the session cookie
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    pub max_age_secs: u64,
    pub secure: bool,
}

impl CookiePolicy {
    /// `Set-Cookie` value that installs `session_id`
    pub fn issue(&self, session_id: &str) -> String {
        self.render(session_id, self.max_age_secs)
    }

    /// `Set-Cookie` value that expires the session cookie
    pub fn clear(&self) -> String {
        self.render("", 0)
    }

    fn render(&self, value: &str, max_age: u64) -> String {
        let secure = if self.secure { "; Secure" } else { "" };
        format!(
            "{}={}; Max-Age={}; Path=/; HttpOnly{}; SameSite=Lax",
            SESSION_COOKIE, value, max_age, secure
        )
    }
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
    /// Expire the session cookie along with this error
    #[serde(skip)]
    pub clear_session: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
            clear_session: false,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new("UPSTREAM_UNAVAILABLE", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    fn clearing_session(mut self) -> Self {
        self.clear_session = true;
        self
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::AuthenticationRequired => ApiError::unauthorized("Authentication required"),
            AuthError::InvalidOrExpiredSession => {
                ApiError::unauthorized("Invalid or expired session").clearing_session()
            }
            AuthError::TamperOrFormat => ApiError::unauthorized("Invalid session").clearing_session(),
            AuthError::RefreshFailed => {
                ApiError::unauthorized("Session expired, please sign in again").clearing_session()
            }
            AuthError::UpstreamUnavailable => ApiError::bad_gateway("Upstream provider unavailable"),
            AuthError::PermissionDenied => ApiError::forbidden("Permission denied"),
            AuthError::Internal(e) => {
                tracing::error!(error = %format!("{:#}", e), "Internal error");
                ApiError::internal_error("Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "UPSTREAM_UNAVAILABLE" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let clear_session = self.clear_session;
        let mut response = (status, Json(self)).into_response();
        if clear_session {
            response.extensions_mut().insert(ClearSessionCookie);
        }
        response
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::from(AuthError::AuthenticationRequired))
    }
}

/// Extract the session id from the session cookie
///
/// The cookie is the only carrier; an `Authorization` header is ignored.
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    let cookie_str = headers.get(header::COOKIE).and_then(|h| h.to_str().ok())?;
    let prefix = format!("{}=", SESSION_COOKIE);

    cookie_str
        .split(';')
        .filter_map(|cookie| cookie.trim().strip_prefix(prefix.as_str()))
        .find(|token| !token.is_empty())
        .map(String::from)
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_session_token(request.headers()).ok_or(AuthError::AuthenticationRequired)?;
    let user = state.authenticator.resolve(&token).await?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Master admin authorization middleware
pub async fn require_master_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or(AuthError::AuthenticationRequired)?;

    if !state.access.is_master_admin(&user.id) {
        tracing::info!(user_id = %user.id, "Master admin route denied");
        return Err(AuthError::PermissionDenied.into());
    }

    Ok(next.run(request).await)
}

/// Shared secret middleware for the internal surface
pub async fn require_internal_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if !secrets_match(presented, &state.access.internal_secret) {
        tracing::warn!("Internal request with missing or wrong secret");
        return Err(ApiError::unauthorized("Unauthorized"));
    }

    Ok(next.run(request).await)
}

/// Constant-time secret comparison
///
/// Both sides are reduced to HMAC tags first so neither content nor length
/// leaks through timing.
fn secrets_match(presented: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(b"internal-secret") else {
        return false;
    };
    mac.update(expected.as_bytes());
    let expected_tag = mac.finalize().into_bytes();

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(b"internal-secret") else {
        return false;
    };
    mac.update(presented.as_bytes());
    mac.verify_slice(&expected_tag).is_ok()
}

/// Append the cookie-clearing header to responses that ended a session
pub async fn apply_session_cookie(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;

    if response.extensions().get::<ClearSessionCookie>().is_some() {
        match HeaderValue::from_str(&state.cookies.clear()) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::error!(error = %e, "Invalid session cookie header"),
        }
    }

    response
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_extract_session_token_from_cookie() {
        let headers = headers_with(header::COOKIE, "theme=dark; session_token=abc123; other=1");
        assert_eq!(extract_session_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn test_extract_session_token_ignores_bearer() {
        let headers = headers_with(header::AUTHORIZATION, "Bearer test-token-123");
        assert!(extract_session_token(&headers).is_none());
    }

    #[test]
    fn test_extract_session_token_none() {
        assert!(extract_session_token(&HeaderMap::new()).is_none());
        assert!(extract_session_token(&headers_with(header::COOKIE, "session_token=")).is_none());
        assert!(extract_session_token(&headers_with(header::AUTHORIZATION, "Basic abc")).is_none());
    }

    #[test]
    fn test_cookie_policy() {
        let policy = CookiePolicy {
            max_age_secs: 7_776_000,
            secure: true,
        };
        assert_eq!(
            policy.issue("deadbeef"),
            "session_token=deadbeef; Max-Age=7776000; Path=/; HttpOnly; Secure; SameSite=Lax"
        );
        assert_eq!(
            policy.clear(),
            "session_token=; Max-Age=0; Path=/; HttpOnly; Secure; SameSite=Lax"
        );

        let insecure = CookiePolicy {
            max_age_secs: 60,
            secure: false,
        };
        assert!(!insecure.issue("x").contains("Secure"));
    }

    #[test]
    fn test_auth_error_mapping() {
        let cases = [
            (AuthError::AuthenticationRequired, StatusCode::UNAUTHORIZED, false),
            (AuthError::InvalidOrExpiredSession, StatusCode::UNAUTHORIZED, true),
            (AuthError::TamperOrFormat, StatusCode::UNAUTHORIZED, true),
            (AuthError::RefreshFailed, StatusCode::UNAUTHORIZED, true),
            (AuthError::UpstreamUnavailable, StatusCode::BAD_GATEWAY, false),
            (AuthError::PermissionDenied, StatusCode::FORBIDDEN, false),
            (
                AuthError::Internal(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
                false,
            ),
        ];

        for (err, status, clears) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), status);
            assert_eq!(response.extensions().get::<ClearSessionCookie>().is_some(), clears);
        }
    }

    #[tokio::test]
    async fn test_internal_error_body_is_generic() {
        let response = ApiError::from(AuthError::Internal(anyhow::anyhow!("near \"SELEC\": syntax error")))
            .into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("SELEC"));
        assert!(text.contains("INTERNAL_ERROR"));
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("s3cret", "s3cret"));
        assert!(!secrets_match("s3cre", "s3cret"));
        assert!(!secrets_match("", "s3cret"));
        assert!(!secrets_match("", ""));
    }

    #[test]
    fn test_api_error_body_shape() {
        let value = serde_json::to_value(ApiError::forbidden("Access denied")).unwrap();
        assert_eq!(value, serde_json::json!({ "error": { "code": "FORBIDDEN", "message": "Access denied" } }));
    }
}
