//! Authentication and authorization failures
//!
//! Every service in the request path reports failures as [`AuthError`]. The HTTP
//! boundary maps each kind to a status code and a generic message; see
//! `api::middleware::ApiError`.

use crate::crypto::CipherError;

/// Failure kinds observable by callers of the auth services
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No session was presented
    #[error("Authentication required")]
    AuthenticationRequired,

    /// The session id is unknown or the session has expired
    #[error("Invalid or expired session")]
    InvalidOrExpiredSession,

    /// A stored credential failed authentication or was malformed
    #[error("Session credentials are invalid")]
    TamperOrFormat,

    /// The upstream provider rejected the refresh credential; the session is gone
    #[error("Session expired, please sign in again")]
    RefreshFailed,

    /// The upstream provider could not be reached or failed with a server error
    #[error("Upstream provider unavailable")]
    UpstreamUnavailable,

    /// Authenticated, but not allowed to act on the resource
    #[error("Permission denied")]
    PermissionDenied,

    /// Durable store or other internal failure; the detail is for logs only
    #[error("Internal error")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    /// Whether the client should drop its session cookie
    pub fn clears_session(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidOrExpiredSession | AuthError::TamperOrFormat | AuthError::RefreshFailed
        )
    }
}

impl From<CipherError> for AuthError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::TamperOrFormat => AuthError::TamperOrFormat,
            CipherError::InvalidKey(_) => AuthError::Internal(anyhow::Error::new(err)),
        }
    }
}

/// Result alias for the auth services
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_errors_map_to_auth_errors() {
        assert!(matches!(AuthError::from(CipherError::TamperOrFormat), AuthError::TamperOrFormat));
        assert!(matches!(
            AuthError::from(CipherError::InvalidKey("short".to_string())),
            AuthError::Internal(_)
        ));
    }

    #[test]
    fn test_clears_session() {
        assert!(AuthError::InvalidOrExpiredSession.clears_session());
        assert!(AuthError::TamperOrFormat.clears_session());
        assert!(AuthError::RefreshFailed.clears_session());
        assert!(!AuthError::AuthenticationRequired.clears_session());
        assert!(!AuthError::UpstreamUnavailable.clears_session());
        assert!(!AuthError::PermissionDenied.clears_session());
    }

    #[test]
    fn test_internal_message_hides_detail() {
        let err = AuthError::Internal(anyhow::anyhow!("database is locked"));
        assert_eq!(err.to_string(), "Internal error");
    }
}
