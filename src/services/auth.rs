//! Session resolution and sign-in
//!
//! Turns a presented session id into an [`AuthenticatedUser`] and completes
//! the OAuth code exchange that creates sessions in the first place.

use std::sync::Arc;
use std::time::Duration;

use crate::crypto::FernetCipher;
use crate::error::{AuthError, AuthResult};
use crate::models::{AuthenticatedUser, UserProfile};
use crate::services::discord::{UpstreamClient, UpstreamRequest};
use crate::services::session::{ClearSessionCookie, SessionStore};

/// Outcome of a completed sign-in
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub session_id: String,
    pub profile: UserProfile,
}

/// Resolves sessions and signs users in
pub struct Authenticator {
    sessions: Arc<SessionStore>,
    cipher: Arc<FernetCipher>,
    upstream: Arc<dyn UpstreamClient>,
    session_ttl: Duration,
}

impl Authenticator {
    pub fn new(
        sessions: Arc<SessionStore>,
        cipher: Arc<FernetCipher>,
        upstream: Arc<dyn UpstreamClient>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            sessions,
            cipher,
            upstream,
            session_ttl,
        }
    }

    /// Resolve a session id into the request-scoped user
    pub async fn resolve(&self, session_id: &str) -> AuthResult<AuthenticatedUser> {
        let session = self
            .sessions
            .lookup(session_id)
            .await?
            .ok_or(AuthError::InvalidOrExpiredSession)?;

        let access_token = self.cipher.decrypt(&session.access_ciphertext).map_err(|e| {
            tracing::warn!(user_id = %session.user_id, "Stored access credential failed verification");
            AuthError::from(e)
        })?;

        let refresh_token = match session.refresh_ciphertext.as_deref() {
            Some(ct) => Some(self.cipher.decrypt(ct).map_err(|e| {
                tracing::warn!(user_id = %session.user_id, "Stored refresh credential failed verification");
                AuthError::from(e)
            })?),
            None => None,
        };

        Ok(AuthenticatedUser {
            id: session.user_id,
            access_token,
            refresh_token,
            session_id: session.id,
        })
    }

    /// Exchange an authorization code and open a session for its owner
    pub async fn open_session(&self, code: &str, redirect_uri: &str) -> AuthResult<SignedIn> {
        let tokens = self.upstream.exchange_code(code, redirect_uri).await.map_err(|e| {
            tracing::warn!(error = %e, "Authorization code exchange failed");
            AuthError::UpstreamUnavailable
        })?;

        let resp = self
            .upstream
            .send(&UpstreamRequest::get("/users/@me"), &tokens.access_token)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Profile request failed");
                AuthError::UpstreamUnavailable
            })?;

        if !resp.is_success() {
            tracing::warn!(status = resp.status, "Profile request rejected after code exchange");
            return Err(AuthError::UpstreamUnavailable);
        }

        let profile: UserProfile = resp.json().map_err(|e| {
            tracing::warn!(error = %e, "Profile could not be decoded");
            AuthError::UpstreamUnavailable
        })?;

        let access_ct = self.cipher.encrypt(&tokens.access_token)?;
        let refresh_ct = tokens
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.encrypt(t))
            .transpose()?;

        let session_id = self
            .sessions
            .create(&profile.id, access_ct, refresh_ct, self.session_ttl)
            .await?;

        tracing::info!(user_id = %profile.id, username = %profile.username, "User signed in");
        Ok(SignedIn { session_id, profile })
    }

    /// End a session
    pub async fn logout(&self, session_id: &str) -> AuthResult<ClearSessionCookie> {
        self.sessions.invalidate(session_id).await
    }
}
