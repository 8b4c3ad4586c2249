//! Transparent credential refresh
//!
//! [`TokenRefresher::call_with_refresh`] sends an upstream request with the
//! caller's access credential. A `401` triggers at most one refresh, after
//! which the request is resent exactly once.
//!
//! Rotation runs shielded: once the refresh grant has been sent, persisting
//! the new pair completes even if the calling request goes away. There is no
//! lock across requests; when the provider rejects a refresh credential that
//! a concurrent request has already rotated, the rotated pair is adopted from
//! the durable store instead of killing the session.

use std::sync::Arc;

use crate::cache::{keys, Cache, CacheLayer};
use crate::crypto::FernetCipher;
use crate::error::{AuthError, AuthResult};
use crate::models::AuthenticatedUser;
use crate::services::background::Detached;
use crate::services::discord::{UpstreamClient, UpstreamError, UpstreamRequest, UpstreamResponse};
use crate::services::session::SessionStore;

/// Plaintext pair produced by a rotation
struct RotatedCredentials {
    access_token: String,
    refresh_token: Option<String>,
}

/// Sends upstream requests on behalf of a user, refreshing once on `401`
pub struct TokenRefresher {
    upstream: Arc<dyn UpstreamClient>,
    sessions: Arc<SessionStore>,
    cipher: Arc<FernetCipher>,
    cache: Arc<Cache>,
    detached: Detached,
}

impl TokenRefresher {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        sessions: Arc<SessionStore>,
        cipher: Arc<FernetCipher>,
        cache: Arc<Cache>,
    ) -> Self {
        Self {
            upstream,
            sessions,
            cipher,
            cache,
            detached: Detached,
        }
    }

    /// Send `request` as `user`, refreshing the credential pair at most once
    ///
    /// On a successful rotation `user` carries the new pair when this returns.
    pub async fn call_with_refresh(
        &self,
        user: &mut AuthenticatedUser,
        request: &UpstreamRequest,
    ) -> AuthResult<UpstreamResponse> {
        let first = self.send(request, &user.access_token).await?;
        if !first.is_unauthorized() {
            return Ok(first);
        }

        let refresh_token = match user.refresh_token.clone() {
            Some(token) => token,
            None => {
                tracing::info!(user_id = %user.id, "Access credential rejected and no refresh credential stored");
                let _ = self.sessions.invalidate(&user.session_id).await?;
                return Err(AuthError::RefreshFailed);
            }
        };

        let rotated = self.rotate(user, refresh_token).await?;
        user.rotate(rotated.access_token, rotated.refresh_token);

        let retry = self.send(request, &user.access_token).await?;
        if retry.is_unauthorized() {
            tracing::warn!(user_id = %user.id, "Rotated access credential rejected, ending session");
            let _ = self.sessions.invalidate(&user.session_id).await?;
            return Err(AuthError::RefreshFailed);
        }

        Ok(retry)
    }

    async fn send(&self, request: &UpstreamRequest, access_token: &str) -> AuthResult<UpstreamResponse> {
        self.upstream.send(request, access_token).await.map_err(|e| {
            tracing::warn!(path = %request.path, error = %e, "Upstream request failed");
            AuthError::UpstreamUnavailable
        })
    }

    async fn rotate(&self, user: &AuthenticatedUser, refresh_token: String) -> AuthResult<RotatedCredentials> {
        let upstream = self.upstream.clone();
        let sessions = self.sessions.clone();
        let cipher = self.cipher.clone();
        let cache = self.cache.clone();
        let session_id = user.session_id.clone();
        let user_id = user.id.clone();

        self.detached
            .shielded(async move {
                match upstream.refresh(&refresh_token).await {
                    Ok(set) => {
                        let refresh = set.refresh_token.unwrap_or(refresh_token);
                        let access_ct = cipher.encrypt(&set.access_token)?;
                        let refresh_ct = cipher.encrypt(&refresh)?;
                        sessions.replace(&session_id, &access_ct, Some(&refresh_ct)).await?;

                        if let Err(e) = cache.delete(&keys::guilds(&user_id)).await {
                            tracing::warn!(user_id = %user_id, error = %format!("{:#}", e), "Permission cache eviction failed");
                        }
                        tracing::info!(user_id = %user_id, "Rotated upstream credentials");

                        Ok(RotatedCredentials {
                            access_token: set.access_token,
                            refresh_token: Some(refresh),
                        })
                    }
                    Err(UpstreamError::Rejected { status }) => {
                        tracing::info!(user_id = %user_id, status, "Refresh credential rejected");
                        reconcile(&sessions, &cipher, &session_id, &refresh_token).await
                    }
                    Err(e) => {
                        tracing::warn!(user_id = %user_id, error = %e, "Refresh failed, session kept");
                        Err(AuthError::UpstreamUnavailable)
                    }
                }
            })
            .await
    }
}

/// Decide what a rejected refresh means for the session
///
/// If the stored refresh credential differs from the one just rejected, a
/// concurrent request rotated the pair first and its result is adopted.
/// Otherwise the session is invalidated.
async fn reconcile(
    sessions: &SessionStore,
    cipher: &FernetCipher,
    session_id: &str,
    rejected_refresh: &str,
) -> AuthResult<RotatedCredentials> {
    let session = match sessions.reload(session_id).await? {
        Some(session) => session,
        None => return Err(AuthError::RefreshFailed),
    };

    let stored_refresh = match session.refresh_ciphertext.as_deref() {
        Some(ct) => Some(cipher.decrypt(ct)?),
        None => None,
    };

    match stored_refresh {
        Some(refresh) if refresh != rejected_refresh => {
            tracing::info!(user_id = %session.user_id, "Adopting credentials rotated by a concurrent request");
            Ok(RotatedCredentials {
                access_token: cipher.decrypt(&session.access_ciphertext)?,
                refresh_token: Some(refresh),
            })
        }
        _ => {
            let _ = sessions.invalidate(session_id).await?;
            Err(AuthError::RefreshFailed)
        }
    }
}
