//! User models

use serde::{Deserialize, Serialize};

/// The caller of the current request, resolved from its session
///
/// Lives for one request only and is passed explicitly to every service call.
/// Credentials are plaintext here, so `Debug` redacts them along with the
/// session id.
#[derive(Clone)]
pub struct AuthenticatedUser {
    /// Upstream user ID
    pub id: String,
    /// Decrypted access credential
    pub access_token: String,
    /// Decrypted refresh credential
    pub refresh_token: Option<String>,
    /// Session this user was resolved from
    pub session_id: String,
}

impl AuthenticatedUser {
    /// Swap in a rotated credential pair
    pub fn rotate(&mut self, access_token: String, refresh_token: Option<String>) {
        self.access_token = access_token;
        self.refresh_token = refresh_token;
    }
}

impl std::fmt::Debug for AuthenticatedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedUser")
            .field("id", &self.id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("session_id", &"<redacted>")
            .finish()
    }
}

/// Upstream user profile (`GET /users/@me`)
///
/// Fields this service does not use are kept in `extra` and passed through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Profile returned by `GET /api/users/@me`
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub is_master_admin: bool,
    pub is_calendar_admin: bool,
}
