//! Session model

use serde::{Deserialize, Serialize};

/// Durable session record
///
/// Both credentials are stored as cipher tokens; this type never holds plaintext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session ID (32 lowercase hex chars)
    pub id: String,
    /// Upstream user ID
    pub user_id: String,
    /// Encrypted access credential
    pub access_ciphertext: String,
    /// Encrypted refresh credential, absent for sessions created without one
    pub refresh_ciphertext: Option<String>,
    /// Absolute expiry, unix seconds
    pub expires_at: i64,
}

impl Session {
    /// Whether the session is past its expiry at `now` (unix seconds)
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Seconds left before expiry at `now`, zero once expired
    pub fn remaining_secs(&self, now: i64) -> u64 {
        u64::try_from(self.expires_at - now).unwrap_or(0)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("has_refresh", &self.refresh_ciphertext.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Copy of a [`Session`] kept in the fast cache under `session:{id}`
#[derive(Clone, Serialize, Deserialize)]
pub struct CachedSessionEntry {
    pub user_id: String,
    pub access_ciphertext: String,
    pub refresh_ciphertext: Option<String>,
    pub expires_at: i64,
}

impl CachedSessionEntry {
    /// Rebuild the session this entry was cached for
    pub fn into_session(self, id: &str) -> Session {
        Session {
            id: id.to_string(),
            user_id: self.user_id,
            access_ciphertext: self.access_ciphertext,
            refresh_ciphertext: self.refresh_ciphertext,
            expires_at: self.expires_at,
        }
    }
}

impl From<&Session> for CachedSessionEntry {
    fn from(session: &Session) -> Self {
        Self {
            user_id: session.user_id.clone(),
            access_ciphertext: session.access_ciphertext.clone(),
            refresh_ciphertext: session.refresh_ciphertext.clone(),
            expires_at: session.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: i64) -> Session {
        Session {
            id: "0123456789abcdef0123456789abcdef".to_string(),
            user_id: "42".to_string(),
            access_ciphertext: "ct-a".to_string(),
            refresh_ciphertext: Some("ct-r".to_string()),
            expires_at,
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let s = session(1000);
        assert!(!s.is_expired_at(999));
        assert!(s.is_expired_at(1000));
        assert!(s.is_expired_at(1001));
    }

    #[test]
    fn test_remaining_secs() {
        let s = session(1000);
        assert_eq!(s.remaining_secs(400), 600);
        assert_eq!(s.remaining_secs(1000), 0);
        assert_eq!(s.remaining_secs(5000), 0);
    }

    #[test]
    fn test_cached_entry_roundtrip() {
        let s = session(1000);
        let entry = CachedSessionEntry::from(&s);
        assert_eq!(entry.into_session(&s.id), s);
    }

    #[test]
    fn test_debug_hides_session_id() {
        let s = session(1000);
        let rendered = format!("{:?}", s);
        assert!(!rendered.contains(&s.id));
        assert!(!rendered.contains("ct-a"));
    }
}
