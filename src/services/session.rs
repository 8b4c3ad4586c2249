//! Session store
//!
//! Owns the two-tier lookup policy for sessions:
//! - the fast cache holds a copy under `session:{id}` with a short TTL that
//!   never outlives the session itself
//! - the durable repository is the source of truth; every cache miss or cache
//!   error falls through to it
//! - a session at or past its expiry is absent to every caller, wherever it
//!   was found
//!
//! Ciphertexts pass through untouched. Session ids are never logged.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use uuid::Uuid;

use crate::cache::{keys, Cache, CacheLayer};
use crate::db::repositories::SessionRepository;
use crate::error::{AuthError, AuthResult};
use crate::models::{CachedSessionEntry, Session};
use crate::services::background::Detached;

/// Directive to expire the client's session cookie
///
/// Returned by [`SessionStore::invalidate`]; the HTTP layer turns it into a
/// `Set-Cookie` header with `Max-Age=0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct ClearSessionCookie;

/// Create, look up, rotate and invalidate sessions
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
    cache: Arc<Cache>,
    cache_ttl: Duration,
    detached: Detached,
}

impl SessionStore {
    /// Create a store; `cache_ttl` bounds how long a cached copy may live
    pub fn new(repo: Arc<dyn SessionRepository>, cache: Arc<Cache>, cache_ttl: Duration) -> Self {
        Self {
            repo,
            cache,
            cache_ttl,
            detached: Detached,
        }
    }

    /// Resolve a session id to a live session
    ///
    /// Returns `Ok(None)` for unknown and expired sessions alike.
    pub async fn lookup(&self, id: &str) -> AuthResult<Option<Session>> {
        let now = chrono::Utc::now().timestamp();
        let cache_key = keys::session(id);

        match self.cache.get::<CachedSessionEntry>(&cache_key).await {
            Ok(Some(entry)) => {
                let session = entry.into_session(id);
                if session.is_expired_at(now) {
                    tracing::debug!(user_id = %session.user_id, "Cached session expired");
                    return Ok(None);
                }
                return Ok(Some(session));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "Session cache read failed, using durable store");
            }
        }

        let session = match self.repo.get_by_id(id).await.map_err(AuthError::Internal)? {
            Some(session) => session,
            None => return Ok(None),
        };

        if session.is_expired_at(now) {
            tracing::debug!(user_id = %session.user_id, "Stored session expired");
            return Ok(None);
        }

        self.repopulate_cache(cache_key, &session, now);
        Ok(Some(session))
    }

    /// Read a live session from the durable store only, skipping the cache
    pub async fn reload(&self, id: &str) -> AuthResult<Option<Session>> {
        let now = chrono::Utc::now().timestamp();
        let session = self.repo.get_by_id(id).await.map_err(AuthError::Internal)?;
        Ok(session.filter(|s| !s.is_expired_at(now)))
    }

    /// Persist a new session and return its id
    pub async fn create(
        &self,
        user_id: &str,
        access_ciphertext: String,
        refresh_ciphertext: Option<String>,
        ttl: Duration,
    ) -> AuthResult<String> {
        let ttl_secs = i64::try_from(ttl.as_secs())
            .context("Session TTL out of range")
            .map_err(AuthError::Internal)?;

        let session = Session {
            id: Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            access_ciphertext,
            refresh_ciphertext,
            expires_at: chrono::Utc::now().timestamp() + ttl_secs,
        };

        self.repo.create(&session).await.map_err(AuthError::Internal)?;
        tracing::info!(user_id = %session.user_id, "Session created");

        Ok(session.id)
    }

    /// Overwrite both ciphertexts of a session in one write
    ///
    /// Fails with `InvalidOrExpiredSession` when the session no longer exists.
    pub async fn replace(
        &self,
        id: &str,
        access_ciphertext: &str,
        refresh_ciphertext: Option<&str>,
    ) -> AuthResult<()> {
        let updated = self
            .repo
            .replace_credentials(id, access_ciphertext, refresh_ciphertext)
            .await
            .map_err(AuthError::Internal)?;

        if !updated {
            return Err(AuthError::InvalidOrExpiredSession);
        }

        self.evict(id).await;
        Ok(())
    }

    /// Delete a session from both tiers
    pub async fn invalidate(&self, id: &str) -> AuthResult<ClearSessionCookie> {
        self.repo.delete(id).await.map_err(AuthError::Internal)?;
        self.evict(id).await;
        Ok(ClearSessionCookie)
    }

    /// Delete every expired session from the durable store
    pub async fn sweep_expired(&self) -> AuthResult<u64> {
        let now = chrono::Utc::now().timestamp();
        let removed = self.repo.delete_expired(now).await.map_err(AuthError::Internal)?;
        if removed > 0 {
            tracing::info!(removed, "Swept expired sessions");
        }
        Ok(removed)
    }

    async fn evict(&self, id: &str) {
        if let Err(e) = self.cache.delete(&keys::session(id)).await {
            tracing::warn!(error = %format!("{:#}", e), "Session cache eviction failed");
        }
    }

    /// Write `session` back to the cache in the background
    ///
    /// The fill can land after an `invalidate` or `replace` that ran since the
    /// durable read. It re-reads the durable record once the entry is written
    /// and drops the entry unless the record is unchanged.
    fn repopulate_cache(&self, cache_key: String, session: &Session, now: i64) {
        let ttl = self.cache_ttl.min(Duration::from_secs(session.remaining_secs(now)));
        if ttl.is_zero() {
            return;
        }

        let cache = self.cache.clone();
        let repo = self.repo.clone();
        let entry = CachedSessionEntry::from(session);
        let expected = session.clone();
        self.detached.spawn("session_cache_fill", async move {
            cache.set(&cache_key, &entry, ttl).await?;

            let current = repo.get_by_id(&expected.id).await?;
            if current.as_ref() != Some(&expected) {
                tracing::debug!(user_id = %expected.user_id, "Session changed during cache fill, evicting");
                cache.delete(&cache_key).await?;
            }
            Ok(())
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::SqlxSessionRepository;
    use crate::db::{create_test_pool, migrations::run_migrations};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Repository wrapper that counts durable reads
    pub(crate) struct CountingRepo {
        inner: Arc<dyn SessionRepository>,
        pub reads: AtomicUsize,
    }

    #[async_trait]
    impl SessionRepository for CountingRepo {
        async fn create(&self, session: &Session) -> anyhow::Result<()> {
            self.inner.create(session).await
        }

        async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<Session>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_by_id(id).await
        }

        async fn replace_credentials(
            &self,
            id: &str,
            access_ciphertext: &str,
            refresh_ciphertext: Option<&str>,
        ) -> anyhow::Result<bool> {
            self.inner.replace_credentials(id, access_ciphertext, refresh_ciphertext).await
        }

        async fn delete(&self, id: &str) -> anyhow::Result<()> {
            self.inner.delete(id).await
        }

        async fn delete_expired(&self, now: i64) -> anyhow::Result<u64> {
            self.inner.delete_expired(now).await
        }
    }

    pub(crate) async fn counting_repo() -> Arc<CountingRepo> {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        Arc::new(CountingRepo {
            inner: SqlxSessionRepository::boxed(pool),
            reads: AtomicUsize::new(0),
        })
    }

    pub(crate) fn memory_cache() -> Arc<Cache> {
        Arc::new(Cache::Memory(MemoryCache::new()))
    }

    /// Poll until the detached cache fill for `id` has landed
    pub(crate) async fn wait_for_cached_session(cache: &Cache, id: &str) -> bool {
        for _ in 0..100 {
            if let Ok(Some(_)) = cache.get::<CachedSessionEntry>(&keys::session(id)).await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    /// Poll until `repo` has served `n` durable reads
    async fn wait_for_reads(repo: &CountingRepo, n: usize) -> bool {
        for _ in 0..100 {
            if repo.reads.load(Ordering::SeqCst) >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    async fn wait_for_evicted(cache: &Cache, id: &str) -> bool {
        for _ in 0..100 {
            if let Ok(None) = cache.get::<CachedSessionEntry>(&keys::session(id)).await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    async fn setup() -> (Arc<CountingRepo>, Arc<Cache>, SessionStore) {
        let repo = counting_repo().await;
        let cache = memory_cache();
        let store = SessionStore::new(repo.clone(), cache.clone(), Duration::from_secs(300));
        (repo, cache, store)
    }

    const DAY: Duration = Duration::from_secs(86_400);

    #[tokio::test]
    async fn test_create_returns_hex_id() {
        let (_repo, _cache, store) = setup().await;
        let id = store.create("42", "ct-a".to_string(), None, DAY).await.unwrap();

        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn test_lookup_unknown_is_absent() {
        let (_repo, _cache, store) = setup().await;
        assert!(store.lookup("0000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_aside_second_lookup_skips_store() {
        let (repo, cache, store) = setup().await;
        let id = store
            .create("42", "ct-a".to_string(), Some("ct-r".to_string()), DAY)
            .await
            .unwrap();

        let first = store.lookup(&id).await.unwrap().unwrap();
        assert_eq!(first.user_id, "42");

        // lookup read plus the fill's confirming read
        assert!(wait_for_cached_session(&cache, &id).await);
        assert!(wait_for_reads(&repo, 2).await);

        let second = store.lookup(&id).await.unwrap().unwrap();
        assert_eq!(second, first);
        assert_eq!(repo.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_in_store_is_absent() {
        let (repo, cache, store) = setup().await;
        let session = Session {
            id: "e".repeat(32),
            user_id: "42".to_string(),
            access_ciphertext: "ct".to_string(),
            refresh_ciphertext: None,
            expires_at: chrono::Utc::now().timestamp() - 1,
        };
        repo.create(&session).await.unwrap();

        assert!(store.lookup(&session.id).await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let cached: Option<CachedSessionEntry> = cache.get(&keys::session(&session.id)).await.unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_expired_in_cache_is_absent() {
        let (repo, cache, store) = setup().await;
        let id = "c".repeat(32);
        let entry = CachedSessionEntry {
            user_id: "42".to_string(),
            access_ciphertext: "ct".to_string(),
            refresh_ciphertext: None,
            expires_at: chrono::Utc::now().timestamp(),
        };
        cache.set(&keys::session(&id), &entry, Duration::from_secs(60)).await.unwrap();

        assert!(store.lookup(&id).await.unwrap().is_none());
        assert_eq!(repo.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_ttl_bounded_by_remaining_lifetime() {
        let (_repo, cache, store) = setup().await;
        let id = store
            .create("42", "ct".to_string(), None, Duration::from_secs(2))
            .await
            .unwrap();

        store.lookup(&id).await.unwrap().unwrap();
        assert!(wait_for_cached_session(&cache, &id).await);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        let cached: Option<CachedSessionEntry> = cache.get(&keys::session(&id)).await.unwrap();
        assert!(cached.is_none());
        assert!(store.lookup(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_updates_pair_and_evicts_cache() {
        let (_repo, cache, store) = setup().await;
        let id = store
            .create("42", "ct-a".to_string(), Some("ct-r".to_string()), DAY)
            .await
            .unwrap();
        store.lookup(&id).await.unwrap();
        assert!(wait_for_cached_session(&cache, &id).await);

        store.replace(&id, "ct-a2", Some("ct-r2")).await.unwrap();

        let cached: Option<CachedSessionEntry> = cache.get(&keys::session(&id)).await.unwrap();
        assert!(cached.is_none());

        let session = store.lookup(&id).await.unwrap().unwrap();
        assert_eq!(session.access_ciphertext, "ct-a2");
        assert_eq!(session.refresh_ciphertext.as_deref(), Some("ct-r2"));
    }

    #[tokio::test]
    async fn test_reload_bypasses_cache() {
        let (repo, cache, store) = setup().await;
        let id = store.create("42", "ct-a".to_string(), None, DAY).await.unwrap();
        store.lookup(&id).await.unwrap();
        assert!(wait_for_cached_session(&cache, &id).await);
        assert!(wait_for_reads(&repo, 2).await);

        repo.replace_credentials(&id, "ct-b", None).await.unwrap();

        assert_eq!(store.lookup(&id).await.unwrap().unwrap().access_ciphertext, "ct-a");
        assert_eq!(store.reload(&id).await.unwrap().unwrap().access_ciphertext, "ct-b");
    }

    #[tokio::test]
    async fn test_replace_missing_session() {
        let (_repo, _cache, store) = setup().await;
        let result = store.replace("gone", "a", None).await;
        assert!(matches!(result, Err(AuthError::InvalidOrExpiredSession)));
    }

    #[tokio::test]
    async fn test_invalidate_removes_both_tiers() {
        let (_repo, cache, store) = setup().await;
        let id = store.create("42", "ct".to_string(), None, DAY).await.unwrap();
        store.lookup(&id).await.unwrap();
        assert!(wait_for_cached_session(&cache, &id).await);

        let directive = store.invalidate(&id).await.unwrap();
        assert_eq!(directive, ClearSessionCookie);

        assert!(store.lookup(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_late_cache_fill_after_invalidate_is_dropped() {
        let (repo, cache, store) = setup().await;
        let id = store.create("42", "ct".to_string(), None, DAY).await.unwrap();
        let session = repo.get_by_id(&id).await.unwrap().unwrap();

        store.invalidate(&id).await.unwrap();
        store.repopulate_cache(keys::session(&id), &session, chrono::Utc::now().timestamp());

        assert!(wait_for_reads(&repo, 2).await);
        assert!(wait_for_evicted(&cache, &id).await);
        assert!(store.lookup(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_late_cache_fill_after_replace_is_dropped() {
        let (repo, cache, store) = setup().await;
        let id = store
            .create("42", "ct-a".to_string(), Some("ct-r".to_string()), DAY)
            .await
            .unwrap();
        let stale = repo.get_by_id(&id).await.unwrap().unwrap();

        store.replace(&id, "ct-a2", Some("ct-r2")).await.unwrap();
        store.repopulate_cache(keys::session(&id), &stale, chrono::Utc::now().timestamp());

        assert!(wait_for_reads(&repo, 2).await);
        assert!(wait_for_evicted(&cache, &id).await);
        let session = store.lookup(&id).await.unwrap().unwrap();
        assert_eq!(session.access_ciphertext, "ct-a2");
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let (repo, _cache, store) = setup().await;
        let now = chrono::Utc::now().timestamp();
        for (i, expires_at) in [now - 10, now - 1, now + 3600].into_iter().enumerate() {
            repo.create(&Session {
                id: format!("{:032}", i),
                user_id: "42".to_string(),
                access_ciphertext: "ct".to_string(),
                refresh_ciphertext: None,
                expires_at,
            })
            .await
            .unwrap();
        }

        assert_eq!(store.sweep_expired().await.unwrap(), 2);
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
    }
}
