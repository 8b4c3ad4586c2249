//! Session repository
//!
//! Durable storage for user sessions in `user_sessions`.
//!
//! This module provides:
//! - `SessionRepository` trait defining the interface for session data access
//! - `SqlxSessionRepository` implementing the trait for SQLite and MySQL
//!
//! Ciphertext columns are opaque here; nothing in this layer decrypts.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new session
    async fn create(&self, session: &Session) -> Result<()>;

    /// Get session by ID, expired or not
    async fn get_by_id(&self, id: &str) -> Result<Option<Session>>;

    /// Overwrite both ciphertexts in one statement; false if the session is gone
    async fn replace_credentials(
        &self,
        id: &str,
        access_ciphertext: &str,
        refresh_ciphertext: Option<&str>,
    ) -> Result<bool>;

    /// Delete a session
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete sessions whose expiry is at or before `now`; returns the count removed
    async fn delete_expired(&self, now: i64) -> Result<u64>;
}

/// SQLx-based session repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    /// Create a new SQLx session repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }

    fn sqlite(&self) -> Result<&SqlitePool> {
        self.pool.as_sqlite().context("SQLite driver without SQLite pool")
    }

    fn mysql(&self) -> Result<&MySqlPool> {
        self.pool.as_mysql().context("MySQL driver without MySQL pool")
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_session_sqlite(self.sqlite()?, session).await,
            DatabaseDriver::Mysql => create_session_mysql(self.mysql()?, session).await,
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_session_by_id_sqlite(self.sqlite()?, id).await,
            DatabaseDriver::Mysql => get_session_by_id_mysql(self.mysql()?, id).await,
        }
    }

    async fn replace_credentials(
        &self,
        id: &str,
        access_ciphertext: &str,
        refresh_ciphertext: Option<&str>,
    ) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                replace_credentials_sqlite(self.sqlite()?, id, access_ciphertext, refresh_ciphertext).await
            }
            DatabaseDriver::Mysql => {
                replace_credentials_mysql(self.mysql()?, id, access_ciphertext, refresh_ciphertext).await
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_session_sqlite(self.sqlite()?, id).await,
            DatabaseDriver::Mysql => delete_session_mysql(self.mysql()?, id).await,
        }
    }

    async fn delete_expired(&self, now: i64) -> Result<u64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_expired_sessions_sqlite(self.sqlite()?, now).await,
            DatabaseDriver::Mysql => delete_expired_sessions_mysql(self.mysql()?, now).await,
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_session_sqlite(pool: &SqlitePool, session: &Session) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO user_sessions (session_token, user_id, discord_access_token, discord_refresh_token, expiry_date)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.id)
    .bind(&session.user_id)
    .bind(&session.access_ciphertext)
    .bind(&session.refresh_ciphertext)
    .bind(session.expires_at)
    .execute(pool)
    .await
    .context("Failed to create session")?;

    Ok(())
}

async fn get_session_by_id_sqlite(pool: &SqlitePool, id: &str) -> Result<Option<Session>> {
    // Rows written by older deployments may hold fractional expiry seconds
    let row = sqlx::query(
        r#"
        SELECT session_token, user_id, discord_access_token, discord_refresh_token,
               CAST(expiry_date AS INTEGER) AS expiry_date
        FROM user_sessions
        WHERE session_token = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get session by ID")?;

    row.map(|row| row_to_session_sqlite(&row)).transpose()
}

async fn replace_credentials_sqlite(
    pool: &SqlitePool,
    id: &str,
    access_ciphertext: &str,
    refresh_ciphertext: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE user_sessions SET discord_access_token = ?, discord_refresh_token = ? WHERE session_token = ?",
    )
    .bind(access_ciphertext)
    .bind(refresh_ciphertext)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to replace session credentials")?;

    Ok(result.rows_affected() > 0)
}

async fn delete_session_sqlite(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM user_sessions WHERE session_token = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete session")?;

    Ok(())
}

async fn delete_expired_sessions_sqlite(pool: &SqlitePool, now: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM user_sessions WHERE expiry_date <= ?")
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected())
}

fn row_to_session_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("session_token")?,
        user_id: row.try_get("user_id")?,
        access_ciphertext: row.try_get("discord_access_token")?,
        refresh_ciphertext: row.try_get("discord_refresh_token")?,
        expires_at: row.try_get("expiry_date")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_session_mysql(pool: &MySqlPool, session: &Session) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO user_sessions (session_token, user_id, discord_access_token, discord_refresh_token, expiry_date)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.id)
    .bind(&session.user_id)
    .bind(&session.access_ciphertext)
    .bind(&session.refresh_ciphertext)
    .bind(session.expires_at)
    .execute(pool)
    .await
    .context("Failed to create session")?;

    Ok(())
}

async fn get_session_by_id_mysql(pool: &MySqlPool, id: &str) -> Result<Option<Session>> {
    let row = sqlx::query(
        r#"
        SELECT session_token, user_id, discord_access_token, discord_refresh_token, expiry_date
        FROM user_sessions
        WHERE session_token = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get session by ID")?;

    row.map(|row| row_to_session_mysql(&row)).transpose()
}

async fn replace_credentials_mysql(
    pool: &MySqlPool,
    id: &str,
    access_ciphertext: &str,
    refresh_ciphertext: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE user_sessions SET discord_access_token = ?, discord_refresh_token = ? WHERE session_token = ?",
    )
    .bind(access_ciphertext)
    .bind(refresh_ciphertext)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to replace session credentials")?;

    Ok(result.rows_affected() > 0)
}

async fn delete_session_mysql(pool: &MySqlPool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM user_sessions WHERE session_token = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete session")?;

    Ok(())
}

async fn delete_expired_sessions_mysql(pool: &MySqlPool, now: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM user_sessions WHERE expiry_date <= ?")
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected())
}

fn row_to_session_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("session_token")?,
        user_id: row.try_get("user_id")?,
        access_ciphertext: row.try_get("discord_access_token")?,
        refresh_ciphertext: row.try_get("discord_refresh_token")?,
        expires_at: row.try_get("expiry_date")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations::run_migrations};

    async fn setup() -> SqlxSessionRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        SqlxSessionRepository::new(pool)
    }

    fn session(id: &str, expires_at: i64) -> Session {
        Session {
            id: id.to_string(),
            user_id: "80351110224678912".to_string(),
            access_ciphertext: "gAAAAA-access".to_string(),
            refresh_ciphertext: Some("gAAAAA-refresh".to_string()),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = setup().await;
        let s = session("aaaa", 2_000_000_000);

        repo.create(&s).await.unwrap();

        let found = repo.get_by_id("aaaa").await.unwrap();
        assert_eq!(found, Some(s));
        assert_eq!(repo.get_by_id("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_null_refresh_token() {
        let repo = setup().await;
        let mut s = session("bbbb", 2_000_000_000);
        s.refresh_ciphertext = None;

        repo.create(&s).await.unwrap();

        let found = repo.get_by_id("bbbb").await.unwrap().unwrap();
        assert_eq!(found.refresh_ciphertext, None);
    }

    #[tokio::test]
    async fn test_replace_credentials_updates_both_columns() {
        let repo = setup().await;
        repo.create(&session("cccc", 2_000_000_000)).await.unwrap();

        let replaced = repo
            .replace_credentials("cccc", "gAAAAA-access-2", Some("gAAAAA-refresh-2"))
            .await
            .unwrap();
        assert!(replaced);

        let found = repo.get_by_id("cccc").await.unwrap().unwrap();
        assert_eq!(found.access_ciphertext, "gAAAAA-access-2");
        assert_eq!(found.refresh_ciphertext.as_deref(), Some("gAAAAA-refresh-2"));
        assert_eq!(found.expires_at, 2_000_000_000);
    }

    #[tokio::test]
    async fn test_replace_credentials_on_missing_session() {
        let repo = setup().await;
        let replaced = repo.replace_credentials("gone", "a", None).await.unwrap();
        assert!(!replaced);
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = setup().await;
        repo.create(&session("dddd", 2_000_000_000)).await.unwrap();

        repo.delete("dddd").await.unwrap();
        repo.delete("dddd").await.unwrap();

        assert_eq!(repo.get_by_id("dddd").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let repo = setup().await;
        repo.create(&session("old1", 100)).await.unwrap();
        repo.create(&session("old2", 200)).await.unwrap();
        repo.create(&session("live", 300)).await.unwrap();

        let removed = repo.delete_expired(200).await.unwrap();
        assert_eq!(removed, 2);

        assert!(repo.get_by_id("old1").await.unwrap().is_none());
        assert!(repo.get_by_id("live").await.unwrap().is_some());
    }
}
