//! Guild access override repository
//!
//! Read access to the two override tables maintained by the bot:
//! `guild_authorizations` (a subscriber authorized the guild) and
//! `guild_bypass` (the guild was granted access directly).

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{AuthorizationRecord, BypassRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Guild access repository trait
#[async_trait]
pub trait GuildAccessRepository: Send + Sync {
    /// Authorization record for `guild_id`, active or not
    async fn find_authorization(&self, guild_id: &str) -> Result<Option<AuthorizationRecord>>;

    /// Bypass record for `guild_id`
    async fn find_bypass(&self, guild_id: &str) -> Result<Option<BypassRecord>>;

    /// Guilds with an active authorization or a bypass, deduplicated and sorted
    async fn list_active_guild_ids(&self) -> Result<Vec<String>>;
}

/// SQLx-based guild access repository implementation
pub struct SqlxGuildAccessRepository {
    pool: DynDatabasePool,
}

impl SqlxGuildAccessRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn GuildAccessRepository> {
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
impl GuildAccessRepository for SqlxGuildAccessRepository {
    async fn find_authorization(&self, guild_id: &str) -> Result<Option<AuthorizationRecord>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => find_authorization_sqlite(self.sqlite()?, guild_id).await,
            DatabaseDriver::Mysql => find_authorization_mysql(self.mysql()?, guild_id).await,
        }
    }

    async fn find_bypass(&self, guild_id: &str) -> Result<Option<BypassRecord>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => find_bypass_sqlite(self.sqlite()?, guild_id).await,
            DatabaseDriver::Mysql => find_bypass_mysql(self.mysql()?, guild_id).await,
        }
    }

    async fn list_active_guild_ids(&self) -> Result<Vec<String>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_active_guild_ids_sqlite(self.sqlite()?).await,
            DatabaseDriver::Mysql => list_active_guild_ids_mysql(self.mysql()?).await,
        }
    }
}

const ACTIVE_GUILDS_SQLITE: &str = r#"
    SELECT CAST(guild_id AS TEXT) AS guild_id FROM guild_authorizations WHERE is_active = 1
    UNION
    SELECT CAST(guild_id AS TEXT) AS guild_id FROM guild_bypass
    ORDER BY guild_id
"#;

const ACTIVE_GUILDS_MYSQL: &str = r#"
    SELECT CAST(guild_id AS CHAR) AS guild_id FROM guild_authorizations WHERE is_active = 1
    UNION
    SELECT CAST(guild_id AS CHAR) AS guild_id FROM guild_bypass
    ORDER BY guild_id
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn find_authorization_sqlite(pool: &SqlitePool, guild_id: &str) -> Result<Option<AuthorizationRecord>> {
    let row = sqlx::query(
        r#"
        SELECT CAST(guild_id AS TEXT) AS guild_id,
               CAST(authorized_by_discord_user_id AS TEXT) AS authorized_by,
               is_active
        FROM guild_authorizations
        WHERE guild_id = ?
        "#,
    )
    .bind(guild_id)
    .fetch_optional(pool)
    .await
    .context("Failed to get guild authorization")?;

    match row {
        Some(row) => Ok(Some(AuthorizationRecord {
            guild_id: row.try_get("guild_id")?,
            authorized_by: row.try_get("authorized_by")?,
            is_active: row.try_get::<i64, _>("is_active")? != 0,
        })),
        None => Ok(None),
    }
}

async fn find_bypass_sqlite(pool: &SqlitePool, guild_id: &str) -> Result<Option<BypassRecord>> {
    let row = sqlx::query("SELECT CAST(guild_id AS TEXT) AS guild_id FROM guild_bypass WHERE guild_id = ?")
        .bind(guild_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get guild bypass")?;

    match row {
        Some(row) => Ok(Some(BypassRecord {
            guild_id: row.try_get("guild_id")?,
        })),
        None => Ok(None),
    }
}

async fn list_active_guild_ids_sqlite(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query(ACTIVE_GUILDS_SQLITE)
        .fetch_all(pool)
        .await
        .context("Failed to list active guilds")?;

    rows.iter()
        .map(|row| row.try_get::<String, _>("guild_id").map_err(Into::into))
        .collect()
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn find_authorization_mysql(pool: &MySqlPool, guild_id: &str) -> Result<Option<AuthorizationRecord>> {
    let row = sqlx::query(
        r#"
        SELECT CAST(guild_id AS CHAR) AS guild_id,
               CAST(authorized_by_discord_user_id AS CHAR) AS authorized_by,
               is_active
        FROM guild_authorizations
        WHERE guild_id = ?
        "#,
    )
    .bind(guild_id)
    .fetch_optional(pool)
    .await
    .context("Failed to get guild authorization")?;

    match row {
        Some(row) => Ok(Some(AuthorizationRecord {
            guild_id: row.try_get("guild_id")?,
            authorized_by: row.try_get("authorized_by")?,
            is_active: row.try_get::<i8, _>("is_active")? != 0,
        })),
        None => Ok(None),
    }
}

async fn find_bypass_mysql(pool: &MySqlPool, guild_id: &str) -> Result<Option<BypassRecord>> {
    let row = sqlx::query("SELECT CAST(guild_id AS CHAR) AS guild_id FROM guild_bypass WHERE guild_id = ?")
        .bind(guild_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get guild bypass")?;

    match row {
        Some(row) => Ok(Some(BypassRecord {
            guild_id: row.try_get("guild_id")?,
        })),
        None => Ok(None),
    }
}

async fn list_active_guild_ids_mysql(pool: &MySqlPool) -> Result<Vec<String>> {
    let rows = sqlx::query(ACTIVE_GUILDS_MYSQL)
        .fetch_all(pool)
        .await
        .context("Failed to list active guilds")?;

    rows.iter()
        .map(|row| row.try_get::<String, _>("guild_id").map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations::run_migrations};

    async fn setup() -> (DynDatabasePool, SqlxGuildAccessRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        (pool.clone(), SqlxGuildAccessRepository::new(pool))
    }

    #[tokio::test]
    async fn test_find_authorization() {
        let (pool, repo) = setup().await;
        pool.execute(
            "INSERT INTO guild_authorizations (guild_id, authorized_by_discord_user_id, is_active) VALUES ('100', '7', 0)",
        )
        .await
        .unwrap();

        let record = repo.find_authorization("100").await.unwrap().unwrap();
        assert_eq!(record.authorized_by, "7");
        assert!(!record.is_active);

        assert!(repo.find_authorization("200").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_bypass() {
        let (pool, repo) = setup().await;
        pool.execute("INSERT INTO guild_bypass (guild_id) VALUES ('300')").await.unwrap();

        assert_eq!(
            repo.find_bypass("300").await.unwrap(),
            Some(BypassRecord { guild_id: "300".to_string() })
        );
        assert!(repo.find_bypass("100").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_active_guild_ids() {
        let (pool, repo) = setup().await;
        pool.execute(
            "INSERT INTO guild_authorizations (guild_id, authorized_by_discord_user_id, is_active) VALUES ('1', 'u', 1), ('2', 'u', 0), ('3', 'u', 1)",
        )
        .await
        .unwrap();
        pool.execute("INSERT INTO guild_bypass (guild_id) VALUES ('3'), ('4')").await.unwrap();

        let ids = repo.list_active_guild_ids().await.unwrap();
        assert_eq!(ids, vec!["1", "3", "4"]);
    }
}
