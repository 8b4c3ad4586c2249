//! Configuration management
//!
//! This module handles loading and parsing configuration for the auth gateway.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults. Secrets (the
//! credential encryption key, the Discord client secret and the internal
//! service secret) have no usable default and are checked by [`Config::validate`].

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Session and credential settings
    #[serde(default)]
    pub auth: AuthConfig,
    /// Discord OAuth application
    #[serde(default)]
    pub discord: DiscordConfig,
    /// Operator allowlists and the internal service secret
    #[serde(default)]
    pub access: AccessConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public origin used to build the OAuth redirect URI
    #[serde(default = "default_public_origin")]
    pub public_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_origin: default_public_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8788
}

fn default_public_origin() -> String {
    "http://127.0.0.1:8788".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/codex.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache driver (memory or redis)
    #[serde(default)]
    pub driver: CacheDriver,
    /// Redis connection URL (optional)
    #[serde(default)]
    pub redis_url: Option<String>,
}

/// Cache driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheDriver {
    /// In-memory cache (default)
    #[default]
    Memory,
    /// Redis cache
    Redis,
}

/// Session and credential configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Url-safe base64 master key for the credential cipher
    #[serde(default)]
    pub encryption_key: String,
    /// Lifetime of a durable session
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    /// TTL of the denormalized session copy in the fast cache
    #[serde(default = "default_session_cache_ttl")]
    pub session_cache_ttl_seconds: u64,
    /// TTL of cached guild permission snapshots
    #[serde(default = "default_permission_cache_ttl")]
    pub permission_cache_ttl_seconds: u64,
    /// Interval of the expired-session sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Emit the `Secure` attribute on the session cookie
    #[serde(default = "default_cookie_secure")]
    pub cookie_secure: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            encryption_key: String::new(),
            session_ttl_seconds: default_session_ttl(),
            session_cache_ttl_seconds: default_session_cache_ttl(),
            permission_cache_ttl_seconds: default_permission_cache_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
            cookie_secure: default_cookie_secure(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("encryption_key", &"<redacted>")
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("session_cache_ttl_seconds", &self.session_cache_ttl_seconds)
            .field("permission_cache_ttl_seconds", &self.permission_cache_ttl_seconds)
            .field("sweep_interval_seconds", &self.sweep_interval_seconds)
            .field("cookie_secure", &self.cookie_secure)
            .finish()
    }
}

fn default_session_ttl() -> u64 {
    90 * 24 * 60 * 60 // 90 days
}

fn default_session_cache_ttl() -> u64 {
    300
}

fn default_permission_cache_ttl() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_cookie_secure() -> bool {
    true
}

/// Discord OAuth application configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// OAuth client id
    #[serde(default)]
    pub client_id: String,
    /// OAuth client secret
    #[serde(default)]
    pub client_secret: String,
    /// API base URL (overridable for tests and proxies)
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Callback path appended to the public origin
    #[serde(default = "default_redirect_path")]
    pub redirect_path: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            api_base: default_api_base(),
            redirect_path: default_redirect_path(),
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("redirect_path", &self.redirect_path)
            .finish()
    }
}

fn default_api_base() -> String {
    "https://discord.com/api".to_string()
}

fn default_redirect_path() -> String {
    "/api/auth/callback".to_string()
}

/// Operator allowlists and machine-to-machine secret
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Users granted extended access to every guild
    #[serde(default)]
    pub master_admin_ids: Vec<String>,
    /// Users allowed to edit the shared event calendar
    #[serde(default)]
    pub calendar_admin_ids: Vec<String>,
    /// Single user flagged as master and calendar admin and shown every active guild
    #[serde(default)]
    pub master_override_id: Option<String>,
    /// Shared secret expected in `X-Internal-Secret`
    #[serde(default)]
    pub internal_secret: String,
}

impl std::fmt::Debug for AccessConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessConfig")
            .field("master_admin_ids", &self.master_admin_ids)
            .field("calendar_admin_ids", &self.calendar_admin_ids)
            .field("master_override_id", &self.master_override_id)
            .field("internal_secret", &"<redacted>")
            .finish()
    }
}

impl AccessConfig {
    /// Whether `user_id` is on the master operator allowlist
    ///
    /// Gates extended guild access and the admin routes. The override user
    /// is not included.
    pub fn is_master_admin(&self, user_id: &str) -> bool {
        self.master_admin_ids.iter().any(|id| id == user_id)
    }

    /// Master admin flag reported to the dashboard, override included
    pub fn shows_master_admin(&self, user_id: &str) -> bool {
        self.is_master_override(user_id) || self.is_master_admin(user_id)
    }

    /// Whether `user_id` may manage the shared calendar
    pub fn is_calendar_admin(&self, user_id: &str) -> bool {
        self.is_master_override(user_id) || self.calendar_admin_ids.iter().any(|id| id == user_id)
    }

    /// Whether `user_id` is the configured master override user
    pub fn is_master_override(&self, user_id: &str) -> bool {
        self.master_override_id.as_deref() == Some(user_id)
    }
}

/// Parse a comma-separated id list, trimming whitespace and dropping empties
pub fn parse_id_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect()
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern `CODEX_<SECTION>_<KEY>`:
    /// - CODEX_SERVER_HOST, CODEX_SERVER_PORT, CODEX_SERVER_PUBLIC_ORIGIN
    /// - CODEX_DATABASE_DRIVER, CODEX_DATABASE_URL
    /// - CODEX_CACHE_DRIVER, CODEX_CACHE_REDIS_URL
    /// - CODEX_AUTH_ENCRYPTION_KEY, CODEX_AUTH_SESSION_TTL_SECONDS, ...
    /// - CODEX_DISCORD_CLIENT_ID, CODEX_DISCORD_CLIENT_SECRET, CODEX_DISCORD_API_BASE
    /// - CODEX_ACCESS_MASTER_ADMIN_IDS, CODEX_ACCESS_CALENDAR_ADMIN_IDS (comma-separated)
    /// - CODEX_ACCESS_MASTER_OVERRIDE_ID, CODEX_ACCESS_INTERNAL_SECRET
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.encryption_key.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.encryption_key must be set".to_string(),
            ));
        }
        if self.access.internal_secret.is_empty() {
            return Err(ConfigError::ValidationError(
                "access.internal_secret must be set".to_string(),
            ));
        }
        if self.auth.session_ttl_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "auth.session_ttl_seconds must be positive".to_string(),
            ));
        }
        if self.auth.session_cache_ttl_seconds > self.auth.session_ttl_seconds {
            return Err(ConfigError::ValidationError(format!(
                "auth.session_cache_ttl_seconds ({}) exceeds auth.session_ttl_seconds ({})",
                self.auth.session_cache_ttl_seconds, self.auth.session_ttl_seconds
            )));
        }
        if self.cache.driver == CacheDriver::Redis && self.cache.redis_url.is_none() {
            return Err(ConfigError::ValidationError(
                "cache.redis_url is required when cache.driver is redis".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // Server configuration
        if let Ok(host) = std::env::var("CODEX_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("CODEX_SERVER_PORT") {
            self.server.port = port;
        }
        if let Ok(origin) = std::env::var("CODEX_SERVER_PUBLIC_ORIGIN") {
            self.server.public_origin = origin;
        }

        // Database configuration
        if let Ok(driver) = std::env::var("CODEX_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("CODEX_DATABASE_URL") {
            self.database.url = url;
        }

        // Cache configuration
        if let Ok(driver) = std::env::var("CODEX_CACHE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "memory" => self.cache.driver = CacheDriver::Memory,
                "redis" => self.cache.driver = CacheDriver::Redis,
                _ => {}
            }
        }
        if let Ok(redis_url) = std::env::var("CODEX_CACHE_REDIS_URL") {
            self.cache.redis_url = Some(redis_url);
        }

        // Auth configuration
        if let Ok(key) = std::env::var("CODEX_AUTH_ENCRYPTION_KEY") {
            self.auth.encryption_key = key;
        }
        if let Some(ttl) = env_parse::<u64>("CODEX_AUTH_SESSION_TTL_SECONDS") {
            self.auth.session_ttl_seconds = ttl;
        }
        if let Some(ttl) = env_parse::<u64>("CODEX_AUTH_SESSION_CACHE_TTL_SECONDS") {
            self.auth.session_cache_ttl_seconds = ttl;
        }
        if let Some(ttl) = env_parse::<u64>("CODEX_AUTH_PERMISSION_CACHE_TTL_SECONDS") {
            self.auth.permission_cache_ttl_seconds = ttl;
        }
        if let Some(interval) = env_parse::<u64>("CODEX_AUTH_SWEEP_INTERVAL_SECONDS") {
            self.auth.sweep_interval_seconds = interval;
        }
        if let Some(secure) = env_parse::<bool>("CODEX_AUTH_COOKIE_SECURE") {
            self.auth.cookie_secure = secure;
        }

        // Discord configuration
        if let Ok(client_id) = std::env::var("CODEX_DISCORD_CLIENT_ID") {
            self.discord.client_id = client_id;
        }
        if let Ok(client_secret) = std::env::var("CODEX_DISCORD_CLIENT_SECRET") {
            self.discord.client_secret = client_secret;
        }
        if let Ok(api_base) = std::env::var("CODEX_DISCORD_API_BASE") {
            self.discord.api_base = api_base;
        }

        // Access configuration
        if let Ok(ids) = std::env::var("CODEX_ACCESS_MASTER_ADMIN_IDS") {
            self.access.master_admin_ids = parse_id_list(&ids);
        }
        if let Ok(ids) = std::env::var("CODEX_ACCESS_CALENDAR_ADMIN_IDS") {
            self.access.calendar_admin_ids = parse_id_list(&ids);
        }
        if let Ok(id) = std::env::var("CODEX_ACCESS_MASTER_OVERRIDE_ID") {
            let id = id.trim().to_string();
            self.access.master_override_id = (!id.is_empty()).then_some(id);
        }
        if let Ok(secret) = std::env::var("CODEX_ACCESS_INTERNAL_SECRET") {
            self.access.internal_secret = secret;
        }
    }
}

/// Read and parse an environment variable, ignoring invalid values
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
