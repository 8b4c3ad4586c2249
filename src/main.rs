//! codex-auth - Session and guild authorization service

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codex_auth::{
    api::{self, AppState, CookiePolicy},
    cache::create_cache,
    config::Config,
    crypto::FernetCipher,
    db::{
        self,
        repositories::{SqlxGuildAccessRepository, SqlxSessionRepository},
    },
    services::{Authenticator, DiscordClient, PermissionVerifier, SessionStore, TokenRefresher},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codex_auth=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting codex-auth...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    config.validate()?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Initialize cache
    let cache = create_cache(&config.cache).await?;
    tracing::info!("Cache initialized: {:?}", config.cache.driver);

    let cipher = Arc::new(
        FernetCipher::new(&config.auth.encryption_key).context("Invalid auth.encryption_key")?,
    );
    let upstream = Arc::new(DiscordClient::new(&config.discord)?);

    // Initialize services
    let sessions = Arc::new(SessionStore::new(
        SqlxSessionRepository::boxed(pool.clone()),
        cache.clone(),
        Duration::from_secs(config.auth.session_cache_ttl_seconds),
    ));
    let refresher = Arc::new(TokenRefresher::new(
        upstream.clone(),
        sessions.clone(),
        cipher.clone(),
        cache.clone(),
    ));
    let permissions = Arc::new(PermissionVerifier::new(
        refresher.clone(),
        SqlxGuildAccessRepository::boxed(pool.clone()),
        cache.clone(),
        config.access.clone(),
        Duration::from_secs(config.auth.permission_cache_ttl_seconds),
    ));
    let authenticator = Arc::new(Authenticator::new(
        sessions.clone(),
        cipher,
        upstream,
        Duration::from_secs(config.auth.session_ttl_seconds),
    ));

    let state = AppState {
        pool: pool.clone(),
        cache,
        sessions: sessions.clone(),
        authenticator,
        refresher,
        permissions,
        access: Arc::new(config.access.clone()),
        cookies: CookiePolicy {
            max_age_secs: config.auth.session_ttl_seconds,
            secure: config.auth.cookie_secure,
        },
        redirect_uri: format!(
            "{}{}",
            config.server.public_origin.trim_end_matches('/'),
            config.discord.redirect_path
        ),
    };

    // Start expired session sweep task
    {
        let sessions = sessions.clone();
        let period = Duration::from_secs(config.auth.sweep_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = sessions.sweep_expired().await {
                    tracing::warn!(error = %e, "Expired session sweep failed");
                }
            }
        });
    }

    // Build router
    let app = api::build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
