//! API layer - HTTP handlers and routing
//!
//! This module contains all HTTP endpoints of the auth service:
//! - Sign-in callback and logout
//! - Current user and administered guilds
//! - Guild access checks
//! - Admin panel presence (master admins only)
//! - Internal maintenance endpoints (shared secret)

pub mod admin;
pub mod auth;
pub mod guilds;
pub mod internal;
pub mod middleware;
pub mod users;

use axum::{
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    routing::get,
    Json, Router,
};
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState, CookiePolicy};

/// Build the `/api` router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need a master admin)
    let admin_routes = Router::new()
        .nest("/admin", admin::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_master_admin,
        ))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Protected routes (need a session)
    let protected_routes = Router::new()
        .nest("/users", users::router())
        .nest("/guilds", guilds::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Machine-to-machine routes
    let internal_routes = Router::new()
        .nest("/internal", internal::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_internal_secret,
        ));

    Router::new()
        .nest("/auth", auth::router())
        .merge(admin_routes)
        .merge(protected_routes)
        .merge(internal_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", build_api_router(state.clone()))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::apply_session_cookie,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Liveness plus a database ping
async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.pool.ping().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "unavailable" })),
            )
        }
    }
}
