//! Admin panel endpoints
//!
//! Routes here require a session and a master admin.
//! - POST /api/admin/heartbeat - Presence ping, returns admins seen in the last minute

use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::api::middleware::{ApiError, AppState};
use crate::cache::{keys, CacheLayer};
use crate::models::AuthenticatedUser;
use crate::services::Detached;

/// How long an admin counts as online after their last heartbeat
const PRESENCE_WINDOW_MS: i64 = 60_000;

/// Optional display hints sent with a heartbeat
#[derive(Debug, Default, Deserialize)]
pub struct HeartbeatRequest {
    pub username: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineAdmin {
    pub id: String,
    pub username: String,
    pub avatar: Option<String>,
    /// Unix milliseconds
    pub last_seen: i64,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub online_count: usize,
    pub users: Vec<OnlineAdmin>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/heartbeat", post(heartbeat))
}

async fn heartbeat(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    body: Bytes,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let hints: HeartbeatRequest = serde_json::from_slice(&body).unwrap_or_default();
    let now = chrono::Utc::now().timestamp_millis();

    let mut online = match state.cache.get::<HashMap<String, OnlineAdmin>>(keys::ONLINE_ADMINS).await {
        Ok(map) => map.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "Presence cache read failed");
            HashMap::new()
        }
    };

    online.insert(
        user.id.clone(),
        OnlineAdmin {
            id: user.id.clone(),
            username: hints.username.unwrap_or_else(|| "Admin".to_string()),
            avatar: hints.avatar,
            last_seen: now,
        },
    );
    online.retain(|_, admin| now - admin.last_seen < PRESENCE_WINDOW_MS);

    let mut users: Vec<OnlineAdmin> = online.values().cloned().collect();
    users.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));

    let cache = state.cache.clone();
    Detached.spawn("presence_cache_write", async move {
        cache
            .set(keys::ONLINE_ADMINS, &online, Duration::from_millis(PRESENCE_WINDOW_MS as u64))
            .await
    });

    Ok(Json(HeartbeatResponse {
        online_count: users.len(),
        users,
    }))
}
