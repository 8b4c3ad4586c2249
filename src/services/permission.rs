//! Guild permission checks
//!
//! Administration rights come from the user's live guild membership list,
//! fetched through [`TokenRefresher`] and cached per user under
//! `guilds:{user_id}`. Extended access layers the operator allowlist and the
//! two override tables on top of that.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{keys, Cache, CacheLayer};
use crate::config::AccessConfig;
use crate::db::repositories::GuildAccessRepository;
use crate::error::{AuthError, AuthResult};
use crate::models::{AuthenticatedUser, GuildAccess, GuildMembership, GuildPermissionSnapshot, GuildSummary};
use crate::services::background::Detached;
use crate::services::discord::UpstreamRequest;
use crate::services::refresher::TokenRefresher;

const GUILDS_PATH: &str = "/users/@me/guilds";

/// Evaluates guild access for an authenticated user
pub struct PermissionVerifier {
    refresher: Arc<TokenRefresher>,
    overrides: Arc<dyn GuildAccessRepository>,
    cache: Arc<Cache>,
    access: AccessConfig,
    snapshot_ttl: Duration,
    detached: Detached,
}

impl PermissionVerifier {
    pub fn new(
        refresher: Arc<TokenRefresher>,
        overrides: Arc<dyn GuildAccessRepository>,
        cache: Arc<Cache>,
        access: AccessConfig,
        snapshot_ttl: Duration,
    ) -> Self {
        Self {
            refresher,
            overrides,
            cache,
            access,
            snapshot_ttl,
            detached: Detached,
        }
    }

    /// Membership list of `user`, from cache or upstream
    pub async fn guild_snapshot(&self, user: &mut AuthenticatedUser) -> AuthResult<GuildPermissionSnapshot> {
        let cache_key = keys::guilds(&user.id);

        match self.cache.get::<GuildPermissionSnapshot>(&cache_key).await {
            Ok(Some(snapshot)) => return Ok(snapshot),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %format!("{:#}", e), "Permission cache read failed");
            }
        }

        let resp = self
            .refresher
            .call_with_refresh(user, &UpstreamRequest::get(GUILDS_PATH))
            .await?;

        if resp.status >= 500 {
            tracing::warn!(user_id = %user.id, status = resp.status, "Guild list request failed");
            return Err(AuthError::UpstreamUnavailable);
        }

        // A refused listing means no admin rights anywhere; not cached.
        if !resp.is_success() {
            tracing::info!(user_id = %user.id, status = resp.status, "Guild list refused");
            return Ok(GuildPermissionSnapshot {
                user_id: user.id.clone(),
                guilds: Vec::new(),
            });
        }

        let guilds: Vec<GuildMembership> = resp.json().map_err(|e| {
            tracing::warn!(user_id = %user.id, error = %e, "Guild list could not be decoded");
            AuthError::UpstreamUnavailable
        })?;

        let snapshot = GuildPermissionSnapshot {
            user_id: user.id.clone(),
            guilds,
        };

        let cache = self.cache.clone();
        let cached = snapshot.clone();
        let ttl = self.snapshot_ttl;
        self.detached.spawn("guild_cache_fill", async move {
            cache.set(&cache_key, &cached, ttl).await
        });

        Ok(snapshot)
    }

    /// Whether `user` holds ADMINISTRATOR or MANAGE_GUILD in `guild_id`
    pub async fn is_resource_admin(&self, user: &mut AuthenticatedUser, guild_id: &str) -> AuthResult<bool> {
        Ok(self.guild_snapshot(user).await?.is_admin_of(guild_id))
    }

    /// Whether `user` may use the extended features of `guild_id`
    ///
    /// Allowlisted operators always may. Everyone else must administer the
    /// guild, and the guild must be authorized or bypassed.
    pub async fn has_extended_access(&self, user: &mut AuthenticatedUser, guild_id: &str) -> AuthResult<bool> {
        if self.access.is_master_admin(&user.id) {
            return Ok(true);
        }

        if !self.is_resource_admin(user, guild_id).await? {
            return Ok(false);
        }

        self.has_override(guild_id).await
    }

    /// Both decisions for `guild_id` from a single membership fetch
    pub async fn guild_access(&self, user: &mut AuthenticatedUser, guild_id: &str) -> AuthResult<GuildAccess> {
        let is_admin = self.guild_snapshot(user).await?.is_admin_of(guild_id);

        let has_extended_access = if self.access.is_master_admin(&user.id) {
            true
        } else {
            is_admin && self.has_override(guild_id).await?
        };

        Ok(GuildAccess {
            is_admin,
            has_extended_access,
        })
    }

    /// Bot-active guilds the user administers, sorted by name
    ///
    /// The master override user sees every bot-active guild; guilds they are
    /// not a member of are listed as unknown.
    pub async fn administered_guilds(&self, user: &mut AuthenticatedUser) -> AuthResult<Vec<GuildSummary>> {
        let active: BTreeSet<String> = self
            .overrides
            .list_active_guild_ids()
            .await
            .map_err(AuthError::Internal)?
            .into_iter()
            .collect();

        let snapshot = self.guild_snapshot(user).await?;

        let mut guilds: Vec<GuildSummary> = if self.access.is_master_override(&user.id) {
            active
                .iter()
                .map(|id| match snapshot.find(id) {
                    Some(membership) => GuildSummary::from(membership),
                    None => GuildSummary::unknown(id),
                })
                .collect()
        } else {
            snapshot
                .guilds
                .iter()
                .filter(|g| g.is_admin() && active.contains(&g.id))
                .map(GuildSummary::from)
                .collect()
        };

        guilds.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(guilds)
    }

    async fn has_override(&self, guild_id: &str) -> AuthResult<bool> {
        if self
            .overrides
            .find_authorization(guild_id)
            .await
            .map_err(AuthError::Internal)?
            .is_some()
        {
            return Ok(true);
        }

        Ok(self
            .overrides
            .find_bypass(guild_id)
            .await
            .map_err(AuthError::Internal)?
            .is_some())
    }
}
