//! Guild membership and access override models

use serde::{Deserialize, Deserializer, Serialize};

/// `ADMINISTRATOR` permission bit
pub const ADMINISTRATOR: u64 = 0x8;
/// `MANAGE_GUILD` permission bit
pub const MANAGE_GUILD: u64 = 0x20;

/// One entry of `GET /users/@me/guilds`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildMembership {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    /// Permission bitmask; the upstream API sends it as a decimal string
    #[serde(deserialize_with = "permissions_from_str_or_int")]
    pub permissions: u64,
}

impl GuildMembership {
    /// Whether the member may administer the guild
    pub fn is_admin(&self) -> bool {
        has_admin_bits(self.permissions)
    }
}

/// Whether `permissions` carries `ADMINISTRATOR` or `MANAGE_GUILD`
pub fn has_admin_bits(permissions: u64) -> bool {
    permissions & (ADMINISTRATOR | MANAGE_GUILD) != 0
}

fn permissions_from_str_or_int<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(bits) => Ok(bits),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Cached membership list of one user, stored under `guilds:{user_id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildPermissionSnapshot {
    pub user_id: String,
    pub guilds: Vec<GuildMembership>,
}

impl GuildPermissionSnapshot {
    /// Membership entry for `guild_id`, if the user is in that guild
    pub fn find(&self, guild_id: &str) -> Option<&GuildMembership> {
        self.guilds.iter().find(|g| g.id == guild_id)
    }

    /// Whether the user administers `guild_id`; absent guilds are never administered
    pub fn is_admin_of(&self, guild_id: &str) -> bool {
        self.find(guild_id).is_some_and(GuildMembership::is_admin)
    }
}

/// Guild authorized by a subscriber for extended features
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRecord {
    pub guild_id: String,
    pub authorized_by: String,
    pub is_active: bool,
}

/// Guild granted extended features without an authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassRecord {
    pub guild_id: String,
}

/// Guild entry of `GET /api/users/guilds`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSummary {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
}

impl From<&GuildMembership> for GuildSummary {
    fn from(g: &GuildMembership) -> Self {
        Self {
            id: g.id.clone(),
            name: g.name.clone(),
            icon: g.icon.clone(),
        }
    }
}

impl GuildSummary {
    /// Placeholder for a guild the caller is not a member of
    pub fn unknown(guild_id: &str) -> Self {
        Self {
            id: guild_id.to_string(),
            name: format!("Unknown Server ({})", guild_id),
            icon: None,
        }
    }
}

/// Access decision for one guild (`GET /api/guilds/{guild_id}/access`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildAccess {
    pub is_admin: bool,
    pub has_extended_access: bool,
}
