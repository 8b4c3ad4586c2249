//! Data models
//!
//! This module contains the data structures shared by the auth services:
//! - Durable and cached session records
//! - The request-scoped authenticated user and upstream profiles
//! - Guild memberships, permission snapshots and access overrides

mod guild;
mod session;
mod user;

pub use guild::{
    has_admin_bits, AuthorizationRecord, BypassRecord, GuildAccess, GuildMembership,
    GuildPermissionSnapshot, GuildSummary, ADMINISTRATOR, MANAGE_GUILD,
};
pub use session::{CachedSessionEntry, Session};
pub use user::{AuthenticatedUser, CurrentUser, UserProfile};
