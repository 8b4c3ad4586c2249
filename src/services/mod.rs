//! Services layer - Business logic
//!
//! This module contains the auth services:
//! - Session storage with the cache-aside lookup policy
//! - Upstream calls with transparent credential refresh
//! - Guild permission checks
//! - Session resolution and sign-in

pub mod auth;
pub mod background;
pub mod discord;
pub mod permission;
pub mod refresher;
pub mod session;

pub use auth::{Authenticator, SignedIn};
pub use background::Detached;
pub use discord::{DiscordClient, TokenSet, UpstreamClient, UpstreamError, UpstreamRequest, UpstreamResponse};
pub use permission::PermissionVerifier;
pub use refresher::TokenRefresher;
pub use session::{ClearSessionCookie, SessionStore};
