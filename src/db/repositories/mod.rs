//! Database repositories
//!
//! Repository pattern implementations for database access.

pub mod guild_access;
pub mod session;

pub use guild_access::{GuildAccessRepository, SqlxGuildAccessRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
