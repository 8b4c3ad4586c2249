//! Credential encryption
//!
//! Upstream OAuth tokens are never written to the database in the clear. They are
//! sealed into a Fernet-style envelope (see [`fernet`]) keyed by a single master key
//! from configuration.

pub mod fernet;

pub use fernet::{decrypt, encrypt, CipherError, FernetCipher};
