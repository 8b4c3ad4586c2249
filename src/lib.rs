//! codex-auth - Session and guild authorization service for the Codex dashboard
//!
//! This library provides credential encryption, the session store, transparent
//! upstream credential refresh and guild permission checks, plus the HTTP
//! surface built on top of them.

pub mod api;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
