//! # parley-store
//!
//! Local persistence of conversation state, backed by SQLite.
//!
//! The chat client keeps its conversations in memory and writes them through
//! to this store so that a restart comes back with the same message lists,
//! unread counts and selected peer. The crate exposes a synchronous
//! `Database` handle with typed helpers per concern.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod session;
pub mod unread;

mod error;

pub use database::Database;
pub use error::StoreError;
