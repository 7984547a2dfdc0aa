//! # parley-store
//!
//! Durable conversation storage for the Parley server, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for user profiles,
//! conversations and messages. Callers running on an async runtime are
//! expected to move calls onto a blocking thread.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod convert;
mod error;

pub use database::Database;
pub use rusqlite::InterruptHandle;
pub use error::StoreError;
pub use models::*;
