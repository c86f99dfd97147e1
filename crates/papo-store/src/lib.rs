//! # papo-store
//!
//! Local storage consumed by the engine at its two storage boundaries: the
//! presence directory table (`online_users`, multi-writer, TTL-filtered) and
//! best-effort conversation history (`conversations` +
//! `conversation_messages`). The crate exposes a synchronous [`Database`]
//! handle wrapping a `rusqlite::Connection` with typed CRUD helpers.

pub mod conversations;
pub mod database;
pub mod migrations;
pub mod models;
pub mod presence;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
