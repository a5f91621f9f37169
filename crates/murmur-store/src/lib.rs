//! # murmur-store
//!
//! SQLite persistence for the murmur messaging backend.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model. Uniqueness rules (one friendship per pair, one conversation per
//! participant set, one receipt per reader) are enforced by indexes in the
//! schema, not by the callers.

pub mod conversations;
pub mod database;
pub mod friendships;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod receipts;
pub mod users;

mod error;
mod rows;

pub use database::Database;
pub use error::{Result, StoreError};
pub use messages::MessagePosition;
pub use models::*;
pub use rows::now;
pub use users::UserDeletion;
