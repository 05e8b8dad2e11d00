//! # chatmesh-store
//!
//! SQLite storage shared by the hub and the nodes. The hub keeps a full
//! replica of every chat entity; a node keeps the rooms it hosts plus
//! whatever the hub pushed to it. Both roles also keep the node endpoint
//! table and the sync audit trail here.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every model.

pub mod database;
pub mod endpoints;
pub mod memberships;
pub mod messages;
pub mod migrations;
pub mod node_history;
pub mod models;
pub mod read_status;
pub mod registrations;
pub mod rooms;
pub mod sessions;
pub mod sync_log;
pub mod users;

mod error;
mod row;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;

#[cfg(test)]
pub(crate) mod fixtures;
