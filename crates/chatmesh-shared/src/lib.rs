//! # chatmesh-shared
//!
//! Types shared by every chatmesh crate: the replication wire protocol,
//! the closed set of replicated entity kinds, node and session statuses,
//! and the header names both sides of a sync exchange agree on.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod timestamp;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{
    AckStatus, FailureKind, RecordFailure, SyncAck, SyncEnvelope, SyncPayload, SyncRecord,
};
pub use types::{
    LogLevel, ModelKind, NodeStatus, RegistrationStatus, Role, SessionStatus, SyncAction,
};
