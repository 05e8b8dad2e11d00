//! Domain model structs persisted in SQLite.
//!
//! The six chat entities derive `Serialize`/`Deserialize` with the wire
//! field names, so their serde form is also their replication record.
//! References to other entities are always carried as UUIDs.

use chatmesh_shared::timestamp;
use chatmesh_shared::{
    LogLevel, ModelKind, NodeStatus, RegistrationStatus, SessionStatus, SyncAction,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub email: String,
    /// Opaque credential hash, replicated so users can log in on any node.
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default, with = "timestamp::option")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ChatRoom
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRoom {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_room_type")]
    pub room_type: String,
    /// The node currently hosting the room.
    #[serde(default)]
    pub node_id: Option<Uuid>,
    pub created_by: Uuid,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_max_members")]
    pub max_members: i64,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// RoomMembership
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomMembership {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    #[serde(default = "default_member_role")]
    pub role: String,
    #[serde(with = "timestamp")]
    pub joined_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub last_read: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// MessageReadStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageReadStatus {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    #[serde(with = "timestamp")]
    pub read_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// UserSession
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_key: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub node_id: Option<Uuid>,
    #[serde(with = "timestamp")]
    pub last_activity: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

fn default_room_type() -> String {
    "public".into()
}

fn default_member_role() -> String {
    "member".into()
}

fn default_message_type() -> String {
    "text".into()
}

fn default_max_members() -> i64 {
    100
}

// ---------------------------------------------------------------------------
// NodeEndpoint
// ---------------------------------------------------------------------------

/// A node known to this process. The API key is generated once on the hub
/// and never changes afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEndpoint {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub status: NodeStatus,
    /// 0 to 100.
    pub load: f64,
    pub current_rooms: i64,
    pub max_rooms: i64,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub api_key: String,
    pub sync_enabled: bool,
    pub auto_sync_interval: i64,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NodeEndpoint {
    pub fn available_capacity(&self) -> i64 {
        (self.max_rooms - self.current_rooms).max(0)
    }
}

// ---------------------------------------------------------------------------
// NodeRegistration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NodeRegistration {
    pub id: Uuid,
    pub node_name: String,
    pub node_url: String,
    pub admin_email: String,
    pub description: String,
    pub max_rooms_capacity: i64,
    pub status: RegistrationStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    /// The endpoint created on approval.
    pub endpoint_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sync audit
// ---------------------------------------------------------------------------

/// One inbound sync request as seen by the receiver.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SyncSession {
    pub id: Uuid,
    pub source_node_id: Option<Uuid>,
    pub target_node_id: Option<Uuid>,
    pub status: SessionStatus,
    pub sync_type: String,
    pub records_synced: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SyncOperationLog {
    pub id: Uuid,
    pub session_id: Uuid,
    pub model: ModelKind,
    pub entity_id: String,
    pub action: SyncAction,
    pub synced_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Node history
// ---------------------------------------------------------------------------

/// One heartbeat as the hub received it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NodeHeartbeat {
    pub id: i64,
    pub node_id: Uuid,
    pub status: NodeStatus,
    pub load: f64,
    pub current_rooms: i64,
    pub active_connections: Option<i64>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub disk_usage: Option<f64>,
    pub received_at: DateTime<Utc>,
}

/// Operator-facing event: registrations, approvals, status flips.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SystemLog {
    pub id: Uuid,
    pub level: LogLevel,
    pub category: String,
    pub message: String,
    /// Free-form JSON text.
    pub details: Option<String>,
    pub node_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
