//! JSON bodies exchanged between the hub and its nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::constants::DEFAULT_MAX_ROOMS;
use crate::types::{ModelKind, NodeStatus, SyncAction};

/// One entity in its wire form: a flat JSON object.
pub type SyncRecord = Map<String, Value>;

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

/// The unit of replication, posted to `/sync/receive`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEnvelope {
    pub model: ModelKind,
    pub action: SyncAction,
    pub data: SyncPayload,
    /// When the sender emitted the change.
    #[serde(with = "crate::timestamp")]
    pub timestamp: DateTime<Utc>,
    /// The node that authored the change, if it came from a node.
    #[serde(default)]
    pub origin_node_id: Option<Uuid>,
    /// Set by the hub when it forwards a node's change to another node.
    #[serde(default)]
    pub relayed: bool,
    /// `full` or `incremental` for bulk resync batches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_type: Option<String>,
}

/// A single record, or an ordered batch of records of the same kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncPayload {
    One(SyncRecord),
    Batch(Vec<SyncRecord>),
}

impl SyncPayload {
    pub fn into_records(self) -> Vec<SyncRecord> {
        match self {
            SyncPayload::One(record) => vec![record],
            SyncPayload::Batch(records) => records,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SyncPayload::One(_) => 1,
            SyncPayload::Batch(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, SyncPayload::Batch(_))
    }
}

impl From<Vec<SyncRecord>> for SyncPayload {
    fn from(mut records: Vec<SyncRecord>) -> Self {
        if records.len() == 1 {
            if let Some(record) = records.pop() {
                return SyncPayload::One(record);
            }
        }
        SyncPayload::Batch(records)
    }
}

/// Acknowledgment returned by `/sync/receive`.
///
/// This is the dispatcher's only feedback: it echoes what was processed and
/// lists the records that could not be applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAck {
    pub status: AckStatus,
    pub action: SyncAction,
    pub model: ModelKind,
    /// Id of the processed entity for single-record payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Ids of the applied entities for batch payloads.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    pub applied: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RecordFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// Echo of the envelope timestamp.
    #[serde(with = "crate::timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Partial,
    Failed,
}

/// A record of a batch that was skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordFailure {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: FailureKind,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A referenced room, user or message is missing.
    MissingDependency,
    /// The record could not be decoded.
    Malformed,
    /// The store refused the write.
    Storage,
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default = "default_online")]
    pub status: NodeStatus,
    #[serde(default)]
    pub load: f64,
    #[serde(default)]
    pub current_rooms: i64,
    #[serde(default = "default_max_rooms")]
    pub max_rooms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_metrics: Option<SystemMetrics>,
}

/// Host metrics attached to a heartbeat. All values are percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_connections: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: String,
    pub message: String,
    #[serde(with = "crate::timestamp")]
    pub timestamp: DateTime<Utc>,
}

fn default_online() -> NodeStatus {
    NodeStatus::Online
}

fn default_max_rooms() -> i64 {
    DEFAULT_MAX_ROOMS
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub node_name: String,
    pub node_url: String,
    #[serde(default)]
    pub admin_email: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_max_rooms")]
    pub max_rooms_capacity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub status: String,
    pub registration_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Peer metadata
// ---------------------------------------------------------------------------

/// Identity the hub hands to a node after approval (`/meta/set`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMeta {
    pub id: Uuid,
    pub api_key: String,
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub current_rooms: i64,
    #[serde(default)]
    pub load: f64,
}

/// One endpoint in a `/peer/init` topology push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_online")]
    pub status: NodeStatus,
    #[serde(default)]
    pub load: f64,
    #[serde(default)]
    pub current_rooms: i64,
    #[serde(default = "default_max_rooms")]
    pub max_rooms: i64,
    #[serde(default = "default_true")]
    pub sync_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Body of `/peer/delete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDelete {
    pub id: Uuid,
    pub api_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_single_record() {
        let raw = json!({
            "model": "chatroom",
            "action": "create",
            "data": {"id": "b8f5c1d6-4bfc-4a53-9f5f-1f1f6cf7c0aa", "name": "R1"},
            "timestamp": "2024-05-01T10:00:00",
            "origin_node_id": "0f6c3e52-7d0b-4b8c-a8ee-8a8c5b0a2f11"
        });
        let env: SyncEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(env.model, ModelKind::ChatRoom);
        assert_eq!(env.action, SyncAction::Create);
        assert!(!env.relayed);
        assert!(!env.data.is_batch());
        assert_eq!(env.data.len(), 1);
    }

    #[test]
    fn test_envelope_batch_keeps_order() {
        let raw = json!({
            "model": "user",
            "action": "update",
            "data": [{"id": "a"}, {"id": "b"}, {"id": "c"}],
            "timestamp": "2024-05-01T10:00:00Z"
        });
        let env: SyncEnvelope = serde_json::from_value(raw).unwrap();
        let ids: Vec<_> = env
            .data
            .into_records()
            .into_iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(env.origin_node_id.is_none());
    }

    #[test]
    fn test_envelope_rejects_unknown_model() {
        let raw = json!({
            "model": "profile",
            "action": "create",
            "data": {},
            "timestamp": "2024-05-01T10:00:00Z"
        });
        assert!(serde_json::from_value::<SyncEnvelope>(raw).is_err());
    }

    #[test]
    fn test_heartbeat_defaults() {
        let hb: HeartbeatRequest = serde_json::from_value(json!({"load": 12.5})).unwrap();
        assert_eq!(hb.status, NodeStatus::Online);
        assert_eq!(hb.max_rooms, DEFAULT_MAX_ROOMS);
        assert!(hb.system_metrics.is_none());
    }
}
