//! Entity serializer.
//!
//! Each replicated entity converts to and from a flat JSON record. Field
//! sets come from the serde derives on the store models; foreign references
//! are always carried as the referenced entity's UUID, never as a row
//! number, and timestamps as RFC 3339 strings.

use chatmesh_shared::{ModelKind, SyncRecord};
use chatmesh_store::{
    ChatRoom, Database, Message, MessageReadStatus, RoomMembership, User, UserSession,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApplyError;

type StoreResult<T> = chatmesh_store::Result<T>;

/// An entity kind that takes part in replication.
pub trait Replicated: Serialize + DeserializeOwned + Sized {
    const KIND: ModelKind;

    fn id(&self) -> Uuid;

    /// Last modification time, used by the timestamp conflict policy and by
    /// incremental resync.
    fn updated_at(&self) -> DateTime<Utc>;

    /// Fail with [`ApplyError::DependencyNotFound`] if a referenced entity
    /// is missing locally.
    fn check_dependencies(&self, _db: &Database) -> Result<(), ApplyError> {
        Ok(())
    }

    fn load(db: &Database, id: Uuid) -> StoreResult<Option<Self>>;
    fn save(&self, db: &Database) -> StoreResult<()>;
    fn remove(db: &Database, id: Uuid) -> StoreResult<bool>;
    fn list_since(db: &Database, since: Option<DateTime<Utc>>) -> StoreResult<Vec<Self>>;

    fn to_sync_record(&self) -> Result<SyncRecord, ApplyError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(ApplyError::MalformedRecord(format!(
                "{} serialized to a non-object: {other}",
                Self::KIND
            ))),
        }
    }

    fn from_sync_record(record: SyncRecord) -> Result<Self, ApplyError> {
        serde_json::from_value(Value::Object(record))
            .map_err(|e| ApplyError::MalformedRecord(format!("{}: {e}", Self::KIND)))
    }
}

/// The `id` field of a record, parsed.
pub fn record_id(record: &SyncRecord) -> Result<Uuid, ApplyError> {
    let raw = record
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ApplyError::MalformedRecord("missing \"id\"".into()))?;
    Uuid::parse_str(raw).map_err(|e| ApplyError::MalformedRecord(format!("bad id '{raw}': {e}")))
}

fn require(found: bool, kind: ModelKind, id: Uuid) -> Result<(), ApplyError> {
    if found {
        Ok(())
    } else {
        Err(ApplyError::DependencyNotFound { kind, id })
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

impl Replicated for User {
    const KIND: ModelKind = ModelKind::User;

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn load(db: &Database, id: Uuid) -> StoreResult<Option<Self>> {
        db.find_user(id)
    }

    fn save(&self, db: &Database) -> StoreResult<()> {
        db.upsert_user(self)
    }

    fn remove(db: &Database, id: Uuid) -> StoreResult<bool> {
        db.delete_user(id)
    }

    fn list_since(db: &Database, since: Option<DateTime<Utc>>) -> StoreResult<Vec<Self>> {
        db.list_users_since(since)
    }
}

// ---------------------------------------------------------------------------
// ChatRoom
// ---------------------------------------------------------------------------

impl Replicated for ChatRoom {
    const KIND: ModelKind = ModelKind::ChatRoom;

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn check_dependencies(&self, db: &Database) -> Result<(), ApplyError> {
        require(db.user_exists(self.created_by)?, ModelKind::User, self.created_by)
    }

    fn load(db: &Database, id: Uuid) -> StoreResult<Option<Self>> {
        db.find_room(id)
    }

    fn save(&self, db: &Database) -> StoreResult<()> {
        db.upsert_room(self)
    }

    fn remove(db: &Database, id: Uuid) -> StoreResult<bool> {
        db.delete_room(id)
    }

    fn list_since(db: &Database, since: Option<DateTime<Utc>>) -> StoreResult<Vec<Self>> {
        db.list_rooms_since(since)
    }
}

// ---------------------------------------------------------------------------
// RoomMembership
// ---------------------------------------------------------------------------

impl Replicated for RoomMembership {
    const KIND: ModelKind = ModelKind::RoomMembership;

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn check_dependencies(&self, db: &Database) -> Result<(), ApplyError> {
        require(db.room_exists(self.room_id)?, ModelKind::ChatRoom, self.room_id)?;
        require(db.user_exists(self.user_id)?, ModelKind::User, self.user_id)
    }

    fn load(db: &Database, id: Uuid) -> StoreResult<Option<Self>> {
        db.find_membership(id)
    }

    fn save(&self, db: &Database) -> StoreResult<()> {
        db.upsert_membership(self)
    }

    fn remove(db: &Database, id: Uuid) -> StoreResult<bool> {
        db.delete_membership(id)
    }

    fn list_since(db: &Database, since: Option<DateTime<Utc>>) -> StoreResult<Vec<Self>> {
        db.list_memberships_since(since)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

impl Replicated for Message {
    const KIND: ModelKind = ModelKind::Message;

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn check_dependencies(&self, db: &Database) -> Result<(), ApplyError> {
        require(db.room_exists(self.room_id)?, ModelKind::ChatRoom, self.room_id)?;
        require(db.user_exists(self.sender_id)?, ModelKind::User, self.sender_id)
    }

    fn load(db: &Database, id: Uuid) -> StoreResult<Option<Self>> {
        db.find_message(id)
    }

    fn save(&self, db: &Database) -> StoreResult<()> {
        db.upsert_message(self)
    }

    fn remove(db: &Database, id: Uuid) -> StoreResult<bool> {
        db.delete_message(id)
    }

    fn list_since(db: &Database, since: Option<DateTime<Utc>>) -> StoreResult<Vec<Self>> {
        db.list_messages_since(since)
    }
}

// ---------------------------------------------------------------------------
// MessageReadStatus
// ---------------------------------------------------------------------------

impl Replicated for MessageReadStatus {
    const KIND: ModelKind = ModelKind::MessageReadStatus;

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn check_dependencies(&self, db: &Database) -> Result<(), ApplyError> {
        require(db.message_exists(self.message_id)?, ModelKind::Message, self.message_id)?;
        require(db.user_exists(self.user_id)?, ModelKind::User, self.user_id)
    }

    fn load(db: &Database, id: Uuid) -> StoreResult<Option<Self>> {
        db.find_read_status(id)
    }

    fn save(&self, db: &Database) -> StoreResult<()> {
        db.upsert_read_status(self)
    }

    fn remove(db: &Database, id: Uuid) -> StoreResult<bool> {
        db.delete_read_status(id)
    }

    fn list_since(db: &Database, since: Option<DateTime<Utc>>) -> StoreResult<Vec<Self>> {
        db.list_read_statuses_since(since)
    }
}

// ---------------------------------------------------------------------------
// UserSession
// ---------------------------------------------------------------------------

impl Replicated for UserSession {
    const KIND: ModelKind = ModelKind::Session;

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn check_dependencies(&self, db: &Database) -> Result<(), ApplyError> {
        require(db.user_exists(self.user_id)?, ModelKind::User, self.user_id)
    }

    fn load(db: &Database, id: Uuid) -> StoreResult<Option<Self>> {
        db.find_session(id)
    }

    fn save(&self, db: &Database) -> StoreResult<()> {
        db.upsert_session(self)
    }

    fn remove(db: &Database, id: Uuid) -> StoreResult<bool> {
        db.delete_session(id)
    }

    fn list_since(db: &Database, since: Option<DateTime<Utc>>) -> StoreResult<Vec<Self>> {
        db.list_sessions_since(since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_record_carries_ids_and_iso_timestamps() {
        let now = Utc::now();
        let msg = Message {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content: "hello".into(),
            message_type: "text".into(),
            is_edited: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        let record = msg.to_sync_record().unwrap();
        assert_eq!(record["id"], json!(msg.id.to_string()));
        assert_eq!(record["room_id"], json!(msg.room_id.to_string()));
        assert!(record["created_at"].as_str().unwrap().ends_with('Z'));

        let back = Message::from_sync_record(record).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.created_at.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_naive_timestamps_are_accepted() {
        let record = json!({
            "id": Uuid::new_v4().to_string(),
            "username": "carol",
            "created_at": "2024-01-01T08:00:00",
            "updated_at": "2024-01-01T08:00:00.5"
        });
        let Value::Object(map) = record else { unreachable!() };
        let user = User::from_sync_record(map).unwrap();
        assert_eq!(user.created_at.to_rfc3339(), "2024-01-01T08:00:00+00:00");
    }

    #[test]
    fn test_bad_timestamp_is_malformed() {
        let record = json!({
            "id": Uuid::new_v4().to_string(),
            "username": "dave",
            "created_at": "not a date",
            "updated_at": "2024-01-01T08:00:00Z"
        });
        let Value::Object(map) = record else { unreachable!() };
        let err = User::from_sync_record(map).unwrap_err();
        assert!(matches!(err, ApplyError::MalformedRecord(_)));
    }

    #[test]
    fn test_record_id_requires_uuid() {
        let Value::Object(ok) = json!({"id": Uuid::nil().to_string()}) else { unreachable!() };
        assert_eq!(record_id(&ok).unwrap(), Uuid::nil());

        let Value::Object(bad) = json!({"id": 42}) else { unreachable!() };
        assert!(record_id(&bad).is_err());
    }
}
