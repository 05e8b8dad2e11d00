//! Appliers: one create/update/delete sub-protocol per entity kind.
//!
//! Upserts are keyed by the entity's global id, so applying the same record
//! twice leaves one row. Deletes of a missing row succeed.

use std::str::FromStr;

use chatmesh_shared::{ModelKind, SyncAction, SyncRecord};
use chatmesh_store::{
    ChatRoom, Database, Message, MessageReadStatus, RoomMembership, User, UserSession,
};
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::conflict::{self, Winner};
use crate::error::ApplyError;
use crate::record::{record_id, Replicated};

/// How an update is reconciled with the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Whatever arrives last overwrites the row.
    #[default]
    Arrival,
    /// An incoming version older than the stored one is dropped.
    Timestamp,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arrival" | "lww" => Ok(Self::Arrival),
            "timestamp" => Ok(Self::Timestamp),
            other => Err(format!("unknown conflict policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Upserted,
    /// Older than the stored row under [`ConflictPolicy::Timestamp`].
    Stale,
    Deleted,
    AlreadyDeleted,
}

/// One successfully processed record.
#[derive(Debug, Clone)]
pub struct Applied {
    pub id: Uuid,
    pub outcome: Outcome,
    /// Canonical wire form of what was written, for onward relay.
    pub record: SyncRecord,
}

impl Applied {
    /// Whether the change should travel further.
    pub fn should_relay(&self) -> bool {
        !matches!(self.outcome, Outcome::Stale)
    }
}

/// Apply one record of `kind`.
pub fn apply_record(
    db: &Database,
    kind: ModelKind,
    action: SyncAction,
    record: SyncRecord,
    policy: ConflictPolicy,
) -> Result<Applied, ApplyError> {
    match kind {
        ModelKind::User => apply_as::<User>(db, action, record, policy),
        ModelKind::ChatRoom => apply_as::<ChatRoom>(db, action, record, policy),
        ModelKind::RoomMembership => apply_as::<RoomMembership>(db, action, record, policy),
        ModelKind::Message => apply_as::<Message>(db, action, record, policy),
        ModelKind::MessageReadStatus => {
            apply_as::<MessageReadStatus>(db, action, record, policy)
        }
        ModelKind::Session => apply_as::<UserSession>(db, action, record, policy),
    }
}

/// Wire records of every `kind` entity modified after `since`.
pub fn records_since(
    db: &Database,
    kind: ModelKind,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<SyncRecord>, ApplyError> {
    match kind {
        ModelKind::User => collect::<User>(db, since),
        ModelKind::ChatRoom => collect::<ChatRoom>(db, since),
        ModelKind::RoomMembership => collect::<RoomMembership>(db, since),
        ModelKind::Message => collect::<Message>(db, since),
        ModelKind::MessageReadStatus => collect::<MessageReadStatus>(db, since),
        ModelKind::Session => collect::<UserSession>(db, since),
    }
}

/// Whether an entity of `kind` with this id is stored.
pub fn exists(db: &Database, kind: ModelKind, id: Uuid) -> Result<bool, ApplyError> {
    let found = match kind {
        ModelKind::User => User::load(db, id)?.is_some(),
        ModelKind::ChatRoom => ChatRoom::load(db, id)?.is_some(),
        ModelKind::RoomMembership => RoomMembership::load(db, id)?.is_some(),
        ModelKind::Message => Message::load(db, id)?.is_some(),
        ModelKind::MessageReadStatus => MessageReadStatus::load(db, id)?.is_some(),
        ModelKind::Session => UserSession::load(db, id)?.is_some(),
    };
    Ok(found)
}

fn apply_as<T: Replicated>(
    db: &Database,
    action: SyncAction,
    record: SyncRecord,
    policy: ConflictPolicy,
) -> Result<Applied, ApplyError> {
    match action {
        SyncAction::Create | SyncAction::Update => upsert::<T>(db, record, policy),
        SyncAction::Delete => delete::<T>(db, record),
    }
}

fn upsert<T: Replicated>(
    db: &Database,
    record: SyncRecord,
    policy: ConflictPolicy,
) -> Result<Applied, ApplyError> {
    let entity = T::from_sync_record(record)?;
    entity.check_dependencies(db)?;

    if policy == ConflictPolicy::Timestamp {
        if let Some(existing) = T::load(db, entity.id())? {
            if conflict::resolve(existing.updated_at(), entity.updated_at()) == Winner::Existing {
                debug!(model = %T::KIND, id = %entity.id(), "stored version is newer; skipping");
                return Ok(Applied {
                    id: entity.id(),
                    outcome: Outcome::Stale,
                    record: existing.to_sync_record()?,
                });
            }
        }
    }

    entity.save(db)?;
    debug!(model = %T::KIND, id = %entity.id(), "upserted");

    Ok(Applied {
        id: entity.id(),
        outcome: Outcome::Upserted,
        record: entity.to_sync_record()?,
    })
}

fn delete<T: Replicated>(db: &Database, record: SyncRecord) -> Result<Applied, ApplyError> {
    let id = record_id(&record)?;
    let outcome = if T::remove(db, id)? {
        debug!(model = %T::KIND, id = %id, "deleted");
        Outcome::Deleted
    } else {
        debug!(model = %T::KIND, id = %id, "already deleted");
        Outcome::AlreadyDeleted
    };

    let mut relay = SyncRecord::new();
    relay.insert("id".into(), id.to_string().into());
    Ok(Applied {
        id,
        outcome,
        record: relay,
    })
}

fn collect<T: Replicated>(
    db: &Database,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<SyncRecord>, ApplyError> {
    T::list_since(db, since)?
        .iter()
        .map(|entity| entity.to_sync_record())
        .collect()
}
