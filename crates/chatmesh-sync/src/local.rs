//! Entry point for organic writes.
//!
//! The real-time layer persists chat entities through [`LocalWriter`]; each
//! committed write is handed to the dispatcher under the current origin.
//! Replication problems never surface here: the local write succeeds or
//! fails on its own.

use chatmesh_shared::{ModelKind, SyncAction, SyncRecord};
use uuid::Uuid;

use crate::apply::{apply_record, exists, Applied, ConflictPolicy};
use crate::dispatcher::{ChangeSet, Dispatcher};
use crate::error::ApplyError;
use crate::record::record_id;
use crate::store::SharedStore;

#[derive(Clone)]
pub struct LocalWriter {
    store: SharedStore,
    dispatcher: Dispatcher,
}

impl LocalWriter {
    pub fn new(store: SharedStore, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Create or update one entity from its wire record.
    pub fn upsert(&self, kind: ModelKind, record: SyncRecord) -> Result<Applied, ApplyError> {
        let id = record_id(&record)?;
        self.store.with(|db| {
            let action = if exists(db, kind, id)? {
                SyncAction::Update
            } else {
                SyncAction::Create
            };
            let applied = db.in_transaction(|db| {
                apply_record(db, kind, action, record, ConflictPolicy::Arrival)
            })?;
            self.dispatcher
                .notify(db, ChangeSet::new(kind, action, vec![applied.record.clone()]));
            Ok(applied)
        })
    }

    /// Delete one entity. Deleting a missing id succeeds and is still
    /// propagated, so peers converge.
    pub fn delete(&self, kind: ModelKind, id: Uuid) -> Result<Applied, ApplyError> {
        let mut record = SyncRecord::new();
        record.insert("id".into(), id.to_string().into());

        self.store.with(|db| {
            let applied = db.in_transaction(|db| {
                apply_record(db, kind, SyncAction::Delete, record, ConflictPolicy::Arrival)
            })?;
            self.dispatcher.notify(
                db,
                ChangeSet::new(kind, SyncAction::Delete, vec![applied.record.clone()]),
            );
            Ok(applied)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chatmesh_shared::constants::DEFAULT_HUB_SECRET;
    use chatmesh_shared::{NodeStatus, Role};
    use chatmesh_store::{Database, NodeEndpoint};
    use chrono::Utc;
    use serde_json::{json, Value};

    use crate::identity::LocalIdentity;
    use crate::origin::{self, Origin};

    fn setup() -> (LocalWriter, tokio::sync::mpsc::Receiver<crate::Delivery>, SharedStore) {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.insert_endpoint(&NodeEndpoint {
            id: Uuid::new_v4(),
            name: "node1".into(),
            url: "http://node1:8000".into(),
            status: NodeStatus::Online,
            load: 0.0,
            current_rooms: 0,
            max_rooms: 50,
            last_heartbeat: Some(now),
            api_key: "key-node1".into(),
            sync_enabled: true,
            auto_sync_interval: 300,
            last_sync: None,
            created_at: now,
            updated_at: now,
        })
        .unwrap();

        let identity = Arc::new(LocalIdentity {
            role: Role::Node,
            name: "node1".into(),
            url: "http://node1:8000".into(),
            hub_url: Some("http://hub:8000".into()),
            hub_secret: DEFAULT_HUB_SECRET.into(),
            sync_enabled: true,
        });
        let store = SharedStore::new(db);
        let (dispatcher, rx) = Dispatcher::new(identity, 8);
        (LocalWriter::new(store.clone(), dispatcher), rx, store)
    }

    fn user(id: Uuid) -> SyncRecord {
        let now = chatmesh_shared::timestamp::format(&Utc::now());
        let Value::Object(map) =
            json!({"id": id.to_string(), "username": "alice", "created_at": now, "updated_at": now})
        else {
            unreachable!()
        };
        map
    }

    #[test]
    fn test_first_write_is_create_then_update() {
        let (writer, mut rx, store) = setup();
        let id = Uuid::new_v4();

        writer.upsert(ModelKind::User, user(id)).unwrap();
        writer.upsert(ModelKind::User, user(id)).unwrap();

        assert_eq!(rx.try_recv().unwrap().envelope.action, SyncAction::Create);
        assert_eq!(rx.try_recv().unwrap().envelope.action, SyncAction::Update);
        assert!(store.with(|db| db.user_exists(id)).unwrap());
    }

    #[test]
    fn test_writes_under_foreign_origin_stay_local() {
        let (writer, mut rx, _store) = setup();
        let origin = Origin::Hub { author: None };
        origin::sync_scope(origin, || writer.upsert(ModelKind::User, user(Uuid::new_v4())))
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_delete_of_unknown_id_still_propagates() {
        let (writer, mut rx, _store) = setup();
        let applied = writer.delete(ModelKind::Message, Uuid::new_v4()).unwrap();
        assert_eq!(applied.outcome, crate::Outcome::AlreadyDeleted);
        assert_eq!(rx.try_recv().unwrap().envelope.action, SyncAction::Delete);
    }
}
