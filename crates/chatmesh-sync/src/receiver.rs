//! Inbound side of replication: `/sync/receive`.
//!
//! One request walks through authenticate, set origin, open session, apply
//! every record, close session, relay, clear origin. The origin is held by
//! an [`OriginGuard`] so it is cleared on every exit path.

use std::sync::Arc;

use chatmesh_shared::{
    AckStatus, FailureKind, ModelKind, RecordFailure, SessionStatus, SyncAck, SyncAction,
    SyncEnvelope, SyncRecord,
};
use chatmesh_store::{Database, NodeEndpoint, StoreError};
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::apply::{apply_record, Applied, ConflictPolicy};
use crate::dispatcher::{ChangeSet, Dispatcher};
use crate::error::{ApplyError, ReceiveError};
use crate::identity::LocalIdentity;
use crate::origin::{self, Origin, OriginGuard};
use crate::record::record_id;

/// Credentials and provenance headers of an inbound push.
#[derive(Debug, Clone, Default)]
pub struct InboundHeaders {
    /// `X-Node-API-Key`
    pub node_api_key: Option<String>,
    /// `X-Origin-Node-Api-Key`
    pub origin_node_api_key: Option<String>,
    /// `X-AUTH`
    pub auth: Option<String>,
    /// `X-ORIGIN`
    pub origin: Option<String>,
}

/// Who sent an authenticated push.
#[derive(Debug)]
enum Sender {
    Node(NodeEndpoint),
    Hub { author: Option<Uuid> },
}

/// Authenticates, applies and relays inbound sync pushes.
#[derive(Clone)]
pub struct SyncReceiver {
    identity: Arc<LocalIdentity>,
    dispatcher: Dispatcher,
    policy: ConflictPolicy,
}

impl SyncReceiver {
    pub fn new(identity: Arc<LocalIdentity>, dispatcher: Dispatcher, policy: ConflictPolicy) -> Self {
        Self {
            identity,
            dispatcher,
            policy,
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Process one envelope. Blocking: call it with the store lock held,
    /// off the async executor.
    pub fn receive(
        &self,
        db: &Database,
        headers: &InboundHeaders,
        envelope: SyncEnvelope,
    ) -> Result<SyncAck, ReceiveError> {
        let sender = self.authenticate(db, headers, &envelope)?;

        let origin = match &sender {
            Sender::Node(endpoint) => Origin::Peer {
                node_id: endpoint.id,
                node_name: endpoint.name.clone(),
            },
            Sender::Hub { author } => Origin::Hub { author: *author },
        };
        self.apply_as(db, origin, envelope)
    }

    /// Apply an envelope this node fetched itself from the hub's
    /// `/sync/pull`. There is no inbound credential to check. The change is
    /// attributed to the hub, so it is never pushed back upstream.
    pub fn apply_pulled(
        &self,
        db: &Database,
        envelope: SyncEnvelope,
    ) -> Result<SyncAck, ReceiveError> {
        let origin = Origin::Hub {
            author: envelope.origin_node_id,
        };
        self.apply_as(db, origin, envelope)
    }

    fn apply_as(
        &self,
        db: &Database,
        origin: Origin,
        envelope: SyncEnvelope,
    ) -> Result<SyncAck, ReceiveError> {
        origin::sync_scope(Origin::Local, || {
            let _guard = OriginGuard::enter(origin.clone());
            self.process(db, &origin, envelope)
        })
    }

    fn authenticate(
        &self,
        db: &Database,
        headers: &InboundHeaders,
        envelope: &SyncEnvelope,
    ) -> Result<Sender, ReceiveError> {
        // The bypass credential is only ever sent hub -> node.
        if let (false, Some(auth)) = (self.identity.is_hub(), headers.auth.as_deref()) {
            let expected = self.identity.hub_secret.as_bytes();
            if !bool::from(auth.as_bytes().ct_eq(expected)) {
                warn!(origin = ?headers.origin, "sync push with a wrong bypass credential");
                return Err(ReceiveError::Unauthorized("Invalid credentials".into()));
            }

            let author_key = headers
                .origin_node_api_key
                .as_deref()
                .or(headers.node_api_key.as_deref());
            let author = match author_key {
                Some(key) => db.find_endpoint_by_api_key(key)?.map(|e| e.id),
                None => None,
            }
            .or(envelope.origin_node_id);

            return Ok(Sender::Hub { author });
        }

        let Some(key) = headers.node_api_key.as_deref() else {
            warn!(origin = ?headers.origin, "sync push without credentials");
            return Err(ReceiveError::Unauthorized("Missing API key".into()));
        };
        match db.find_endpoint_by_api_key(key)? {
            Some(endpoint) => Ok(Sender::Node(endpoint)),
            None => {
                warn!(origin = ?headers.origin, "sync push with an unknown API key");
                Err(ReceiveError::Unauthorized("Invalid API key".into()))
            }
        }
    }

    fn process(
        &self,
        db: &Database,
        origin: &Origin,
        envelope: SyncEnvelope,
    ) -> Result<SyncAck, ReceiveError> {
        let SyncEnvelope {
            model,
            action,
            data,
            timestamp,
            sync_type,
            ..
        } = envelope;

        if data.is_empty() {
            return Err(ReceiveError::BadRequest("Empty payload".into()));
        }
        let batch = data.is_batch();
        let records = data.into_records();
        let single_id = if batch {
            None
        } else {
            records
                .first()
                .and_then(|r| r.get("id"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        let session_id = match origin.node_id() {
            Some(source) => {
                let target = self.identity.own_endpoint(db)?.map(|e| e.id);
                let kind = sync_type.as_deref().unwrap_or("realtime");
                Some(db.open_sync_session(Some(source), target, kind)?.id)
            }
            None => None,
        };

        info!(
            origin = %origin.name(),
            model = %model,
            action = %action,
            records = records.len(),
            "applying sync push"
        );

        let (applied, failures) = db.in_transaction::<_, StoreError, _>(|db| {
            Ok(self.apply_all(db, model, action, records, session_id))
        })?;

        if let Some(id) = session_id {
            let status = if failures.is_empty() {
                SessionStatus::Completed
            } else {
                SessionStatus::Failed
            };
            db.close_sync_session(id, status, applied.len() as i64)?;
        }

        let relay: Vec<SyncRecord> = applied
            .iter()
            .filter(|a| a.should_relay())
            .map(|a| a.record.clone())
            .collect();
        if !relay.is_empty() {
            let change = ChangeSet {
                kind: model,
                action,
                records: relay,
                timestamp,
            };
            let queued = self.dispatcher.notify(db, change);
            debug!(model = %model, queued, "sync push relayed");
        }

        let status = match (applied.len(), failures.len()) {
            (_, 0) => AckStatus::Success,
            (0, _) => AckStatus::Failed,
            _ => AckStatus::Partial,
        };

        Ok(SyncAck {
            status,
            action,
            model,
            id: single_id,
            ids: if batch {
                applied.iter().map(|a| a.id.to_string()).collect()
            } else {
                Vec::new()
            },
            applied: applied.len(),
            failures,
            session_id,
            timestamp,
        })
    }

    /// Apply records in order, each inside its own savepoint.
    fn apply_all(
        &self,
        db: &Database,
        model: ModelKind,
        action: SyncAction,
        records: Vec<SyncRecord>,
        session_id: Option<Uuid>,
    ) -> (Vec<Applied>, Vec<RecordFailure>) {
        let mut applied = Vec::with_capacity(records.len());
        let mut failures = Vec::new();

        for (index, record) in records.into_iter().enumerate() {
            let id = record_id(&record).ok();
            let result = db.with_savepoint::<_, ApplyError, _>(|db| {
                let done = apply_record(db, model, action, record, self.policy)?;
                if let Some(session) = session_id {
                    db.log_sync_operation(session, model, &done.id.to_string(), action)?;
                }
                Ok(done)
            });

            match result {
                Ok(done) => applied.push(done),
                Err(e) => {
                    let kind = e.failure_kind();
                    match kind {
                        FailureKind::MissingDependency => {
                            error!(model = %model, index, id = ?id, error = %e, "missing dependency")
                        }
                        FailureKind::Malformed => {
                            warn!(model = %model, index, error = %e, "malformed sync record")
                        }
                        FailureKind::Storage => {
                            error!(model = %model, index, id = ?id, error = %e, "sync record not stored")
                        }
                    }
                    failures.push(RecordFailure {
                        index,
                        id: id.map(|id| id.to_string()),
                        kind,
                        error: e.to_string(),
                    });
                }
            }
        }

        (applied, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatmesh_shared::constants::DEFAULT_HUB_SECRET;
    use chatmesh_shared::{NodeStatus, Role, SyncPayload};
    use chrono::Utc;
    use serde_json::{json, Value};

    fn obj(v: Value) -> SyncRecord {
        match v {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn identity(role: Role) -> Arc<LocalIdentity> {
        Arc::new(LocalIdentity {
            role,
            name: match role {
                Role::Hub => "CENTRAL_HUB".into(),
                Role::Node => "node2".into(),
            },
            url: "http://self:8000".into(),
            hub_url: Some("http://hub:8000".into()),
            hub_secret: DEFAULT_HUB_SECRET.into(),
            sync_enabled: true,
        })
    }

    fn receiver(role: Role) -> (SyncReceiver, tokio::sync::mpsc::Receiver<crate::Delivery>) {
        let ident = identity(role);
        let (dispatcher, rx) = Dispatcher::new(ident.clone(), 16);
        (SyncReceiver::new(ident, dispatcher, ConflictPolicy::Arrival), rx)
    }

    fn endpoint(db: &Database, name: &str) -> NodeEndpoint {
        let now = Utc::now();
        let e = NodeEndpoint {
            id: Uuid::new_v4(),
            name: name.into(),
            url: format!("http://{name}:8000"),
            status: NodeStatus::Online,
            load: 0.0,
            current_rooms: 0,
            max_rooms: 50,
            last_heartbeat: Some(now),
            api_key: format!("key-{name}"),
            sync_enabled: true,
            auto_sync_interval: 300,
            last_sync: None,
            created_at: now,
            updated_at: now,
        };
        db.insert_endpoint(&e).unwrap();
        e
    }

    fn user(id: Uuid, name: &str) -> SyncRecord {
        let now = chatmesh_shared::timestamp::format(&Utc::now());
        obj(json!({"id": id.to_string(), "username": name, "created_at": now, "updated_at": now}))
    }

    fn envelope(model: ModelKind, action: SyncAction, data: SyncPayload) -> SyncEnvelope {
        SyncEnvelope {
            model,
            action,
            data,
            timestamp: Utc::now(),
            origin_node_id: None,
            relayed: false,
            sync_type: None,
        }
    }

    fn with_key(key: &str) -> InboundHeaders {
        InboundHeaders {
            node_api_key: Some(key.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_unknown_key_touches_nothing() {
        let db = Database::open_in_memory().unwrap();
        let (rx, _q) = receiver(Role::Hub);
        let id = Uuid::new_v4();

        let env = envelope(ModelKind::User, SyncAction::Create, SyncPayload::One(user(id, "a")));
        let err = rx.receive(&db, &with_key("nope"), env).unwrap_err();

        assert!(matches!(err, ReceiveError::Unauthorized(_)));
        assert!(!db.user_exists(id).unwrap());
        assert!(db.list_sync_sessions(10).unwrap().is_empty());
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let db = Database::open_in_memory().unwrap();
        let (rx, _q) = receiver(Role::Node);
        let env = envelope(
            ModelKind::User,
            SyncAction::Create,
            SyncPayload::One(user(Uuid::new_v4(), "a")),
        );
        let err = rx.receive(&db, &InboundHeaders::default(), env).unwrap_err();
        assert!(matches!(err, ReceiveError::Unauthorized(_)));
    }

    #[test]
    fn test_hub_ignores_bypass_credential() {
        let db = Database::open_in_memory().unwrap();
        let (rx, _q) = receiver(Role::Hub);
        let headers = InboundHeaders {
            auth: Some(DEFAULT_HUB_SECRET.into()),
            ..Default::default()
        };
        let env = envelope(
            ModelKind::User,
            SyncAction::Create,
            SyncPayload::One(user(Uuid::new_v4(), "a")),
        );
        assert!(matches!(
            rx.receive(&db, &headers, env),
            Err(ReceiveError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_wrong_bypass_rejected_on_node() {
        let db = Database::open_in_memory().unwrap();
        let (rx, _q) = receiver(Role::Node);
        let headers = InboundHeaders {
            auth: Some("guess".into()),
            ..Default::default()
        };
        let env = envelope(
            ModelKind::User,
            SyncAction::Create,
            SyncPayload::One(user(Uuid::new_v4(), "a")),
        );
        assert!(matches!(
            rx.receive(&db, &headers, env),
            Err(ReceiveError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_peer_push_applies_logs_and_relays() {
        let db = Database::open_in_memory().unwrap();
        let n1 = endpoint(&db, "node1");
        endpoint(&db, "node2");
        let (rx, mut queue) = receiver(Role::Hub);
        let id = Uuid::new_v4();

        let env = envelope(ModelKind::User, SyncAction::Create, SyncPayload::One(user(id, "a")));
        let ack = rx.receive(&db, &with_key(&n1.api_key), env).unwrap();

        assert_eq!(ack.status, AckStatus::Success);
        assert_eq!(ack.id.as_deref(), Some(id.to_string().as_str()));
        assert!(db.user_exists(id).unwrap());

        let session = db.get_sync_session(ack.session_id.unwrap()).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.source_node_id, Some(n1.id));
        assert_eq!(session.records_synced, 1);
        assert_eq!(db.list_sync_operations(session.id).unwrap().len(), 1);

        let delivery = queue.try_recv().unwrap();
        assert_eq!(delivery.target_name, "node2");
        assert!(queue.try_recv().is_err());
        assert_eq!(origin::get_origin(), Origin::Local);
    }

    #[test]
    fn test_hub_push_to_node_is_not_forwarded() {
        let db = Database::open_in_memory().unwrap();
        endpoint(&db, "node2");
        let n1 = endpoint(&db, "node1");
        let (rx, mut queue) = receiver(Role::Node);
        let headers = InboundHeaders {
            auth: Some(DEFAULT_HUB_SECRET.into()),
            origin: Some("CENTRAL_SERVER".into()),
            origin_node_api_key: Some(n1.api_key.clone()),
            node_api_key: Some(n1.api_key.clone()),
        };

        let env = envelope(
            ModelKind::User,
            SyncAction::Create,
            SyncPayload::One(user(Uuid::new_v4(), "a")),
        );
        let ack = rx.receive(&db, &headers, env).unwrap();

        assert_eq!(ack.status, AckStatus::Success);
        let session = db.get_sync_session(ack.session_id.unwrap()).unwrap();
        assert_eq!(session.source_node_id, Some(n1.id));
        assert!(queue.try_recv().is_err());
    }

    #[test]
    fn test_hub_push_without_author_has_no_session() {
        let db = Database::open_in_memory().unwrap();
        let (rx, _q) = receiver(Role::Node);
        let headers = InboundHeaders {
            auth: Some(DEFAULT_HUB_SECRET.into()),
            ..Default::default()
        };
        let env = envelope(
            ModelKind::User,
            SyncAction::Create,
            SyncPayload::One(user(Uuid::new_v4(), "a")),
        );
        let ack = rx.receive(&db, &headers, env).unwrap();
        assert!(ack.session_id.is_none());
        assert!(db.list_sync_sessions(10).unwrap().is_empty());
    }

    #[test]
    fn test_batch_with_one_bad_record_is_partial() {
        let db = Database::open_in_memory().unwrap();
        let n1 = endpoint(&db, "node1");
        let (rx, _q) = receiver(Role::Hub);
        let ok1 = Uuid::new_v4();
        let ok2 = Uuid::new_v4();

        let records = vec![
            user(ok1, "u1"),
            obj(json!({"id": Uuid::new_v4().to_string(), "username": "u2", "created_at": "garbage"})),
            user(ok2, "u3"),
        ];
        let env = envelope(ModelKind::User, SyncAction::Update, SyncPayload::Batch(records));
        let ack = rx.receive(&db, &with_key(&n1.api_key), env).unwrap();

        assert_eq!(ack.status, AckStatus::Partial);
        assert_eq!(ack.applied, 2);
        assert_eq!(ack.failures.len(), 1);
        assert_eq!(ack.failures[0].index, 1);
        assert_eq!(ack.failures[0].kind, FailureKind::Malformed);
        assert!(db.user_exists(ok1).unwrap());
        assert!(db.user_exists(ok2).unwrap());

        let session = db.get_sync_session(ack.session_id.unwrap()).unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.records_synced, 2);
    }

    #[test]
    fn test_pulled_batch_applies_without_relay() {
        let db = Database::open_in_memory().unwrap();
        endpoint(&db, "node1");
        let (rx, mut queue) = receiver(Role::Node);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let env = envelope(
            ModelKind::User,
            SyncAction::Update,
            SyncPayload::Batch(vec![user(a, "a"), user(b, "b")]),
        );
        let ack = rx.apply_pulled(&db, env).unwrap();

        assert_eq!(ack.status, AckStatus::Success);
        assert_eq!(ack.applied, 2);
        assert!(db.user_exists(a).unwrap());
        assert!(db.user_exists(b).unwrap());
        assert!(ack.session_id.is_none());
        assert!(queue.try_recv().is_err());
        assert_eq!(origin::get_origin(), Origin::Local);
    }

    #[test]
    fn test_empty_batch_is_bad_request() {
        let db = Database::open_in_memory().unwrap();
        let n1 = endpoint(&db, "node1");
        let (rx, _q) = receiver(Role::Hub);
        let env = envelope(ModelKind::User, SyncAction::Create, SyncPayload::Batch(Vec::new()));
        assert!(matches!(
            rx.receive(&db, &with_key(&n1.api_key), env),
            Err(ReceiveError::BadRequest(_))
        ));
    }

    #[test]
    fn test_delete_of_missing_row_succeeds() {
        let db = Database::open_in_memory().unwrap();
        let n1 = endpoint(&db, "node1");
        let (rx, _q) = receiver(Role::Hub);
        let env = envelope(
            ModelKind::Message,
            SyncAction::Delete,
            SyncPayload::One(obj(json!({"id": Uuid::new_v4().to_string()}))),
        );
        let ack = rx.receive(&db, &with_key(&n1.api_key), env).unwrap();
        assert_eq!(ack.status, AckStatus::Success);
        assert_eq!(ack.applied, 1);
    }
}
