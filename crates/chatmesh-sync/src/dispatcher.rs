//! Outbound change dispatch.
//!
//! [`Dispatcher::notify`] runs synchronously right after a write commits. It
//! decides, from the role and the current [`Origin`], which endpoints must
//! hear about the change and queues one [`Delivery`] per target on a bounded
//! channel. A separate pump task drains the channel with a fixed number of
//! concurrent pushes. Nothing is retried: a failed delivery is logged and
//! dropped, and the periodic bulk resync catches the peer up later.

use std::sync::Arc;

use chatmesh_shared::constants::{
    HEADER_AUTH, HEADER_NODE_API_KEY, HEADER_ORIGIN, HEADER_ORIGIN_NODE_API_KEY,
    ORIGIN_CENTRAL_SERVER,
};
use chatmesh_shared::{ModelKind, Role, SyncAction, SyncEnvelope, SyncRecord};
use chatmesh_store::{Database, StoreError};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::identity::LocalIdentity;
use crate::origin::{self, Origin};
use crate::transport::HttpTransport;

/// A committed local mutation of one or more entities of the same kind.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub kind: ModelKind,
    pub action: SyncAction,
    pub records: Vec<SyncRecord>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeSet {
    pub fn new(kind: ModelKind, action: SyncAction, records: Vec<SyncRecord>) -> Self {
        Self {
            kind,
            action,
            records,
            timestamp: Utc::now(),
        }
    }
}

/// One queued push to one endpoint.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub target_id: Option<Uuid>,
    pub target_name: String,
    /// Base URL of the target.
    pub base_url: String,
    pub headers: Vec<(&'static str, String)>,
    pub envelope: SyncEnvelope,
}

/// Decides where local changes go. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    identity: Arc<LocalIdentity>,
    queue: mpsc::Sender<Delivery>,
}

impl Dispatcher {
    /// Create a dispatcher with a bounded queue of `capacity` deliveries.
    /// The receiver goes to [`spawn_delivery_workers`] (or to a test).
    pub fn new(identity: Arc<LocalIdentity>, capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        (Self { identity, queue }, rx)
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    /// Plan and enqueue deliveries for `change` under the current origin.
    /// Never blocks and never fails the caller. Returns how many deliveries
    /// were queued.
    pub fn notify(&self, db: &Database, change: ChangeSet) -> usize {
        let origin = origin::get_origin();
        let deliveries = match self.plan(db, &change, &origin) {
            Ok(deliveries) => deliveries,
            Err(e) => {
                warn!(model = %change.kind, error = %e, "could not plan sync deliveries");
                return 0;
            }
        };

        let mut queued = 0;
        for delivery in deliveries {
            let target = delivery.target_name.clone();
            match self.queue.try_send(delivery) {
                Ok(()) => queued += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(target = %target, model = %change.kind, "delivery queue full; dropping");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(target = %target, "delivery queue closed; dropping");
                }
            }
        }
        queued
    }

    /// Work out the deliveries for `change` as if it originated at `origin`.
    pub fn plan(
        &self,
        db: &Database,
        change: &ChangeSet,
        origin: &Origin,
    ) -> Result<Vec<Delivery>, StoreError> {
        if !self.identity.sync_enabled {
            debug!(model = %change.kind, "sync disabled; not dispatching");
            return Ok(Vec::new());
        }
        if change.records.is_empty() {
            return Ok(Vec::new());
        }

        match self.identity.role {
            Role::Node => self.plan_for_node(db, change, origin),
            Role::Hub => self.plan_for_hub(db, change, origin),
        }
    }

    /// A node forwards only organic writes, and only to the hub.
    fn plan_for_node(
        &self,
        db: &Database,
        change: &ChangeSet,
        origin: &Origin,
    ) -> Result<Vec<Delivery>, StoreError> {
        if !origin.is_local() {
            debug!(
                model = %change.kind,
                origin = %origin.name(),
                "change came from elsewhere; not forwarding"
            );
            return Ok(Vec::new());
        }

        let Some(hub_url) = self.identity.hub_url.clone() else {
            debug!("no hub configured; not forwarding");
            return Ok(Vec::new());
        };
        let Some(me) = self.identity.own_endpoint(db)? else {
            debug!("no credentials from the hub yet; not forwarding");
            return Ok(Vec::new());
        };
        if !me.sync_enabled {
            return Ok(Vec::new());
        }

        Ok(vec![Delivery {
            target_id: None,
            target_name: "hub".into(),
            base_url: hub_url,
            headers: vec![
                (HEADER_NODE_API_KEY, me.api_key.clone()),
                (HEADER_ORIGIN, self.identity.name.clone()),
            ],
            envelope: envelope(change, Some(me.id), false),
        }])
    }

    /// The hub fans out to every other online node. Changes that came from
    /// a node keep that node's key so the receiver can see who wrote them.
    fn plan_for_hub(
        &self,
        db: &Database,
        change: &ChangeSet,
        origin: &Origin,
    ) -> Result<Vec<Delivery>, StoreError> {
        let (exclude, author) = match origin {
            Origin::Hub { .. } => {
                debug!(model = %change.kind, "hub pass-through origin; not re-broadcasting");
                return Ok(Vec::new());
            }
            Origin::Local => (None, None),
            Origin::Peer { node_id, .. } => (Some(*node_id), db.find_endpoint(*node_id)?),
        };

        let targets = db.list_sync_targets(exclude)?;
        if targets.is_empty() {
            debug!(model = %change.kind, origin = %origin.name(), "no other online nodes");
            return Ok(Vec::new());
        }

        let mut headers = vec![
            (HEADER_AUTH, self.identity.hub_secret.clone()),
            (HEADER_ORIGIN, ORIGIN_CENTRAL_SERVER.to_string()),
        ];
        if let Some(author) = &author {
            headers.push((HEADER_NODE_API_KEY, author.api_key.clone()));
            headers.push((HEADER_ORIGIN_NODE_API_KEY, author.api_key.clone()));
        }

        let env = envelope(change, exclude, exclude.is_some());
        Ok(targets
            .into_iter()
            .map(|target| Delivery {
                target_id: Some(target.id),
                target_name: target.name,
                base_url: target.url,
                headers: headers.clone(),
                envelope: env.clone(),
            })
            .collect())
    }
}

fn envelope(change: &ChangeSet, origin_node_id: Option<Uuid>, relayed: bool) -> SyncEnvelope {
    SyncEnvelope {
        model: change.kind,
        action: change.action,
        data: change.records.clone().into(),
        timestamp: change.timestamp,
        origin_node_id,
        relayed,
        sync_type: None,
    }
}

/// Drain the delivery queue with at most `concurrency` pushes in flight.
///
/// The pump ends when every [`Dispatcher`] clone has been dropped.
pub fn spawn_delivery_workers(
    mut rx: mpsc::Receiver<Delivery>,
    transport: HttpTransport,
    concurrency: usize,
) -> JoinHandle<()> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));

    tokio::spawn(async move {
        while let Some(delivery) = rx.recv().await {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let transport = transport.clone();

            tokio::spawn(async move {
                let _permit = permit;
                deliver(&transport, delivery).await;
            });
        }
        debug!("delivery queue closed; pump exiting");
    })
}

async fn deliver(transport: &HttpTransport, delivery: Delivery) {
    let model = delivery.envelope.model;
    let action = delivery.envelope.action;
    match transport.push(&delivery).await {
        Ok(ack) => debug!(
            target = %delivery.target_name,
            model = %model,
            action = %action,
            applied = ack.applied,
            "sync delivered"
        ),
        Err(e) => warn!(
            target = %delivery.target_name,
            model = %model,
            action = %action,
            error = %e,
            "sync delivery failed"
        ),
    }
}
