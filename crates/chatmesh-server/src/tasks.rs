//! Background tasks, outside any request context.

use std::time::Duration;

use chatmesh_shared::constants::{HEADER_NODE_API_KEY, HEADER_ORIGIN};
use chatmesh_shared::protocol::{HeartbeatRequest, RegistrationRequest};
use chatmesh_shared::{ModelKind, NodeStatus, SyncEnvelope};
use chatmesh_store::{Database, NodeEndpoint};
use chatmesh_sync::resync::{self, PassReport};
use chatmesh_sync::{Delivery, SyncReceiver};
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::fanout;
use crate::monitor::{self, HostSampler};

const SWEEP_INTERVAL_SECS: u64 = 30;
const REGISTRATION_RETRY_SECS: u64 = 10;
const SEED_DELAY_SECS: u64 = 5;
/// Every n-th resync pass pulls from the hub without a watermark.
const FULL_PULL_EVERY: u64 = 12;

/// Start the tasks for this process's role.
pub fn spawn_all(state: &AppState) -> Vec<JoinHandle<()>> {
    if state.config.is_hub() {
        vec![
            tokio::spawn(liveness_sweep(state.clone())),
            tokio::spawn(seed_on_startup(state.clone())),
        ]
    } else {
        vec![
            tokio::spawn(register_with_hub(state.clone())),
            tokio::spawn(heartbeat_loop(state.clone())),
            tokio::spawn(auto_resync(state.clone())),
        ]
    }
}

async fn own_endpoint(state: &AppState) -> Option<NodeEndpoint> {
    let identity = state.identity.clone();
    match state.blocking(move |db| identity.own_endpoint(db)).await {
        Ok(Ok(endpoint)) => endpoint,
        Ok(Err(e)) => {
            warn!(error = %e, "Could not read own endpoint");
            None
        }
        Err(e) => {
            warn!(error = %e, "Could not read own endpoint");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

async fn liveness_sweep(state: AppState) {
    let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
    loop {
        interval.tick().await;
        match state.blocking(|db| monitor::sweep_stale(db, Utc::now())).await {
            Ok(Ok(flipped)) if !flipped.is_empty() => {
                debug!(count = flipped.len(), "Liveness sweep flipped nodes offline")
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Liveness sweep failed"),
            Err(e) => warn!(error = %e, "Liveness sweep failed"),
        }
        if let Ok(Err(e)) = state.blocking(|db| monitor::prune_history(db, Utc::now())).await {
            warn!(error = %e, "Heartbeat history prune failed");
        }
        state.monitor.purge_expired().await;
    }
}

async fn seed_on_startup(state: AppState) {
    tokio::time::sleep(Duration::from_secs(SEED_DELAY_SECS)).await;
    info!("Seeding nodes with topology, users and sessions");
    fanout::seed_nodes(state).await;
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Post the registration until the hub answers, unless the hub already
/// pushed this node its identity.
async fn register_with_hub(state: AppState) {
    let Some(hub_url) = state.config.hub_url.clone() else {
        warn!("HUB_URL not set; not registering");
        return;
    };

    let req = RegistrationRequest {
        node_name: state.config.node_name.clone(),
        node_url: state.config.node_url.clone(),
        admin_email: String::new(),
        description: format!("chatmesh node {}", state.config.node_name),
        max_rooms_capacity: state.config.max_rooms,
    };

    loop {
        if own_endpoint(&state).await.is_some() {
            debug!("Already approved by the hub");
            return;
        }
        match state.transport.register(&hub_url, &req).await {
            Ok(resp) => {
                info!(
                    registration = %resp.registration_id,
                    status = %resp.status,
                    "Registered with hub"
                );
                return;
            }
            Err(e) => warn!(error = %e, "Registration failed; retrying"),
        }
        tokio::time::sleep(Duration::from_secs(REGISTRATION_RETRY_SECS)).await;
    }
}

async fn heartbeat_loop(state: AppState) {
    let Some(hub_url) = state.config.hub_url.clone() else {
        return;
    };
    let mut sampler = HostSampler::new();
    let mut interval =
        tokio::time::interval(Duration::from_secs(state.config.heartbeat_interval_secs));

    loop {
        interval.tick().await;

        let Some(me) = own_endpoint(&state).await else {
            debug!("No identity from the hub yet; skipping heartbeat");
            continue;
        };

        let own_id = me.id;
        let current_rooms = match state
            .blocking(move |db| db.count_active_rooms(Some(own_id)))
            .await
        {
            Ok(Ok(n)) => n,
            _ => me.current_rooms,
        };
        let max_rooms = state.config.max_rooms;
        let load = if max_rooms > 0 {
            current_rooms as f64 / max_rooms as f64 * 100.0
        } else {
            0.0
        };

        let body = HeartbeatRequest {
            status: NodeStatus::Online,
            load,
            current_rooms,
            max_rooms,
            system_metrics: Some(sampler.sample()),
        };

        match state
            .transport
            .send_heartbeat(&hub_url, me.id, &me.api_key, &body)
            .await
        {
            Ok(_) => debug!(load, current_rooms, "Heartbeat sent"),
            Err(e) => warn!(error = %e, "Heartbeat failed"),
        }
    }
}

/// Push everything changed since the last successful pass to the hub, then
/// pull what the hub gathered from the other nodes meanwhile.
async fn auto_resync(state: AppState) {
    let Some(hub_url) = state.config.hub_url.clone() else {
        return;
    };
    if !state.config.sync_enabled {
        return;
    }
    let mut interval =
        tokio::time::interval(Duration::from_secs(state.config.auto_sync_interval_secs.max(1)));
    let mut passes: u64 = 0;

    loop {
        interval.tick().await;
        let Some(me) = own_endpoint(&state).await else {
            continue;
        };
        // Rows keep their author's timestamps, so a row relayed late can be
        // older than the watermark. A periodic full pull picks those up.
        let full_pull = passes % FULL_PULL_EVERY == 0;
        passes += 1;
        if let Err(e) = resync_once(&state, &hub_url, &me, full_pull).await {
            warn!(error = %e, "Bulk resync aborted");
        }
    }
}

async fn resync_once(
    state: &AppState,
    hub_url: &str,
    me: &NodeEndpoint,
    full_pull: bool,
) -> anyhow::Result<PassReport> {
    let started = Utc::now();
    let since = me.last_sync;
    let own_id = me.id;

    let envelopes = state
        .blocking(move |db| {
            resync::plan_batches(db, &ModelKind::DEPENDENCY_ORDER, since, Some(own_id))
        })
        .await??;

    let headers = vec![
        (HEADER_NODE_API_KEY, me.api_key.clone()),
        (HEADER_ORIGIN, state.identity.name.clone()),
    ];
    let mut pushed = PassReport::default();
    for envelope in envelopes {
        let sent = envelope.data.len();
        let delivery = Delivery {
            target_id: None,
            target_name: "hub".into(),
            base_url: hub_url.to_string(),
            headers: headers.clone(),
            envelope,
        };
        let ack = state.transport.push(&delivery).await?;
        if !ack.failures.is_empty() {
            warn!(
                model = %ack.model,
                failed = ack.failures.len(),
                "Hub skipped records of a resync batch"
            );
        }
        pushed.record_ack(sent, &ack);
    }

    let pull_since = if full_pull { None } else { since };
    let pulled = pull_from_hub(state, hub_url, &me.api_key, pull_since).await?;

    let mut report = pushed.clone();
    report.merge(&pulled);
    if report.complete() {
        state
            .blocking(move |db| db.set_last_sync(own_id, started))
            .await??;
        info!(
            pushed = pushed.records,
            pulled = pulled.records,
            kind = if since.is_some() { resync::INCREMENTAL } else { resync::FULL },
            "Bulk resync complete"
        );
    } else {
        warn!(
            batches = report.batches,
            incomplete = report.incomplete,
            applied = report.applied,
            records = report.records,
            "Bulk resync incomplete; keeping the previous watermark"
        );
    }
    Ok(report)
}

/// Fetch the hub's batches and apply them locally. Pulled changes carry the
/// hub's origin and are never pushed back.
async fn pull_from_hub(
    state: &AppState,
    hub_url: &str,
    api_key: &str,
    since: Option<chrono::DateTime<Utc>>,
) -> anyhow::Result<PassReport> {
    let envelopes = state.transport.pull(hub_url, api_key, since).await?;
    let receiver = state.receiver.clone();
    let report = state
        .blocking(move |db| apply_batches(&receiver, db, envelopes))
        .await?;
    Ok(report)
}

/// Apply pulled batches in the order the hub sent them.
fn apply_batches(
    receiver: &SyncReceiver,
    db: &Database,
    envelopes: Vec<SyncEnvelope>,
) -> PassReport {
    let mut report = PassReport::default();
    for envelope in envelopes {
        let sent = envelope.data.len();
        let model = envelope.model;
        match receiver.apply_pulled(db, envelope) {
            Ok(ack) => report.record_ack(sent, &ack),
            Err(e) => {
                warn!(error = %e, model = %model, "Pulled batch not applied");
                report.record_error(sent);
            }
        }
    }
    report
}
