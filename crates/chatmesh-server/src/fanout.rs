//! Hub-to-node control pushes: identity bootstrap, peer topology, removal
//! announcements and startup seeding.
//!
//! Every call is best effort. Failures are logged and the node catches up
//! on the next topology change or restart.

use chatmesh_shared::constants::{HEADER_AUTH, HEADER_ORIGIN, ORIGIN_CENTRAL_SERVER};
use chatmesh_shared::protocol::{NodeMeta, PeerDelete, PeerRecord};
use chatmesh_shared::ModelKind;
use chatmesh_store::NodeEndpoint;
use chatmesh_sync::{resync, Delivery};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::api::AppState;

pub fn peer_record(endpoint: &NodeEndpoint) -> PeerRecord {
    PeerRecord {
        id: endpoint.id,
        name: endpoint.name.clone(),
        url: endpoint.url.clone(),
        api_key: endpoint.api_key.clone(),
        status: endpoint.status,
        load: endpoint.load,
        current_rooms: endpoint.current_rooms,
        max_rooms: endpoint.max_rooms,
        sync_enabled: endpoint.sync_enabled,
    }
}

fn bypass_headers(state: &AppState) -> Vec<(&'static str, String)> {
    vec![
        (HEADER_AUTH, state.identity.hub_secret.clone()),
        (HEADER_ORIGIN, ORIGIN_CENTRAL_SERVER.to_string()),
    ]
}

async fn all_endpoints(state: &AppState) -> Vec<NodeEndpoint> {
    match state.blocking(|db| db.list_endpoints()).await {
        Ok(Ok(endpoints)) => endpoints,
        Ok(Err(e)) => {
            warn!(error = %e, "Could not list endpoints");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "Could not list endpoints");
            Vec::new()
        }
    }
}

/// Tell a node who it is (`/meta/set`).
pub async fn push_identity(state: &AppState, endpoint: &NodeEndpoint) {
    let meta = NodeMeta {
        id: endpoint.id,
        api_key: endpoint.api_key.clone(),
        url: endpoint.url.clone(),
        name: endpoint.name.clone(),
        current_rooms: endpoint.current_rooms,
        load: endpoint.load,
    };
    match state
        .transport
        .set_meta(&endpoint.url, &state.identity.hub_secret, &meta)
        .await
    {
        Ok(()) => info!(node = %endpoint.name, "Identity pushed to node"),
        Err(e) => warn!(node = %endpoint.name, error = %e, "Identity push failed"),
    }
}

/// Send the full endpoint list to every known node (`/peer/init`).
pub async fn push_topology(state: &AppState) {
    let endpoints = all_endpoints(state).await;
    if endpoints.is_empty() {
        debug!("No nodes to send the topology to");
        return;
    }
    let peers: Vec<PeerRecord> = endpoints.iter().map(peer_record).collect();

    let calls = endpoints.iter().map(|target| {
        let peers = &peers;
        async move {
            let result = state
                .transport
                .init_peers(&target.url, &state.identity.hub_secret, peers)
                .await;
            if let Err(e) = result {
                warn!(node = %target.name, error = %e, "Topology push failed");
            }
        }
    });
    join_all(calls).await;
    info!(nodes = endpoints.len(), "Topology pushed");
}

/// Identity first, then the topology to everyone.
pub async fn bootstrap_node(state: AppState, endpoint: NodeEndpoint) {
    push_identity(&state, &endpoint).await;
    push_topology(&state).await;
}

/// Tell every remaining node to forget `removed` (`/peer/delete`).
pub async fn announce_removal(state: AppState, removed: NodeEndpoint) {
    let body = PeerDelete {
        id: removed.id,
        api_key: removed.api_key.clone(),
    };
    let endpoints = all_endpoints(&state).await;

    let calls = endpoints.iter().map(|target| {
        let body = &body;
        let state = &state;
        async move {
            let result = state
                .transport
                .delete_peer(&target.url, &state.identity.hub_secret, body)
                .await;
            if let Err(e) = result {
                warn!(node = %target.name, error = %e, "Peer removal push failed");
            }
        }
    });
    join_all(calls).await;
    info!(node = %removed.name, notified = endpoints.len(), "Node removal announced");
}

/// Startup seeding: topology, then every user and session, to every node.
pub async fn seed_nodes(state: AppState) {
    push_topology(&state).await;

    let planned = state
        .blocking(|db| resync::plan_batches(db, &[ModelKind::User, ModelKind::Session], None, None))
        .await;
    let envelopes = match planned {
        Ok(Ok(envelopes)) => envelopes,
        Ok(Err(e)) => {
            warn!(error = %e, "Could not collect seed data");
            return;
        }
        Err(e) => {
            warn!(error = %e, "Could not collect seed data");
            return;
        }
    };
    if envelopes.is_empty() {
        return;
    }

    let endpoints = all_endpoints(&state).await;
    let headers = bypass_headers(&state);

    let calls = endpoints.iter().map(|target| {
        let envelopes = &envelopes;
        let headers = &headers;
        let state = &state;
        async move {
            for envelope in envelopes {
                let delivery = Delivery {
                    target_id: Some(target.id),
                    target_name: target.name.clone(),
                    base_url: target.url.clone(),
                    headers: headers.clone(),
                    envelope: envelope.clone(),
                };
                if let Err(e) = state.transport.push(&delivery).await {
                    warn!(node = %target.name, model = %envelope.model, error = %e, "Seeding failed");
                    return;
                }
            }
            info!(node = %target.name, batches = envelopes.len(), "Node seeded");
        }
    });
    join_all(calls).await;
}
