//! Node endpoints the hub calls to hand out identity and topology.
//!
//! All of them require the hub bypass credential.

use axum::{extract::State, http::HeaderMap, Json};
use chatmesh_shared::constants::HEADER_AUTH;
use chatmesh_shared::protocol::{NodeMeta, PeerDelete, PeerRecord};
use chatmesh_shared::NodeStatus;
use chatmesh_store::{Database, NodeEndpoint};
use chrono::Utc;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::api::AppState;
use crate::error::ServerError;

fn verify_hub(headers: &HeaderMap, state: &AppState) -> Result<(), ServerError> {
    let presented = headers
        .get(HEADER_AUTH)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let expected = state.identity.hub_secret.as_bytes();
    if presented.is_empty() || !bool::from(presented.as_bytes().ct_eq(expected)) {
        warn!("Peer metadata call with bad hub credential");
        return Err(ServerError::Unauthorized("Invalid credentials".into()));
    }
    Ok(())
}

/// Store `incoming`, keeping local sync bookkeeping from an existing row.
fn store_peer(db: &Database, mut incoming: NodeEndpoint) -> chatmesh_store::Result<()> {
    if let Some(existing) = db.find_endpoint(incoming.id)? {
        incoming.last_sync = existing.last_sync;
        incoming.last_heartbeat = existing.last_heartbeat;
        incoming.auto_sync_interval = existing.auto_sync_interval;
        incoming.created_at = existing.created_at;
    }
    db.upsert_endpoint(&incoming)
}

fn endpoint_from_peer(peer: PeerRecord) -> NodeEndpoint {
    let now = Utc::now();
    NodeEndpoint {
        id: peer.id,
        name: peer.name,
        url: peer.url,
        status: peer.status,
        load: peer.load,
        current_rooms: peer.current_rooms,
        max_rooms: peer.max_rooms,
        last_heartbeat: None,
        api_key: peer.api_key,
        sync_enabled: peer.sync_enabled,
        auto_sync_interval: 300,
        last_sync: None,
        created_at: now,
        updated_at: now,
    }
}

/// `POST /meta/set`: the hub tells this node its id and API key.
pub async fn set_meta(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(meta): Json<NodeMeta>,
) -> Result<Json<Value>, ServerError> {
    verify_hub(&headers, &state)?;

    if meta.name != state.identity.name {
        warn!(
            pushed = %meta.name,
            configured = %state.identity.name,
            "Hub pushed identity under another name"
        );
        return Err(ServerError::BadRequest(format!(
            "Node name mismatch: configured '{}', got '{}'",
            state.identity.name, meta.name
        )));
    }

    let now = Utc::now();
    let own = NodeEndpoint {
        id: meta.id,
        name: meta.name.clone(),
        url: meta.url,
        status: NodeStatus::Online,
        load: meta.load,
        current_rooms: meta.current_rooms,
        max_rooms: state.config.max_rooms,
        last_heartbeat: None,
        api_key: meta.api_key,
        sync_enabled: true,
        auto_sync_interval: state.config.auto_sync_interval_secs as i64,
        last_sync: None,
        created_at: now,
        updated_at: now,
    };
    state.blocking(move |db| store_peer(db, own)).await??;

    info!(id = %meta.id, name = %meta.name, "Identity received from hub");
    Ok(Json(json!({ "status": "success" })))
}

/// `POST /peer/init`: full topology push.
pub async fn init_peers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(peers): Json<Vec<PeerRecord>>,
) -> Result<Json<Value>, ServerError> {
    verify_hub(&headers, &state)?;

    let count = peers.len();
    state
        .blocking(move |db| {
            db.in_transaction(|db| {
                for peer in peers {
                    store_peer(db, endpoint_from_peer(peer))?;
                }
                Ok::<_, chatmesh_store::StoreError>(())
            })
        })
        .await??;

    info!(peers = count, "Peer topology received");
    Ok(Json(json!({ "status": "success", "count": count })))
}

/// `POST /peer/delete`: forget one peer. Unknown peers are fine.
pub async fn delete_peer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PeerDelete>,
) -> Result<Json<Value>, ServerError> {
    verify_hub(&headers, &state)?;

    let id = req.id;
    let deleted = state.blocking(move |db| db.delete_endpoint(id)).await??;
    if deleted {
        info!(peer = %id, "Peer removed");
    }
    Ok(Json(json!({ "status": "success", "deleted": deleted })))
}
