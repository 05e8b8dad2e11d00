use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chatmesh_shared::constants::{
    HEADER_AUTH, HEADER_NODE_API_KEY, HEADER_ORIGIN, HEADER_ORIGIN_NODE_API_KEY,
};
use chatmesh_shared::{timestamp, AckStatus, FailureKind, ModelKind, SyncAck, SyncEnvelope};
use chatmesh_sync::{resync, InboundHeaders};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::AppState;
use crate::error::ServerError;

pub fn inbound_headers(headers: &HeaderMap) -> InboundHeaders {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    InboundHeaders {
        node_api_key: get(HEADER_NODE_API_KEY),
        origin_node_api_key: get(HEADER_ORIGIN_NODE_API_KEY),
        auth: get(HEADER_AUTH),
        origin: get(HEADER_ORIGIN),
    }
}

/// `POST /sync/receive`
///
/// 200 when at least one record was applied. When none was: 400 if every
/// record was malformed, 500 otherwise. The body is the ack either way.
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<SyncAck>), ServerError> {
    let inbound = inbound_headers(&headers);
    let envelope: SyncEnvelope = serde_json::from_slice(&body)
        .map_err(|e| ServerError::BadRequest(format!("Malformed envelope: {e}")))?;

    let receiver = state.receiver.clone();
    let ack = state
        .blocking(move |db| receiver.receive(db, &inbound, envelope))
        .await??;

    let status = match ack.status {
        AckStatus::Success | AckStatus::Partial => StatusCode::OK,
        AckStatus::Failed
            if ack
                .failures
                .iter()
                .all(|f| f.kind == FailureKind::Malformed) =>
        {
            StatusCode::BAD_REQUEST
        }
        AckStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Ok((status, Json(ack)))
}

#[derive(Debug, Deserialize)]
pub struct PullQuery {
    pub since: Option<String>,
}

/// `GET /sync/pull?since=<rfc3339>` (hub)
///
/// Catch-up for a node that missed live relays. Answers every batch the hub
/// holds that changed after `since` (everything without it), in dependency
/// order. The caller authenticates with its own `X-Node-API-Key`.
pub async fn pull(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PullQuery>,
) -> Result<Json<Vec<SyncEnvelope>>, ServerError> {
    let since = query
        .since
        .filter(|s| !s.trim().is_empty())
        .map(|s| timestamp::parse(&s))
        .transpose()
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;
    let Some(key) = inbound_headers(&headers).node_api_key else {
        warn!("pull without credentials");
        return Err(ServerError::Unauthorized("Missing API key".into()));
    };

    let envelopes = state
        .blocking(move |db| -> Result<Vec<SyncEnvelope>, ServerError> {
            let Some(node) = db.find_endpoint_by_api_key(&key)? else {
                warn!("pull with an unknown API key");
                return Err(ServerError::Unauthorized("Invalid API key".into()));
            };
            let envelopes =
                resync::plan_batches(db, &ModelKind::DEPENDENCY_ORDER, since, None)?;
            debug!(node = %node.name, batches = envelopes.len(), "serving pull");
            Ok(envelopes)
        })
        .await??;

    Ok(Json(envelopes))
}
