//! Hub endpoints: registration, heartbeats, node status and the admin
//! approval workflow.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chatmesh_shared::constants::{HEADER_NODE_API_KEY, LOG_CATEGORY_NODE, RECENT_HEARTBEATS};
use chatmesh_shared::protocol::{
    HeartbeatRequest, HeartbeatResponse, RegistrationRequest, RegistrationResponse, SystemMetrics,
};
use chatmesh_shared::{LogLevel, NodeStatus, RegistrationStatus};
use chatmesh_store::{NodeEndpoint, NodeHeartbeat, NodeRegistration, SystemLog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::{fanout, registry};

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegistrationRequest>,
) -> Result<Json<RegistrationResponse>, ServerError> {
    if req.node_name.trim().is_empty() || req.node_url.trim().is_empty() {
        return Err(ServerError::BadRequest("Name and URL are required".into()));
    }

    let (reg, created) = state
        .blocking(move |db| registry::register(db, &req))
        .await??;

    Ok(Json(RegistrationResponse {
        status: reg.status.as_str().to_string(),
        registration_id: reg.id,
        message: Some(
            if created {
                "Registration submitted for approval"
            } else {
                "Registration already on file"
            }
            .to_string(),
        ),
    }))
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(node_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ServerError> {
    let Some(api_key) = headers
        .get(HEADER_NODE_API_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        warn!(node = %node_id, "Heartbeat without API key");
        return Err(ServerError::Unauthorized("API key required".into()));
    };

    let now = Utc::now();
    let HeartbeatRequest {
        status,
        load,
        current_rooms,
        max_rooms,
        system_metrics,
    } = req;

    let metrics = system_metrics.clone();
    let endpoint = state
        .blocking(move |db| -> Result<NodeEndpoint, ServerError> {
            let Some(endpoint) = db.find_endpoint(node_id)? else {
                return Err(ServerError::NotFound("Node not found".into()));
            };
            if !bool::from(api_key.as_bytes().ct_eq(endpoint.api_key.as_bytes())) {
                warn!(node = %endpoint.name, "Heartbeat with a mismatched API key");
                return Err(ServerError::Forbidden("Invalid API key".into()));
            }
            db.in_transaction(|db| -> Result<(), ServerError> {
                db.record_heartbeat(node_id, status, load, current_rooms, max_rooms, now)?;
                let updated = db.get_endpoint(node_id)?;
                db.record_node_heartbeat(&updated, metrics.as_ref(), now)?;
                if endpoint.status != status {
                    db.log_event(
                        LogLevel::Info,
                        LOG_CATEGORY_NODE,
                        &format!("Node {}: {} -> {}", endpoint.name, endpoint.status, status),
                        None,
                        Some(node_id),
                    )?;
                }
                Ok(())
            })?;
            Ok(endpoint)
        })
        .await??;

    if endpoint.status != status {
        info!(node = %endpoint.name, from = %endpoint.status, to = %status, "Node status changed");
    }
    state
        .monitor
        .record(node_id, &endpoint.name, load, system_metrics)
        .await;

    Ok(Json(HeartbeatResponse {
        status: "success".into(),
        message: "Heartbeat received".into(),
        timestamp: now,
    }))
}

// ---------------------------------------------------------------------------
// Node status
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct NodeSummary {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub status: NodeStatus,
    pub load: f64,
    pub current_rooms: i64,
    pub max_rooms: i64,
    pub available_capacity: i64,
    pub sync_enabled: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_sync: Option<DateTime<Utc>>,
    pub health_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_metrics: Option<SystemMetrics>,
}

async fn summarize(state: &AppState, e: NodeEndpoint, with_metrics: bool) -> NodeSummary {
    let health_score = state.monitor.health(e.id).await;
    let system_metrics = if with_metrics {
        state.monitor.metrics(e.id).await
    } else {
        None
    };
    NodeSummary {
        id: e.id,
        available_capacity: e.available_capacity(),
        name: e.name,
        url: e.url,
        status: e.status,
        load: e.load,
        current_rooms: e.current_rooms,
        max_rooms: e.max_rooms,
        sync_enabled: e.sync_enabled,
        last_heartbeat: e.last_heartbeat,
        last_sync: e.last_sync,
        health_score,
        system_metrics,
    }
}

pub async fn list_nodes(
    State(state): State<AppState>,
) -> Result<Json<Vec<NodeSummary>>, ServerError> {
    let endpoints = state.blocking(|db| db.list_endpoints()).await??;
    let mut nodes = Vec::with_capacity(endpoints.len());
    for e in endpoints {
        nodes.push(summarize(&state, e, false).await);
    }
    Ok(Json(nodes))
}

/// One node with its recent heartbeat history.
#[derive(Serialize)]
pub struct NodeDetail {
    #[serde(flatten)]
    pub node: NodeSummary,
    pub heartbeat_count: i64,
    pub recent_heartbeats: Vec<NodeHeartbeat>,
}

pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<NodeDetail>, ServerError> {
    let found = state
        .blocking(move |db| -> chatmesh_store::Result<_> {
            let Some(endpoint) = db.find_endpoint(id)? else {
                return Ok(None);
            };
            let count = db.count_node_heartbeats(id)?;
            let recent = db.list_node_heartbeats(id, RECENT_HEARTBEATS)?;
            Ok(Some((endpoint, count, recent)))
        })
        .await??;
    let Some((endpoint, heartbeat_count, recent_heartbeats)) = found else {
        return Err(ServerError::NotFound("Node not found".into()));
    };
    Ok(Json(NodeDetail {
        node: summarize(&state, endpoint, true).await,
        heartbeat_count,
        recent_heartbeats,
    }))
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

#[derive(Deserialize)]
pub struct RegistrationFilter {
    pub status: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct DecisionRequest {
    pub approved_by: Option<String>,
}

impl DecisionRequest {
    fn approver(self) -> String {
        self.approved_by
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "admin".to_string())
    }
}

#[derive(Serialize)]
pub struct ApprovalResponse {
    pub registration_id: Uuid,
    pub node: NodeSummary,
}

#[derive(Deserialize)]
pub struct NodeUpdate {
    pub url: Option<String>,
    pub max_rooms: Option<i64>,
    pub sync_enabled: Option<bool>,
    pub status: Option<NodeStatus>,
}

pub async fn admin_list_registrations(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(filter): Query<RegistrationFilter>,
) -> Result<Json<Vec<NodeRegistration>>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let status = filter
        .status
        .map(|s| s.parse::<RegistrationStatus>())
        .transpose()
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;

    let regs = state
        .blocking(move |db| db.list_registrations(status))
        .await??;
    Ok(Json(regs))
}

pub async fn admin_approve(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<DecisionRequest>>,
) -> Result<Json<ApprovalResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let approver = body.map(|Json(b)| b).unwrap_or_default().approver();

    let endpoint = state
        .blocking(move |db| registry::approve(db, id, &approver))
        .await??;

    tokio::spawn(fanout::bootstrap_node(state.clone(), endpoint.clone()));

    Ok(Json(ApprovalResponse {
        registration_id: id,
        node: summarize(&state, endpoint, false).await,
    }))
}

pub async fn admin_reject(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<DecisionRequest>>,
) -> Result<Json<NodeRegistration>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let approver = body.map(|Json(b)| b).unwrap_or_default().approver();

    let reg = state
        .blocking(move |db| registry::reject(db, id, &approver))
        .await??;
    Ok(Json(reg))
}

pub async fn admin_update_node(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<NodeUpdate>,
) -> Result<Json<NodeSummary>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let endpoint = state
        .blocking(move |db| -> Result<NodeEndpoint, ServerError> {
            let mut endpoint = db.get_endpoint(id)?;
            if let Some(url) = update.url.filter(|u| !u.trim().is_empty()) {
                endpoint.url = url;
            }
            if let Some(max_rooms) = update.max_rooms {
                if max_rooms < 0 {
                    return Err(ServerError::BadRequest("max_rooms must be >= 0".into()));
                }
                endpoint.max_rooms = max_rooms;
            }
            if let Some(sync_enabled) = update.sync_enabled {
                endpoint.sync_enabled = sync_enabled;
            }
            if let Some(status) = update.status {
                endpoint.status = status;
            }
            endpoint.updated_at = Utc::now();
            db.update_endpoint(&endpoint)?;
            Ok(endpoint)
        })
        .await??;

    info!(node = %endpoint.name, "Node updated");
    tokio::spawn(fanout::bootstrap_node(state.clone(), endpoint.clone()));

    Ok(Json(summarize(&state, endpoint, false).await))
}

pub async fn admin_delete_node(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let removed = state
        .blocking(move |db| registry::remove_endpoint(db, id))
        .await??;

    state.monitor.forget(id).await;
    tokio::spawn(fanout::announce_removal(state.clone(), removed));

    Ok(Json(serde_json::json!({ "deleted": true, "id": id })))
}

#[derive(Deserialize)]
pub struct LogQuery {
    pub limit: Option<u32>,
}

/// `GET /admin/logs`: latest system log entries, newest first.
pub async fn admin_system_logs(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<SystemLog>>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let limit = query.limit.unwrap_or(100).min(1000);
    let logs = state.blocking(move |db| db.list_system_logs(limit)).await??;
    Ok(Json(logs))
}
