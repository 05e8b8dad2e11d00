use std::sync::Arc;

use axum::{
    extract::State,
    http::Method,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chatmesh_shared::Role;
use chatmesh_store::Database;
use chatmesh_sync::{
    Delivery, Dispatcher, HttpTransport, LocalIdentity, LocalWriter, SharedStore, SyncReceiver,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::monitor::Monitor;
use crate::{local_api, nodes_api, peers_api, sync_api};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub identity: Arc<LocalIdentity>,
    pub store: SharedStore,
    pub dispatcher: Dispatcher,
    pub receiver: SyncReceiver,
    pub writer: LocalWriter,
    pub transport: HttpTransport,
    pub monitor: Monitor,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire every service around an opened database. The returned receiver
    /// is the outbound delivery queue, to be drained by
    /// [`chatmesh_sync::spawn_delivery_workers`].
    pub fn new(
        config: ServerConfig,
        db: Database,
    ) -> anyhow::Result<(Self, mpsc::Receiver<Delivery>)> {
        let identity = config.identity();
        let store = SharedStore::new(db);
        let (dispatcher, queue) = Dispatcher::new(identity.clone(), config.delivery_queue);
        let receiver =
            SyncReceiver::new(identity.clone(), dispatcher.clone(), config.conflict_policy);
        let writer = LocalWriter::new(store.clone(), dispatcher.clone());

        let state = Self {
            config: Arc::new(config),
            identity,
            store,
            dispatcher,
            receiver,
            writer,
            transport: HttpTransport::new()?,
            monitor: Monitor::new(),
            started_at: Utc::now(),
        };
        Ok((state, queue))
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Database) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || store.with(f)).await?)
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let common = Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/sync/receive", post(sync_api::receive));

    let role_routes = match state.identity.role {
        Role::Hub => Router::new()
            .route("/sync/pull", get(sync_api::pull))
            .route("/register", post(nodes_api::register))
            .route("/heartbeat/:node_id", patch(nodes_api::heartbeat))
            .route("/nodes", get(nodes_api::list_nodes))
            .route("/nodes/:id", get(nodes_api::get_node))
            .route("/admin/registrations", get(nodes_api::admin_list_registrations))
            .route(
                "/admin/registrations/:id/approve",
                post(nodes_api::admin_approve),
            )
            .route(
                "/admin/registrations/:id/reject",
                post(nodes_api::admin_reject),
            )
            .route(
                "/admin/nodes/:id",
                patch(nodes_api::admin_update_node).delete(nodes_api::admin_delete_node),
            )
            .route("/admin/logs", get(nodes_api::admin_system_logs)),
        Role::Node => Router::new()
            .route("/meta/set", post(peers_api::set_meta))
            .route("/peer/init", post(peers_api::init_peers))
            .route("/peer/delete", post(peers_api::delete_peer)),
    };

    common
        .merge(role_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Router for the loopback write surface. Served on its own listener, never
/// merged into the public router.
pub fn build_local_router(state: AppState) -> Router {
    Router::new()
        .route("/local/:model", post(local_api::upsert))
        .route("/local/:model/:id", delete(local_api::remove))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    role: Role,
    name: String,
    version: &'static str,
    database: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    role: Role,
    url: String,
    version: &'static str,
    sync_enabled: bool,
    conflict_policy: &'static str,
    uptime_secs: i64,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let reachable = matches!(state.blocking(|db| db.ping()).await, Ok(Ok(())));
    Json(HealthResponse {
        status: if reachable { "ok" } else { "degraded" },
        role: state.identity.role,
        name: state.identity.name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        database: if reachable { "ok" } else { "unreachable" },
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.identity.name.clone(),
        role: state.identity.role,
        url: state.identity.url.clone(),
        version: env!("CARGO_PKG_VERSION"),
        sync_enabled: state.identity.sync_enabled,
        conflict_policy: match state.receiver.policy() {
            chatmesh_sync::ConflictPolicy::Arrival => "arrival",
            chatmesh_sync::ConflictPolicy::Timestamp => "timestamp",
        },
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub async fn serve_local(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_local_router(state);

    info!(addr = %addr, "Starting local write listener");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
