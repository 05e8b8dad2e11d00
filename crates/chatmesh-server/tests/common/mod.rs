//! Test utilities

use axum::{body::Body, http::Response, Router};
use chatmesh_shared::{NodeStatus, Role};
use chatmesh_store::{Database, NodeEndpoint};
use chatmesh_sync::Delivery;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::mpsc::Receiver;
use uuid::Uuid;

pub use chatmesh_server::{api, api::AppState, config::ServerConfig};

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const HUB_SECRET: &str = "test-hub-secret";

pub struct TestApp {
    pub state: AppState,
    pub queue: Receiver<Delivery>,
}

impl TestApp {
    pub fn router(&self) -> Router {
        api::build_router(self.state.clone())
    }

    pub fn local_router(&self) -> Router {
        api::build_local_router(self.state.clone())
    }

    pub fn insert_endpoint(&self, endpoint: &NodeEndpoint) {
        self.state
            .store
            .with(|db| db.insert_endpoint(endpoint))
            .expect("Failed to insert endpoint");
    }
}

/// Create a process of the given role over an in-memory database.
pub fn create_test_app(role: Role) -> TestApp {
    let db = Database::open_in_memory().expect("Failed to create test database");

    let config = ServerConfig {
        role,
        node_name: match role {
            Role::Hub => "CENTRAL_HUB".into(),
            Role::Node => "node-test".into(),
        },
        hub_url: (role == Role::Node).then(|| "http://127.0.0.1:9".to_string()),
        hub_secret: HUB_SECRET.into(),
        admin_token: Some(ADMIN_TOKEN.into()),
        ..ServerConfig::default()
    };

    let (state, queue) = AppState::new(config, db).expect("Failed to build app state");
    TestApp { state, queue }
}

pub fn endpoint(name: &str) -> NodeEndpoint {
    let now = Utc::now();
    NodeEndpoint {
        id: Uuid::new_v4(),
        name: name.into(),
        // Nothing listens on the discard port, so background pushes fail fast.
        url: "http://127.0.0.1:9".into(),
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
    }
}

/// Helper to extract JSON body from response
pub async fn response_body(response: Response<Body>) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap_or(Value::Null)
}
