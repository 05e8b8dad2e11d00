//! Integration tests for the hub and node HTTP surfaces

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use chatmesh_shared::{ModelKind, NodeStatus, RegistrationStatus, Role};
use chatmesh_store::{ChatRoom, User};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

mod common;
use common::*;

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

fn user_json(id: Uuid, username: &str) -> Value {
    let now = chatmesh_shared::timestamp::format(&Utc::now());
    json!({
        "id": id.to_string(),
        "username": username,
        "created_at": now,
        "updated_at": now,
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app(Role::Hub);

    let response = app
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["role"], "hub");
    assert_eq!(body["database"], "ok");
}

#[tokio::test]
async fn test_role_routes_are_separate() {
    let hub = create_test_app(Role::Hub);
    let node = create_test_app(Role::Node);

    let response = hub
        .router()
        .oneshot(json_request(Method::POST, "/peer/init", json!([])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = node
        .router()
        .oneshot(Request::builder().uri("/nodes").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_registration_is_idempotent() {
    let app = create_test_app(Role::Hub);
    let req = json!({
        "node_name": "node1",
        "node_url": "http://node1:8000",
        "admin_email": "ops@example.org",
        "max_rooms_capacity": 20
    });

    let first = app
        .router()
        .oneshot(json_request(Method::POST, "/register", req.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first = response_body(first).await;
    assert_eq!(first["status"], "pending");

    let second = app
        .router()
        .oneshot(json_request(Method::POST, "/register", req))
        .await
        .unwrap();
    let second = response_body(second).await;
    assert_eq!(first["registration_id"], second["registration_id"]);

    let regs = app.state.store.with(|db| db.list_registrations(None)).unwrap();
    assert_eq!(regs.len(), 1);
}

#[tokio::test]
async fn test_registration_requires_name_and_url() {
    let app = create_test_app(Role::Hub);

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/register",
            json!({ "node_name": "  ", "node_url": "http://node1:8000" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_heartbeat_authentication() {
    let app = create_test_app(Role::Hub);
    let mut node = endpoint("node1");
    node.status = NodeStatus::Offline;
    node.last_heartbeat = None;
    app.insert_endpoint(&node);

    let uri = format!("/heartbeat/{}", node.id);
    let body = json!({
        "status": "online",
        "load": 10.0,
        "current_rooms": 5,
        "max_rooms": 50,
        "system_metrics": { "cpu_usage": 95.0, "memory_usage": 40.0 }
    });

    // No key
    let response = app
        .router()
        .oneshot(json_request(Method::PATCH, &uri, body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Unknown node
    let mut req = json_request(
        Method::PATCH,
        &format!("/heartbeat/{}", Uuid::new_v4()),
        body.clone(),
    );
    req.headers_mut()
        .insert("x-node-api-key", node.api_key.parse().unwrap());
    let response = app.router().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Wrong key
    let mut req = json_request(Method::PATCH, &uri, body.clone());
    req.headers_mut()
        .insert("x-node-api-key", "not-the-key".parse().unwrap());
    let response = app.router().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Correct key
    let mut req = json_request(Method::PATCH, &uri, body);
    req.headers_mut()
        .insert("x-node-api-key", node.api_key.parse().unwrap());
    let response = app.router().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_body(response).await["status"], "success");

    let stored = app.state.store.with(|db| db.get_endpoint(node.id)).unwrap();
    assert_eq!(stored.status, NodeStatus::Online);
    assert_eq!(stored.current_rooms, 5);
    assert!(stored.last_heartbeat.is_some());

    // The node status view carries the cached metrics and a lowered score.
    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri(format!("/nodes/{}", node.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = response_body(response).await;
    assert_eq!(body["system_metrics"]["cpu_usage"], 95.0);
    assert!(body["health_score"].as_u64().unwrap() < 100);
}

#[tokio::test]
async fn test_heartbeat_history_and_status_events() {
    let app = create_test_app(Role::Hub);
    let mut node = endpoint("node1");
    node.status = NodeStatus::Offline;
    app.insert_endpoint(&node);

    let uri = format!("/heartbeat/{}", node.id);
    for load in [10.0, 20.0, 30.0] {
        let mut req = json_request(
            Method::PATCH,
            &uri,
            json!({
                "status": "online",
                "load": load,
                "current_rooms": 1,
                "max_rooms": 50,
                "system_metrics": { "cpu_usage": 5.0 }
            }),
        );
        req.headers_mut()
            .insert("x-node-api-key", node.api_key.parse().unwrap());
        let response = app.router().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri(format!("/nodes/{}", node.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = response_body(response).await;
    assert_eq!(body["name"], "node1");
    assert_eq!(body["heartbeat_count"], 3);
    let recent = body["recent_heartbeats"].as_array().unwrap();
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0]["load"], 30.0);
    assert_eq!(recent[0]["cpu_usage"], 5.0);

    // Only the offline -> online flip is logged.
    let response = app
        .router()
        .oneshot(admin_request(Method::GET, "/admin/logs"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let logs = response_body(response).await;
    let logs = logs.as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["message"], "Node node1: offline -> online");
    assert_eq!(logs[0]["node_id"], node.id.to_string());

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri("/admin/logs")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_sync_receive_authentication() {
    let app = create_test_app(Role::Hub);
    let node = endpoint("node1");
    app.insert_endpoint(&node);

    let user_id = Uuid::new_v4();
    let envelope = json!({
        "model": "user",
        "action": "create",
        "data": user_json(user_id, "alice"),
        "timestamp": chatmesh_shared::timestamp::format(&Utc::now()),
    });

    // Unknown key
    let mut req = json_request(Method::POST, "/sync/receive", envelope.clone());
    req.headers_mut()
        .insert("x-node-api-key", "unknown".parse().unwrap());
    let response = app.router().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The bypass secret is not honoured by the hub.
    let mut req = json_request(Method::POST, "/sync/receive", envelope.clone());
    req.headers_mut()
        .insert("x-auth", HUB_SECRET.parse().unwrap());
    let response = app.router().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Known key
    let mut req = json_request(Method::POST, "/sync/receive", envelope);
    req.headers_mut()
        .insert("x-node-api-key", node.api_key.parse().unwrap());
    let response = app.router().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let ack = response_body(response).await;
    assert_eq!(ack["status"], "success");
    assert_eq!(ack["id"], user_id.to_string());

    let user = app.state.store.with(|db| db.get_user(user_id)).unwrap();
    assert_eq!(user.username, "alice");

    let sessions = app.state.store.with(|db| db.list_sync_sessions(10)).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].source_node_id, Some(node.id));
}

#[tokio::test]
async fn test_sync_receive_malformed_body() {
    let app = create_test_app(Role::Hub);
    let node = endpoint("node1");
    app.insert_endpoint(&node);

    let req = Request::builder()
        .method(Method::POST)
        .uri("/sync/receive")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-node-api-key", node.api_key.as_str())
        .body(Body::from("{ not json"))
        .unwrap();
    let response = app.router().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Well-formed envelope, but the only record cannot be decoded.
    let envelope = json!({
        "model": "user",
        "action": "create",
        "data": { "id": "not-a-uuid" },
        "timestamp": chatmesh_shared::timestamp::format(&Utc::now()),
    });
    let mut req = json_request(Method::POST, "/sync/receive", envelope);
    req.headers_mut()
        .insert("x-node-api-key", node.api_key.parse().unwrap());
    let response = app.router().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_body(response).await["status"], "failed");
}

#[tokio::test]
async fn test_admin_approve_and_delete() {
    let app = create_test_app(Role::Hub);

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/register",
            json!({ "node_name": "node1", "node_url": "http://127.0.0.1:9" }),
        ))
        .await
        .unwrap();
    let reg_id = response_body(response).await["registration_id"]
        .as_str()
        .unwrap()
        .to_string();

    // Without the admin token
    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(format!("/admin/registrations/{reg_id}/approve"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .router()
        .oneshot(admin_request(
            Method::POST,
            &format!("/admin/registrations/{reg_id}/approve"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_body(response).await;
    assert_eq!(body["node"]["name"], "node1");
    assert_eq!(body["node"]["status"], "offline");
    let node_id: Uuid = body["node"]["id"].as_str().unwrap().parse().unwrap();

    // Approving twice is a conflict.
    let response = app
        .router()
        .oneshot(admin_request(
            Method::POST,
            &format!("/admin/registrations/{reg_id}/approve"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // A node hosting an active room cannot be deleted.
    let now = Utc::now();
    let owner = User {
        id: Uuid::new_v4(),
        username: "owner".into(),
        email: String::new(),
        password_hash: String::new(),
        bio: String::new(),
        is_online: false,
        last_seen: None,
        created_at: now,
        updated_at: now,
    };
    let room = ChatRoom {
        id: Uuid::new_v4(),
        name: "R1".into(),
        description: None,
        room_type: "public".into(),
        node_id: Some(node_id),
        created_by: owner.id,
        is_active: true,
        max_members: 100,
        created_at: now,
        updated_at: now,
    };
    app.state
        .store
        .with(|db| {
            db.upsert_user(&owner)?;
            db.upsert_room(&room)
        })
        .unwrap();

    let uri = format!("/admin/nodes/{node_id}");
    let response = app
        .router()
        .oneshot(admin_request(Method::DELETE, &uri))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    app.state.store.with(|db| db.delete_room(room.id)).unwrap();
    let response = app
        .router()
        .oneshot(admin_request(Method::DELETE, &uri))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let reg = app
        .state
        .store
        .with(|db| db.get_registration(reg_id.parse().unwrap()))
        .unwrap();
    assert_eq!(reg.status, RegistrationStatus::Pending);
}

#[tokio::test]
async fn test_admin_reject() {
    let app = create_test_app(Role::Hub);

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/register",
            json!({ "node_name": "node1", "node_url": "http://node1:8000" }),
        ))
        .await
        .unwrap();
    let reg_id = response_body(response).await["registration_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .router()
        .oneshot(admin_request(
            Method::POST,
            &format!("/admin/registrations/{reg_id}/reject"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_body(response).await["status"], "rejected");

    let response = app
        .router()
        .oneshot(admin_request(Method::GET, "/admin/registrations?status=rejected"))
        .await
        .unwrap();
    let body = response_body(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_peer_init_requires_hub_credential() {
    let app = create_test_app(Role::Node);
    let peer = endpoint("node2");
    let peers = json!([{
        "id": peer.id,
        "name": peer.name,
        "url": peer.url,
        "api_key": peer.api_key,
        "status": "online",
        "max_rooms": 50,
        "sync_enabled": true
    }]);

    let response = app
        .router()
        .oneshot(json_request(Method::POST, "/peer/init", peers.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut req = json_request(Method::POST, "/peer/init", peers);
    req.headers_mut()
        .insert("x-auth", HUB_SECRET.parse().unwrap());
    let response = app.router().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_body(response).await["count"], 1);

    let stored = app
        .state
        .store
        .with(|db| db.find_endpoint_by_name("node2"))
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, peer.id);

    // Deleting an unknown peer still succeeds.
    let mut req = json_request(
        Method::POST,
        "/peer/delete",
        json!({ "id": Uuid::new_v4(), "api_key": "whatever" }),
    );
    req.headers_mut()
        .insert("x-auth", HUB_SECRET.parse().unwrap());
    let response = app.router().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_body(response).await["deleted"], false);
}

#[tokio::test]
async fn test_sync_pull_serves_missed_changes() {
    let app = create_test_app(Role::Hub);
    let node = endpoint("node1");
    app.insert_endpoint(&node);

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        username: "dave".into(),
        email: String::new(),
        password_hash: String::new(),
        bio: String::new(),
        is_online: false,
        last_seen: None,
        created_at: now,
        updated_at: now,
    };
    app.state.store.with(|db| db.upsert_user(&user)).unwrap();

    let get = |uri: &str, key: Option<&str>| {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(key) = key {
            builder = builder.header("x-node-api-key", key);
        }
        builder.body(Body::empty()).unwrap()
    };

    let response = app.router().oneshot(get("/sync/pull", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router()
        .oneshot(get("/sync/pull", Some("key-nobody")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router()
        .oneshot(get("/sync/pull?since=yesterday", Some(&node.api_key)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router()
        .oneshot(get("/sync/pull", Some(&node.api_key)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_body(response).await;
    let batches = body.as_array().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0]["model"], "user");
    assert_eq!(batches[0]["sync_type"], "full");
    assert_eq!(batches[0]["data"][0]["id"], user.id.to_string());

    // Nothing changed after a later watermark.
    let later = chatmesh_shared::timestamp::format(&(now + chrono::Duration::seconds(60)));
    let response = app
        .router()
        .oneshot(get(&format!("/sync/pull?since={later}"), Some(&node.api_key)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_body(response).await, json!([]));

    // Nodes do not serve pulls.
    let node_app = create_test_app(Role::Node);
    let response = node_app
        .router()
        .oneshot(get("/sync/pull", Some(&node.api_key)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_update_rejects_url_of_another_node() {
    let app = create_test_app(Role::Hub);
    let node1 = endpoint("node1");
    let mut node2 = endpoint("node2");
    node2.url = "http://127.0.0.1:10".into();
    app.insert_endpoint(&node1);
    app.insert_endpoint(&node2);

    let mut req = json_request(
        Method::PATCH,
        &format!("/admin/nodes/{}", node1.id),
        json!({ "url": node2.url }),
    );
    req.headers_mut().insert(
        "authorization",
        format!("Bearer {ADMIN_TOKEN}").parse().unwrap(),
    );
    let response = app.router().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let (first, second) = app
        .state
        .store
        .with(|db| -> chatmesh_store::Result<_> {
            Ok((db.get_endpoint(node1.id)?, db.find_endpoint(node2.id)?))
        })
        .unwrap();
    assert_eq!(first.url, node1.url);
    assert_eq!(second.map(|e| e.url), Some(node2.url));
}

#[tokio::test]
async fn test_meta_set_rejects_mismatched_name() {
    let app = create_test_app(Role::Node);
    let meta = |name: &str| {
        json!({
            "id": Uuid::new_v4(),
            "api_key": "key-own",
            "url": "http://127.0.0.1:9",
            "name": name,
        })
    };

    let mut req = json_request(Method::POST, "/meta/set", meta("someone-else"));
    req.headers_mut()
        .insert("x-auth", HUB_SECRET.parse().unwrap());
    let response = app.router().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let stored = app
        .state
        .store
        .with(|db| db.find_endpoint_by_name("someone-else"))
        .unwrap();
    assert!(stored.is_none());

    let mut req = json_request(Method::POST, "/meta/set", meta("node-test"));
    req.headers_mut()
        .insert("x-auth", HUB_SECRET.parse().unwrap());
    let response = app.router().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stored = app
        .state
        .store
        .with(|db| db.find_endpoint_by_name("node-test"))
        .unwrap();
    assert_eq!(stored.map(|e| e.api_key), Some("key-own".to_string()));
}

#[tokio::test]
async fn test_local_write_is_queued_for_nodes() {
    let mut app = create_test_app(Role::Hub);
    let node = endpoint("node1");
    app.insert_endpoint(&node);

    let user_id = Uuid::new_v4();
    let response = app
        .local_router()
        .oneshot(json_request(
            Method::POST,
            "/local/user",
            user_json(user_id, "bob"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_body(response).await;
    assert_eq!(body["outcome"], "upserted");
    assert_eq!(body["model"], "user");

    let delivery = app.queue.try_recv().expect("a delivery for node1");
    assert_eq!(delivery.target_id, Some(node.id));
    assert_eq!(delivery.envelope.model, ModelKind::User);
    assert!(app.queue.try_recv().is_err());
}

#[tokio::test]
async fn test_local_write_rejects_unknown_model() {
    let app = create_test_app(Role::Hub);

    let response = app
        .local_router()
        .oneshot(json_request(Method::POST, "/local/widget", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_local_routes_are_not_on_public_listener() {
    for role in [Role::Hub, Role::Node] {
        let mut app = create_test_app(role);
        app.insert_endpoint(&endpoint("node1"));

        let response = app
            .router()
            .oneshot(json_request(
                Method::POST,
                "/local/user",
                user_json(Uuid::new_v4(), "mallory"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri(format!("/local/user/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let users = app.state.store.with(|db| db.list_users_since(None)).unwrap();
        assert!(users.is_empty());
        assert!(app.queue.try_recv().is_err());
    }
}
