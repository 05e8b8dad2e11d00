//! Builders for unit tests.

use chrono::Utc;
use uuid::Uuid;

use crate::models::*;

pub(crate) fn sample_user(name: &str) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        username: name.into(),
        email: format!("{name}@example.org"),
        password_hash: String::new(),
        bio: String::new(),
        is_online: false,
        last_seen: None,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn sample_room(owner: Uuid, node_id: Option<Uuid>) -> ChatRoom {
    let now = Utc::now();
    ChatRoom {
        id: Uuid::new_v4(),
        name: "general".into(),
        description: None,
        room_type: "public".into(),
        node_id,
        created_by: owner,
        is_active: true,
        max_members: 100,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn sample_membership(room_id: Uuid, user_id: Uuid) -> RoomMembership {
    let now = Utc::now();
    RoomMembership {
        id: Uuid::new_v4(),
        room_id,
        user_id,
        role: "member".into(),
        joined_at: now,
        last_read: None,
        updated_at: now,
    }
}

pub(crate) fn sample_message(room_id: Uuid, sender_id: Uuid, content: &str) -> Message {
    let now = Utc::now();
    Message {
        id: Uuid::new_v4(),
        room_id,
        sender_id,
        content: content.into(),
        message_type: "text".into(),
        is_edited: false,
        is_deleted: false,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn sample_endpoint(name: &str) -> NodeEndpoint {
    let now = Utc::now();
    NodeEndpoint {
        id: Uuid::new_v4(),
        name: name.into(),
        url: format!("http://{name}.local:8000"),
        status: chatmesh_shared::NodeStatus::Online,
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
