//! Local write surface used by the real-time layer.
//!
//! Writes land in the store and are handed to the dispatcher with the local
//! origin. The response never depends on replication.

use axum::{
    extract::{Path, State},
    Json,
};
use chatmesh_shared::ModelKind;
use chatmesh_sync::{Applied, Outcome};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::api::AppState;
use crate::error::ServerError;

#[derive(Serialize)]
pub struct WriteResponse {
    pub id: Uuid,
    pub model: ModelKind,
    pub outcome: &'static str,
}

impl WriteResponse {
    fn new(model: ModelKind, applied: &Applied) -> Self {
        Self {
            id: applied.id,
            model,
            outcome: match applied.outcome {
                Outcome::Upserted => "upserted",
                Outcome::Stale => "stale",
                Outcome::Deleted => "deleted",
                Outcome::AlreadyDeleted => "already_deleted",
            },
        }
    }
}

fn parse_model(raw: &str) -> Result<ModelKind, ServerError> {
    raw.parse::<ModelKind>()
        .map_err(|e| ServerError::BadRequest(e.to_string()))
}

/// `POST /local/:model`
pub async fn upsert(
    State(state): State<AppState>,
    Path(model): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<WriteResponse>, ServerError> {
    let kind = parse_model(&model)?;
    let Value::Object(record) = body else {
        return Err(ServerError::BadRequest("Expected a JSON object".into()));
    };

    let writer = state.writer.clone();
    let applied = tokio::task::spawn_blocking(move || writer.upsert(kind, record)).await??;
    Ok(Json(WriteResponse::new(kind, &applied)))
}

/// `DELETE /local/:model/:id`
pub async fn remove(
    State(state): State<AppState>,
    Path((model, id)): Path<(String, Uuid)>,
) -> Result<Json<WriteResponse>, ServerError> {
    let kind = parse_model(&model)?;

    let writer = state.writer.clone();
    let applied = tokio::task::spawn_blocking(move || writer.delete(kind, id)).await??;
    Ok(Json(WriteResponse::new(kind, &applied)))
}
