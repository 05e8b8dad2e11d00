use chatmesh_shared::{FailureKind, ModelKind};
use chatmesh_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Why a single record could not be applied. Scoped to that record: the
/// rest of a batch carries on.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("{kind} {id} not found")]
    DependencyNotFound { kind: ModelKind, id: Uuid },

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApplyError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ApplyError::DependencyNotFound { .. } => FailureKind::MissingDependency,
            ApplyError::MalformedRecord(_) => FailureKind::Malformed,
            ApplyError::Store(_) => FailureKind::Storage,
        }
    }
}

impl From<serde_json::Error> for ApplyError {
    fn from(e: serde_json::Error) -> Self {
        ApplyError::MalformedRecord(e.to_string())
    }
}

/// Request-scoped failures of `/sync/receive`.
#[derive(Error, Debug)]
pub enum ReceiveError {
    /// Missing, unknown or mismatched credential. Nothing was touched.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Sync failed: {0}")]
    Failed(String),
}

impl From<StoreError> for ReceiveError {
    fn from(e: StoreError) -> Self {
        ReceiveError::Failed(e.to_string())
    }
}

/// Outbound call failures. Logged by the caller, never propagated to the
/// write that triggered them.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Peer answered {status}: {body}")]
    Status { status: u16, body: String },
}
