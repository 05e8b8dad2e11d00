use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown model kind: {0}")]
    UnknownModel(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("Unknown log level: {0}")]
    UnknownLevel(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
}
