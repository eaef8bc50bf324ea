use crate::complaint::Status;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeskError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid transition: cannot move complaint from {from} to {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Agent '{agent_id}' is at capacity ({open}/{max} open complaints)")]
    Capacity { agent_id: String, open: u32, max: u32 },

    #[error("Complaint '{complaint_id}' was modified concurrently; gave up after {attempts} attempts")]
    Conflict { complaint_id: String, attempts: u32 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeskError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    /// Stable machine-readable name, used by transport layers to pick a status code.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_)            => "validation",
            Self::NotFound { .. }          => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvalidState(_)          => "invalid_state",
            Self::Capacity { .. }          => "capacity",
            Self::Conflict { .. }          => "conflict",
            Self::Database(_)              => "database",
            Self::Serialization(_)         => "serialization",
            Self::Other(_)                 => "internal",
        }
    }
}

pub type DeskResult<T> = Result<T, DeskError>;
