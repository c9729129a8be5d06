//! Error types for the goal executive protocol.

use thiserror::Error;

/// Errors that can occur in executive operations.
#[derive(Debug, Error)]
pub enum ExecutiveError {
    #[error("store error: {0}")]
    Store(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid goal type: {0}")]
    InvalidGoalType(String),
    #[error("no processor registered for goal type: {0}")]
    MissingProcessor(String),
    #[error("goal type {0} is a query type but its processor cannot answer queries")]
    QueryCapabilityMissing(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("processor for goal {goal_id} ({goal_type}) returned preempted without a preemption request")]
    ContractViolation { goal_id: String, goal_type: String },
}

impl From<serde_json::Error> for ExecutiveError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Convenience result type for executive operations.
pub type ExecutiveResult<T> = Result<T, ExecutiveError>;
