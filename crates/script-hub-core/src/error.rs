use crate::envelope::ConnId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("target not found: {0}")]
    TargetNotFound(String),
    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),
    #[error("transport write failed for connection {conn_id}: {reason}")]
    TransportWriteFailure { conn_id: ConnId, reason: &'static str },
}

impl HubError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedMessage(detail.into())
    }

    /// Short stable code for structured log fields.
    pub fn code(&self) -> &'static str {
        match self {
            HubError::MalformedMessage(_) => "malformed_message",
            HubError::TargetNotFound(_) => "target_not_found",
            HubError::InternalInvariantViolation(_) => "internal_invariant_violation",
            HubError::TransportWriteFailure { .. } => "transport_write_failure",
        }
    }
}
