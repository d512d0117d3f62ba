//! Error types for tallyrank.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! specific condition. [`RankError::kind`] collapses them into the five
//! categories exposed to outer layers.

use thiserror::Error;

use crate::candidate::{CandidateId, PartyId};
use crate::event::{EventId, EventState};
use crate::storage::StorageError;

/// Input validation errors.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unknown event category '{value}'")]
    UnknownCategory {
        value: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors raised while executing an operation against existing state.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Candidate not found: {id}")]
    CandidateNotFound {
        id: CandidateId,
    },

    #[error("Party not found: {id}")]
    PartyNotFound {
        id: PartyId,
    },

    #[error("Event not found: {id}")]
    EventNotFound {
        id: EventId,
    },

    #[error("Event {id} is {state}, only pending events can be {action}")]
    InvalidEventState {
        id: EventId,
        state: EventState,
        action: &'static str,
    },

    #[error("Vote denied: {reason}")]
    VoteDenied {
        reason: String,
    },
}

/// Coarse error taxonomy reported to the outer API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown candidate, event or party.
    NotFound,
    /// Transition attempted from a terminal event state.
    InvalidState,
    /// Bad category, missing field, malformed configuration.
    InvalidInput,
    /// Hard rejection from the anti-abuse gate or a vote ceiling.
    Blocked,
    /// Persistence failure.
    DependencyUnavailable,
}

/// Top-level error type for tallyrank.
#[derive(Debug, Error)]
pub enum RankError {
    /// Bad input.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Operation refused against current state.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Lock poisoning and other faults with no better home.
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl RankError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Maps this error onto the public taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::InvalidInput,
            Self::Execution(e) => match e {
                ExecutionError::CandidateNotFound { .. }
                | ExecutionError::PartyNotFound { .. }
                | ExecutionError::EventNotFound { .. } => ErrorKind::NotFound,
                ExecutionError::InvalidEventState { .. } => ErrorKind::InvalidState,
                ExecutionError::VoteDenied { .. } => ErrorKind::Blocked,
            },
            Self::Storage(e) => match e {
                StorageError::CandidateNotFound(_)
                | StorageError::PartyNotFound(_)
                | StorageError::EventNotFound(_) => ErrorKind::NotFound,
                StorageError::EventStateConflict { .. } => ErrorKind::InvalidState,
                _ => ErrorKind::DependencyUnavailable,
            },
            Self::Internal { .. } => ErrorKind::DependencyUnavailable,
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this error is retryable.
    ///
    /// Only dependency failures are; everything else is a caller problem that
    /// will not change on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::DependencyUnavailable)
    }
}

/// Result type alias for tallyrank operations.
pub type RankResult<T> = Result<T, RankError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_category() {
        let err = ValidationError::UnknownCategory {
            value: "scandal".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("scandal"));
    }

    #[test]
    fn test_invalid_state_message_names_action() {
        let err = ExecutionError::InvalidEventState {
            id: EventId::new(),
            state: EventState::Validated,
            action: "validated",
        };
        let msg = format!("{err}");
        assert!(msg.contains("validated"));
        assert!(msg.contains("only pending"));
    }

    #[test]
    fn test_kind_mapping() {
        let err: RankError = ValidationError::MissingField {
            field: "candidate_id".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.is_validation());

        let err: RankError = ExecutionError::CandidateNotFound {
            id: CandidateId::new(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: RankError = ExecutionError::VoteDenied {
            reason: "burst".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Blocked);

        let err: RankError = StorageError::BackendError("timeout".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);

        let err: RankError = StorageError::EventNotFound(EventId::new()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_retryable() {
        let err: RankError = StorageError::ConnectionError("refused".to_string()).into();
        assert!(err.is_retryable());

        let err: RankError = ExecutionError::InvalidEventState {
            id: EventId::new(),
            state: EventState::Rejected,
            action: "rejected",
        }
        .into();
        assert!(!err.is_retryable());
    }
}
