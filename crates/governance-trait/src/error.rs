//! Error types for collaborator operations

use std::fmt;
use thiserror::Error;

/// Result type for collaborator operations
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Error returned across the collaborator boundary
#[derive(Error, Debug)]
pub enum CollaboratorError {
    /// Resource not found
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// The resource exists but is not in a state that allows the operation
    #[error("Invalid state for {resource} {id}: {message}")]
    InvalidState {
        resource: String,
        id: String,
        message: String,
    },

    /// The backing service could not be reached or refused the call
    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    /// Wrapper for other error types
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CollaboratorError {
    /// Create a not found error
    pub fn not_found(resource: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(
        resource: impl Into<String>,
        id: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            resource: resource.into(),
            id: id.to_string(),
            message: message.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CollaboratorError::not_found("VM", "vm-1");
        assert_eq!(err.to_string(), "VM not found: vm-1");
        assert!(err.is_not_found());

        let err = CollaboratorError::invalid_state("ticket", "t-1", "already executing");
        assert_eq!(
            err.to_string(),
            "Invalid state for ticket t-1: already executing"
        );
        assert!(!err.is_not_found());
    }
}
