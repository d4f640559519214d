//! Model Error Taxonomy
//!
//! One family of errors shared by every facade and by the runtime layer,
//! matching the taxonomy in the topology specification verbatim.

use thiserror::Error;

/// Errors that can occur while building or mutating the topology model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("insufficient resources: {0}")]
    NoResources(String),

    #[error("operation failed: {0}")]
    Failed(String),
}

/// Result type alias used throughout the model crate.
pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModelError::NotFound("port 7".into());
        assert!(err.to_string().contains("port 7"));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(
            ModelError::InvalidParameter("x".into()),
            ModelError::InvalidParameter("x".into())
        );
    }
}
