//! Error types for the common crate
//!
//! This module defines the error taxonomy shared by every stage of the inference
//! pipeline: configuration, model loading, execution and postprocessing.

use thiserror::Error;

/// Result type for Model API operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Model API operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed or contradictory configuration, surfaced at first use
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Model description unreadable or structurally invalid
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Operation invoked in a state that does not allow it
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Backend rejected the tensor map or failed while executing it
    #[error("Execution error: {0}")]
    Execution(String),

    /// Model family could not interpret the raw outputs
    #[error("Postprocess error: {0}")]
    Postprocess(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if the error is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    /// Returns true if the error is a model load error
    pub fn is_model_load(&self) -> bool {
        matches!(self, Error::ModelLoad(_))
    }

    /// Returns true if the error is a precondition error
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::Precondition(_))
    }

    /// Returns true if the error is an execution error
    pub fn is_execution(&self) -> bool {
        matches!(self, Error::Execution(_))
    }

    /// Returns true if the error is a postprocess error
    pub fn is_postprocess(&self) -> bool {
        matches!(self, Error::Postprocess(_))
    }

    /// Returns true if the error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns true if the error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(Error::Configuration("x".into()).is_configuration());
        assert!(Error::ModelLoad("x".into()).is_model_load());
        assert!(Error::Precondition("x".into()).is_precondition());
        assert!(Error::Execution("x".into()).is_execution());
        assert!(Error::Postprocess("x".into()).is_postprocess());
        assert!(!Error::Execution("x".into()).is_postprocess());
    }

    #[test]
    fn test_display_keeps_backend_text() {
        let err = Error::Execution("input 'data' expects [1,3,2,2], got [1,3,4,4]".into());
        assert_eq!(
            err.to_string(),
            "Execution error: input 'data' expects [1,3,2,2], got [1,3,4,4]"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
