//! Error handling for ionflow
//!
//! This module defines the crate-level error type and a Result alias for
//! code that sits above a single pipeline operation: configuration, the
//! command line, scripting and the analysis session.

use crate::pipeline::controller::ControllerError;
use crate::pipeline::error::TreeError;
use crate::pipeline::property::PropertyError;
use crate::pipeline::state::StateError;
use crate::session::SessionError;
use thiserror::Error;

/// Main error type for ionflow operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Errors related to Rhai script compilation or evaluation
    #[error("Script error: {0}")]
    Script(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filter tree edits
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    /// Rejected property values
    #[error("Property error: {0}")]
    Property(#[from] PropertyError),

    /// Saved tree files
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Refresh error: {0}")]
    Controller(#[from] ControllerError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        EngineError::Script(err.to_string())
    }
}

/// Result type alias for ionflow operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<EngineError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}

impl From<Box<rhai::EvalAltResult>> for EngineError {
    fn from(err: Box<rhai::EvalAltResult>) -> Self {
        EngineError::from_rhai_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::Config("Invalid cache percentage".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid cache percentage");
    }

    #[test]
    fn test_error_with_context() {
        let err = EngineError::Script("test".to_string());
        let with_ctx = err.with_context("Failed to compile");
        assert!(with_ctx.to_string().contains("Failed to compile"));
    }

    #[test]
    fn test_context_on_foreign_errors() {
        let io: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = io.context("Reading tree").unwrap_err();
        assert_eq!(err.to_string(), "Reading tree: IO error: missing");

        let tree: std::result::Result<(), TreeError> = Err(TreeError::NothingToUndo);
        assert!(matches!(
            tree.with_context(|| "Adding root".to_string()),
            Err(EngineError::WithContext { .. })
        ));
    }
}
