//! Error types for population generation
//!
//! ## Table of Contents
//! - **PopulationError**: Main error enum covering all failure modes
//! - **Result**: Type alias for `Result<T, PopulationError>`

use thiserror::Error;

/// Result type alias for population operations
pub type Result<T> = std::result::Result<T, PopulationError>;

/// Main error type for population operations
#[derive(Error, Debug)]
pub enum PopulationError {
    /// Invalid type definitions or engine configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Expression evaluator failure
    #[error("evaluation error in `{expression}`: {message}")]
    Evaluation {
        /// Expression that failed
        expression: String,
        /// Failure description
        message: String,
    },

    /// Runtime modification could not be applied
    #[error("mutation error: {0}")]
    Mutation(String),

    /// Session lookup or lifecycle failure
    #[error("session error: {0}")]
    Session(String),

    /// Metrics registration or export failure
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Generic IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (should not occur in normal operation)
    #[error("internal error: {0}")]
    Internal(String),
}

impl PopulationError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an evaluation error for an expression
    pub fn evaluation(expression: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Evaluation {
            expression: expression.into(),
            message: msg.into(),
        }
    }

    /// Create a mutation error
    pub fn mutation(msg: impl Into<String>) -> Self {
        Self::Mutation(msg.into())
    }

    /// Create a session error
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for errors that abort a session build
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Mutation(_))
    }
}

impl From<prometheus::Error> for PopulationError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}
