//! Error handling for composite models
//!
//! Every fallible operation in the crate returns [`Result`], whose error side is
//! [`NetworkError`]. Shape problems and missing state keys are fatal to the call
//! that hit them; nothing in the crate retries.

use thiserror::Error;

/// Result type alias for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Main error type for network operations
#[derive(Error, Debug)]
pub enum NetworkError {
    /// A tensor did not have the shape a layer, buffer or snapshot slot expected.
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A snapshot lacked a key required by a layer capability.
    #[error("Missing state key: {key}")]
    MissingStateKey { key: String },

    /// A flat snapshot key could not be parsed into a layer index and field.
    #[error("Invalid state key: {key}")]
    InvalidStateKey { key: String },

    #[error("Backward called on {layer} before a forward pass")]
    MissingForwardCache { layer: String },

    #[error("Invalid learning rate: {0} (must be finite and non-negative)")]
    InvalidLearningRate(f32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NetworkError {
    pub(crate) fn shape_mismatch(
        context: impl Into<String>,
        expected: &[usize],
        actual: &[usize],
    ) -> Self {
        NetworkError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
