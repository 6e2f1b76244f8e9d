//! Model construction options
//!
//! Hyperparameters that apply across a whole layer stack rather than to one layer:
//! the initialisation seed, batch-norm constants and the leaky-ReLU slope.

use crate::error::{NetworkError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Options used by [`crate::architecture::build_model`].
///
/// Every field has a default, so `{}` is a valid config file.
///
/// # Example
///
/// ```json
/// {
///   "seed": 7,
///   "norm_epsilon": 1e-5,
///   "norm_momentum": 0.9,
///   "leaky_relu_alpha": 0.2
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Seed for weight initialisation and dropout masks
    pub seed: u64,

    /// Small constant added to the variance in batch norm
    pub norm_epsilon: f32,

    /// Momentum for the running-statistics moving average
    pub norm_momentum: f32,

    /// Negative slope of the `lrelu` activation
    pub leaky_relu_alpha: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            norm_epsilon: 1e-5,
            norm_momentum: 0.9,
            leaky_relu_alpha: 0.2,
        }
    }
}

impl ModelConfig {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }
}

/// Loads model options from a JSON file and validates them.
pub fn load_config(path: impl AsRef<Path>) -> Result<ModelConfig> {
    let contents = fs::read_to_string(path)?;
    let config: ModelConfig = serde_json::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &ModelConfig) -> Result<()> {
    if config.norm_epsilon <= 0.0 {
        return Err(NetworkError::InvalidConfig(
            "norm_epsilon must be positive".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.norm_momentum) {
        return Err(NetworkError::InvalidConfig(
            "norm_momentum must be in range [0.0, 1.0]".to_string(),
        ));
    }
    if config.leaky_relu_alpha < 0.0 {
        return Err(NetworkError::InvalidConfig(
            "leaky_relu_alpha must be non-negative".to_string(),
        ));
    }
    Ok(())
}
