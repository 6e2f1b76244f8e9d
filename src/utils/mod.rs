//! Shared utilities for layer implementations
//!
//! Random number generation for weight initialisation and dropout masks, and the
//! activation functions applied by parameterized layers.

pub mod activations;
pub mod rng;

pub use activations::Activation;
pub use rng::SimpleRng;
