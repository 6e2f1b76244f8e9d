//! GAN Networks Library
//!
//! Layer stacks for the two roles of a generative adversarial network, wrapped in
//! a common container that runs forward and backward passes, accumulates
//! parameter gradients across calls, applies plain gradient-descent updates and
//! exports or imports its full persisted state.
//!
//! # Modules
//!
//! - `model`: `CompositeModel`, the layer container with delta accumulation
//! - `layers`: Layer traits and implementations (Dense, Conv2D, TConv2D, Dropout)
//! - `state`: Keyed state snapshots and their JSON persistence
//! - `tensor`: Shaped `f32` buffers shared by all layers
//! - `architecture`: Architecture configuration, generator/discriminator presets
//! - `config`: Model construction options
//! - `utils`: Shared utilities (RNG, activation functions)
//! - `error`: Library error type

pub mod architecture;
pub mod config;
pub mod error;
pub mod layers;
pub mod model;
pub mod state;
pub mod tensor;
pub mod utils;

pub use architecture::{build_discriminator, build_generator, build_model, ArchitectureConfig};
pub use config::ModelConfig;
pub use error::{NetworkError, Result};
pub use model::CompositeModel;
pub use state::{StateDict, StateField, StateKey};
pub use tensor::Tensor;
