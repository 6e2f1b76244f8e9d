//! Layer abstractions for composite models
//!
//! This module provides the layer traits, the [`ModelLayer`] capability tag used by
//! [`crate::model::CompositeModel`], and the concrete layers the generator and
//! discriminator are built from.

mod output;
mod r#trait;
pub mod batchnorm;
pub mod conv2d;
pub mod dense;
pub mod dropout;
pub mod tconv2d;

pub use batchnorm::{BatchNorm, NormStatistics};
pub use conv2d::{Conv2DLayer, ConvGeometry};
pub use dense::DenseLayer;
pub use dropout::DropoutLayer;
pub use r#trait::{Capability, Layer, ModelLayer, ParameterizedLayer, StatelessLayer};
pub use tconv2d::TConv2DLayer;
