//! Architecture configuration and model building
//!
//! Layer stacks are plain data: an [`ArchitectureConfig`] lists the layers in
//! order, [`build_model`] turns it into a [`CompositeModel`]. The generator and
//! discriminator are two such configurations
//! ([`generator_architecture`], [`discriminator_architecture`]).

use crate::config::{validate_config, ModelConfig};
use crate::error::{NetworkError, Result};
use crate::layers::{
    BatchNorm, Conv2DLayer, ConvGeometry, DenseLayer, DropoutLayer, ModelLayer, TConv2DLayer,
};
use crate::model::CompositeModel;
use crate::utils::{Activation, SimpleRng};
use log::debug;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Configuration for a single layer.
///
/// Different layer types require different fields:
///
/// - **dense**: `input_shape`, `num_neurons`
/// - **conv2d** / **tconv2d**: `input_shape` as `[height, width, channels]`,
///   `num_filters`, `kernel_size`, optional `stride` (default 1) and `padding`
///   (default 0)
/// - **dropout**: `drop_rate` in `[0.0, 1.0)`
///
/// Parameterized layers also take an optional `activation` (default `linear`)
/// and `batch_norm` flag (default `false`).
///
/// # Example
///
/// ```json
/// {
///   "layer_type": "conv2d",
///   "input_shape": [64, 64, 3],
///   "num_filters": 64,
///   "kernel_size": 4,
///   "stride": 2,
///   "padding": 1,
///   "activation": "lrelu"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LayerConfig {
    /// Type of layer: "dense", "conv2d", "tconv2d" or "dropout"
    pub layer_type: String,

    /// Per-sample input shape
    pub input_shape: Option<Vec<usize>>,
    /// Output width of a dense layer
    pub num_neurons: Option<usize>,
    /// Output channels of a (transposed) convolution
    pub num_filters: Option<usize>,
    pub kernel_size: Option<usize>,
    pub stride: Option<usize>,
    pub padding: Option<usize>,

    /// Activation name, see [`crate::utils::activations::ACTIVATION_NAMES`]
    pub activation: Option<String>,
    #[serde(default)]
    pub batch_norm: bool,

    /// Drop probability for a dropout layer
    pub drop_rate: Option<f32>,
}

impl LayerConfig {
    pub fn dense(input_shape: &[usize], num_neurons: usize, activation: &str) -> Self {
        Self {
            layer_type: "dense".to_string(),
            input_shape: Some(input_shape.to_vec()),
            num_neurons: Some(num_neurons),
            activation: Some(activation.to_string()),
            ..Self::default()
        }
    }

    fn conv(
        layer_type: &str,
        input_shape: [usize; 3],
        num_filters: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        activation: &str,
    ) -> Self {
        Self {
            layer_type: layer_type.to_string(),
            input_shape: Some(input_shape.to_vec()),
            num_filters: Some(num_filters),
            kernel_size: Some(kernel_size),
            stride: Some(stride),
            padding: Some(padding),
            activation: Some(activation.to_string()),
            ..Self::default()
        }
    }

    pub fn conv2d(
        input_shape: [usize; 3],
        num_filters: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        activation: &str,
    ) -> Self {
        Self::conv("conv2d", input_shape, num_filters, kernel_size, stride, padding, activation)
    }

    pub fn tconv2d(
        input_shape: [usize; 3],
        num_filters: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        activation: &str,
    ) -> Self {
        Self::conv("tconv2d", input_shape, num_filters, kernel_size, stride, padding, activation)
    }

    pub fn dropout(drop_rate: f32) -> Self {
        Self {
            layer_type: "dropout".to_string(),
            drop_rate: Some(drop_rate),
            ..Self::default()
        }
    }

    pub fn with_batch_norm(mut self) -> Self {
        self.batch_norm = true;
        self
    }
}

/// Ordered sequence of layer configurations.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ArchitectureConfig {
    pub layers: Vec<LayerConfig>,
}

/// Generator: latent vector `[1, 1, 100]` to a `64 × 64 × 3` image in `[-1, 1]`.
pub fn generator_architecture() -> ArchitectureConfig {
    ArchitectureConfig {
        layers: vec![
            LayerConfig::dense(&[1, 1, 100], 8 * 8 * 256, "lrelu").with_batch_norm(),
            LayerConfig::tconv2d([8, 8, 256], 128, 4, 2, 1, "lrelu").with_batch_norm(),
            LayerConfig::tconv2d([16, 16, 128], 64, 4, 2, 1, "lrelu").with_batch_norm(),
            LayerConfig::tconv2d([32, 32, 64], 3, 4, 2, 1, "tanh"),
        ],
    }
}

/// Discriminator: `64 × 64 × 3` image to a single probability.
pub fn discriminator_architecture() -> ArchitectureConfig {
    ArchitectureConfig {
        layers: vec![
            LayerConfig::conv2d([64, 64, 3], 64, 4, 2, 1, "lrelu"),
            LayerConfig::dropout(0.3),
            LayerConfig::conv2d([32, 32, 64], 128, 4, 2, 1, "lrelu"),
            LayerConfig::dropout(0.3),
            LayerConfig::dense(&[16, 16, 128], 1, "sigmoid"),
        ],
    }
}

/// Loads and validates an architecture configuration from a JSON file.
pub fn load_architecture(path: impl AsRef<Path>) -> Result<ArchitectureConfig> {
    let contents = fs::read_to_string(path)?;
    let config: ArchitectureConfig = serde_json::from_str(&contents)?;
    validate_architecture(&config)?;
    Ok(config)
}

fn layer_error(index: usize, message: impl std::fmt::Display) -> NetworkError {
    NetworkError::InvalidConfig(format!("Layer {}: {}", index, message))
}

fn require<T: Copy>(value: Option<T>, index: usize, layer_type: &str, field: &str) -> Result<T> {
    value.ok_or_else(|| layer_error(index, format!("{} layer requires '{}'", layer_type, field)))
}

fn require_positive(
    value: Option<usize>,
    index: usize,
    layer_type: &str,
    field: &str,
) -> Result<usize> {
    let value = require(value, index, layer_type, field)?;
    if value == 0 {
        return Err(layer_error(index, format!("{} must be greater than 0", field)));
    }
    Ok(value)
}

fn input_shape(layer: &LayerConfig, index: usize) -> Result<&[usize]> {
    let shape = layer.input_shape.as_deref().ok_or_else(|| {
        layer_error(
            index,
            format!("{} layer requires 'input_shape'", layer.layer_type),
        )
    })?;
    if shape.is_empty() || shape.contains(&0) {
        return Err(layer_error(index, "input_shape entries must be greater than 0"));
    }
    Ok(shape)
}

fn geometry(layer: &LayerConfig, index: usize) -> Result<ConvGeometry> {
    let shape = input_shape(layer, index)?;
    let [input_height, input_width, in_channels] = <[usize; 3]>::try_from(shape)
        .map_err(|_| layer_error(index, "input_shape must be [height, width, channels]"))?;
    let stride = layer.stride.unwrap_or(1);
    if stride == 0 {
        return Err(layer_error(index, "stride must be greater than 0"));
    }
    Ok(ConvGeometry {
        input_height,
        input_width,
        in_channels,
        filters: require_positive(layer.num_filters, index, &layer.layer_type, "num_filters")?,
        kernel_size: require_positive(layer.kernel_size, index, &layer.layer_type, "kernel_size")?,
        stride,
        padding: layer.padding.unwrap_or(0),
    })
}

/// Per-sample (input, output) element counts; `None` for shape-agnostic dropout.
fn layer_sizes(layer: &LayerConfig, index: usize) -> Result<Option<(usize, usize)>> {
    match layer.layer_type.to_lowercase().as_str() {
        "dense" => {
            let input: usize = input_shape(layer, index)?.iter().product();
            let output = require_positive(layer.num_neurons, index, "Dense", "num_neurons")?;
            Ok(Some((input, output)))
        }
        "conv2d" => {
            let g = geometry(layer, index)?;
            let (oh, ow) = g.conv_output().map_err(|e| layer_error(index, e))?;
            Ok(Some((g.input_shape().iter().product(), oh * ow * g.filters)))
        }
        "tconv2d" => {
            let g = geometry(layer, index)?;
            let (oh, ow) = g.transposed_output().map_err(|e| layer_error(index, e))?;
            Ok(Some((g.input_shape().iter().product(), oh * ow * g.filters)))
        }
        "dropout" => {
            let rate = require(layer.drop_rate, index, "Dropout", "drop_rate")?;
            if !(0.0..1.0).contains(&rate) {
                return Err(layer_error(index, "drop_rate must be in range [0.0, 1.0)"));
            }
            Ok(None)
        }
        _ => Err(layer_error(
            index,
            format!(
                "Invalid layer type '{}'. Must be one of: dense, conv2d, tconv2d, dropout",
                layer.layer_type
            ),
        )),
    }
}

/// Validates an architecture configuration.
///
/// Checks that:
/// - Architecture has at least one layer
/// - Each layer has the required fields for its type, with values in range
/// - Activation names are known
/// - The output size of each layer matches the input size of the next
///   parameterized layer (dropout passes sizes through)
pub fn validate_architecture(config: &ArchitectureConfig) -> Result<()> {
    if config.layers.is_empty() {
        return Err(NetworkError::InvalidConfig(
            "Architecture must have at least one layer".to_string(),
        ));
    }

    let mut previous_output: Option<(usize, usize)> = None;
    for (i, layer) in config.layers.iter().enumerate() {
        if let Some(name) = layer.activation.as_deref() {
            Activation::from_name(name, 0.0).map_err(|e| layer_error(i, e))?;
        }
        let Some((input, output)) = layer_sizes(layer, i)? else {
            continue;
        };
        if let Some((prev_index, prev_output)) = previous_output {
            if prev_output != input {
                return Err(NetworkError::InvalidConfig(format!(
                    "Layer connection mismatch: Layer {} output size ({}) \
                     does not match Layer {} input size ({})",
                    prev_index, prev_output, i, input
                )));
            }
        }
        previous_output = Some((i, output));
    }

    Ok(())
}

/// Validate `config` and build the corresponding composite model.
///
/// Layers are initialised from a generator seeded with `options.seed`, so the
/// same config and options always produce the same initial weights.
pub fn build_model(config: &ArchitectureConfig, options: &ModelConfig) -> Result<CompositeModel> {
    validate_config(options)?;
    validate_architecture(config)?;

    let mut rng = SimpleRng::new(options.seed);
    let mut layers = Vec::with_capacity(config.layers.len());

    for (i, layer_config) in config.layers.iter().enumerate() {
        let activation = Activation::from_name(
            layer_config.activation.as_deref().unwrap_or("linear"),
            options.leaky_relu_alpha,
        )?;
        let norm = |channels: usize| -> Result<Option<BatchNorm>> {
            if layer_config.batch_norm {
                Ok(Some(BatchNorm::new(
                    channels,
                    options.norm_epsilon,
                    options.norm_momentum,
                )?))
            } else {
                Ok(None)
            }
        };

        let layer = match layer_config.layer_type.to_lowercase().as_str() {
            "dense" => {
                let num_neurons =
                    require_positive(layer_config.num_neurons, i, "Dense", "num_neurons")?;
                ModelLayer::parameterized(DenseLayer::new(
                    input_shape(layer_config, i)?,
                    num_neurons,
                    activation,
                    norm(num_neurons)?,
                    &mut rng,
                ))
            }
            "conv2d" => {
                let g = geometry(layer_config, i)?;
                let layer = Conv2DLayer::new(g, activation, norm(g.filters)?, &mut rng)?;
                ModelLayer::parameterized(layer)
            }
            "tconv2d" => {
                let g = geometry(layer_config, i)?;
                let layer = TConv2DLayer::new(g, activation, norm(g.filters)?, &mut rng)?;
                ModelLayer::parameterized(layer)
            }
            "dropout" => {
                let rate = require(layer_config.drop_rate, i, "Dropout", "drop_rate")?;
                ModelLayer::stateless(DropoutLayer::new(rate, &mut rng)?)
            }
            other => {
                return Err(layer_error(i, format!("Invalid layer type '{}'", other)));
            }
        };
        debug!("Layer {}: {:?}", i, layer);
        layers.push(layer);
    }

    Ok(CompositeModel::new(layers))
}

/// Build the generator-role model.
pub fn build_generator(options: &ModelConfig) -> Result<CompositeModel> {
    build_model(&generator_architecture(), options)
}

/// Build the discriminator-role model.
pub fn build_discriminator(options: &ModelConfig) -> Result<CompositeModel> {
    build_model(&discriminator_architecture(), options)
}
