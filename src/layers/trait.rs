//! Layer trait definitions and capability dispatch
//!
//! Layers differ along three axes: whether they own trainable parameters,
//! whether they persist normalisation statistics, and (as a consequence) which
//! backward signature they expose. Rather than probing for fields at runtime,
//! every layer enters a model wrapped in a [`ModelLayer`] variant and the model
//! dispatches on that tag.

use crate::error::Result;
use crate::layers::batchnorm::NormStatistics;
use crate::tensor::Tensor;

/// Behaviour shared by every layer.
pub trait Layer {
    /// Forward propagation through the layer.
    ///
    /// Layers may update internal state here (cached activations for the
    /// backward pass, dropout masks, running statistics).
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the per-sample size of `input` differs from
    /// the layer's configured input shape.
    fn forward(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Switch between training and inference behaviour.
    ///
    /// Only dropout and batch normalisation react to this.
    fn set_training(&mut self, training: bool);

    /// Short human-readable layer name, used in logs and error contexts.
    fn name(&self) -> &'static str;
}

/// A layer with no persisted tensors.
pub trait StatelessLayer: Layer {
    /// Map the gradient w.r.t. the layer output to the gradient w.r.t. its input.
    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor>;
}

/// A layer owning a weight tensor and a bias tensor.
pub trait ParameterizedLayer: Layer {
    fn weights(&self) -> &Tensor;
    fn weights_mut(&mut self) -> &mut Tensor;
    fn biases(&self) -> &Tensor;
    fn biases_mut(&mut self) -> &mut Tensor;

    /// Backward propagation through the layer.
    ///
    /// The layer ADDS its weight and bias gradients into `weight_delta` and
    /// `bias_delta`; it must never overwrite them. Callers may run several
    /// backward passes before consuming the buffers.
    ///
    /// Returns the gradient w.r.t. the layer input.
    fn backward(
        &mut self,
        grad_output: &Tensor,
        weight_delta: &mut Tensor,
        bias_delta: &mut Tensor,
    ) -> Result<Tensor>;

    /// Persisted normalisation tensors, if the layer carries them.
    fn statistics(&self) -> Option<&NormStatistics> {
        None
    }

    fn statistics_mut(&mut self) -> Option<&mut NormStatistics> {
        None
    }

    /// Total number of weights and biases.
    fn parameter_count(&self) -> usize {
        self.weights().len() + self.biases().len()
    }
}

/// What a layer contributes to delta buffers and state snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Stateless,
    Parameterized,
    ParameterizedWithStatistics,
}

impl Capability {
    pub fn has_parameters(self) -> bool {
        !matches!(self, Capability::Stateless)
    }

    pub fn has_statistics(self) -> bool {
        matches!(self, Capability::ParameterizedWithStatistics)
    }
}

/// A layer owned by a composite model, tagged by its backward contract.
pub enum ModelLayer {
    Stateless(Box<dyn StatelessLayer>),
    Parameterized(Box<dyn ParameterizedLayer>),
}

impl ModelLayer {
    pub fn stateless(layer: impl StatelessLayer + 'static) -> Self {
        ModelLayer::Stateless(Box::new(layer))
    }

    pub fn parameterized(layer: impl ParameterizedLayer + 'static) -> Self {
        ModelLayer::Parameterized(Box::new(layer))
    }

    pub fn capability(&self) -> Capability {
        match self {
            ModelLayer::Stateless(_) => Capability::Stateless,
            ModelLayer::Parameterized(layer) => {
                if layer.statistics().is_some() {
                    Capability::ParameterizedWithStatistics
                } else {
                    Capability::Parameterized
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelLayer::Stateless(layer) => layer.name(),
            ModelLayer::Parameterized(layer) => layer.name(),
        }
    }

    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        match self {
            ModelLayer::Stateless(layer) => layer.forward(input),
            ModelLayer::Parameterized(layer) => layer.forward(input),
        }
    }

    pub fn set_training(&mut self, training: bool) {
        match self {
            ModelLayer::Stateless(layer) => layer.set_training(training),
            ModelLayer::Parameterized(layer) => layer.set_training(training),
        }
    }

    /// Weight and bias tensors of a parameterized layer.
    pub fn parameters(&self) -> Option<(&Tensor, &Tensor)> {
        match self {
            ModelLayer::Stateless(_) => None,
            ModelLayer::Parameterized(layer) => Some((layer.weights(), layer.biases())),
        }
    }

    pub fn statistics(&self) -> Option<&NormStatistics> {
        match self {
            ModelLayer::Stateless(_) => None,
            ModelLayer::Parameterized(layer) => layer.statistics(),
        }
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            ModelLayer::Stateless(_) => 0,
            ModelLayer::Parameterized(layer) => layer.parameter_count(),
        }
    }
}

impl std::fmt::Debug for ModelLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLayer")
            .field("name", &self.name())
            .field("capability", &self.capability())
            .finish()
    }
}

/// Check that `input` holds whole samples of `sample_shape` and return the batch size.
///
/// The leading dimension is the batch; the remaining dimensions only need to
/// agree in element count, so a `[batch, 16384]` dense output can feed a layer
/// expecting `[8, 8, 256]` samples.
pub(crate) fn check_input(layer: &str, input: &Tensor, sample_shape: &[usize]) -> Result<usize> {
    let sample_len: usize = sample_shape.iter().product();
    let batch = input.batch_size();
    if input.shape().len() < 2 || batch == 0 || input.sample_len() != sample_len {
        let mut expected = vec![batch.max(1)];
        expected.extend_from_slice(sample_shape);
        return Err(crate::error::NetworkError::shape_mismatch(
            format!("{} input", layer),
            &expected,
            input.shape(),
        ));
    }
    Ok(batch)
}

/// Check that a backward gradient matches the shape of the cached forward output.
pub(crate) fn check_grad(layer: &str, grad: &Tensor, output_shape: &[usize]) -> Result<()> {
    if grad.shape() != output_shape {
        return Err(crate::error::NetworkError::shape_mismatch(
            format!("{} gradient", layer),
            output_shape,
            grad.shape(),
        ));
    }
    Ok(())
}

/// Check that a delta buffer has the shape of the parameter it accumulates for.
pub(crate) fn check_delta(layer: &str, delta: &Tensor, param: &Tensor) -> Result<()> {
    if !delta.same_shape(param) {
        return Err(crate::error::NetworkError::shape_mismatch(
            format!("{} delta buffer", layer),
            param.shape(),
            delta.shape(),
        ));
    }
    Ok(())
}
