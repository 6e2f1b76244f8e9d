//! Composite model container
//!
//! A [`CompositeModel`] owns an ordered stack of layers and, for every
//! parameterized layer, a pair of gradient-accumulation buffers ("deltas").
//! Training code drives it through a fixed cycle:
//!
//! 1. `reset_deltas()` to open an accumulation window
//! 2. one or more `forward()` / `backward()` pairs, each adding into the deltas
//! 3. `apply_deltas(learning_rate)` for a plain gradient-descent step
//!
//! Forgetting step 1 between unrelated batches leaks gradients from the previous
//! window into the next update; the model does not detect this.
//!
//! Both adversarial roles use this same container; they differ only in the
//! layer stack they are built with (see [`crate::architecture`]).

use crate::error::{NetworkError, Result};
use crate::layers::batchnorm::NormStatistics;
use crate::layers::{Capability, ModelLayer};
use crate::state::{StateDict, StateField, StateKey};
use crate::tensor::Tensor;
use log::{debug, trace};

/// Ordered layer stack with index-aligned delta buffers.
///
/// `weight_deltas[i]` and `bias_deltas[i]` are `Some` exactly when `layers[i]`
/// is parameterized, and then match the shapes of that layer's weights and biases.
///
/// # Example
///
/// ```
/// use gan_networks::layers::{DenseLayer, DropoutLayer, ModelLayer};
/// use gan_networks::model::CompositeModel;
/// use gan_networks::tensor::Tensor;
/// use gan_networks::utils::{Activation, SimpleRng};
///
/// let mut rng = SimpleRng::new(42);
/// let mut model = CompositeModel::new(vec![
///     ModelLayer::parameterized(DenseLayer::new(&[4], 3, Activation::Relu, None, &mut rng)),
///     ModelLayer::stateless(DropoutLayer::new(0.3, &mut rng).unwrap()),
/// ]);
///
/// let output = model.forward(&Tensor::full(&[2, 4], 0.5)).unwrap();
/// model.backward(&Tensor::full(output.shape(), 1.0)).unwrap();
/// model.apply_deltas(0.01).unwrap();
/// model.reset_deltas();
/// ```
pub struct CompositeModel {
    layers: Vec<ModelLayer>,
    weight_deltas: Vec<Option<Tensor>>,
    bias_deltas: Vec<Option<Tensor>>,
}

impl CompositeModel {
    /// Take ownership of `layers` and allocate zeroed delta buffers for every
    /// parameterized layer.
    pub fn new(layers: Vec<ModelLayer>) -> Self {
        let (weight_deltas, bias_deltas) = layers
            .iter()
            .map(|layer| match layer.parameters() {
                Some((weights, biases)) => {
                    (Some(Tensor::zeros_like(weights)), Some(Tensor::zeros_like(biases)))
                }
                None => (None, None),
            })
            .unzip();

        let model = Self {
            layers,
            weight_deltas,
            bias_deltas,
        };
        debug!(
            "Built composite model: {} layers, {} trainable parameters",
            model.len(),
            model.parameter_count()
        );
        model
    }

    /// Run `input` through every layer in order and return the last output.
    ///
    /// Delta buffers are untouched; layers may update their own caches and
    /// running statistics.
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let mut activation = input.clone();
        for layer in &mut self.layers {
            activation = layer.forward(&activation)?;
        }
        Ok(activation)
    }

    /// Propagate `gradient` from the last layer back to the first.
    ///
    /// Parameterized layers add their weight and bias gradients into this
    /// model's delta buffers. Returns the gradient w.r.t. the model input.
    pub fn backward(&mut self, gradient: &Tensor) -> Result<Tensor> {
        let mut grad = gradient.clone();
        let slots = self
            .layers
            .iter_mut()
            .zip(self.weight_deltas.iter_mut())
            .zip(self.bias_deltas.iter_mut())
            .rev();

        for ((layer, weight_delta), bias_delta) in slots {
            grad = match (layer, weight_delta, bias_delta) {
                (ModelLayer::Parameterized(layer), Some(weight_delta), Some(bias_delta)) => {
                    layer.backward(&grad, weight_delta, bias_delta)?
                }
                (ModelLayer::Stateless(layer), None, None) => layer.backward(&grad)?,
                _ => unreachable!("delta slots are allocated from layer capabilities"),
            };
        }
        Ok(grad)
    }

    /// Zero every present delta buffer.
    pub fn reset_deltas(&mut self) {
        for delta in self
            .weight_deltas
            .iter_mut()
            .chain(self.bias_deltas.iter_mut())
            .flatten()
        {
            delta.fill(0.0);
        }
        trace!("Reset delta buffers");
    }

    /// Plain gradient descent: `param -= learning_rate * delta` for every
    /// parameterized layer. Buffers are left as they are.
    ///
    /// # Errors
    ///
    /// `InvalidLearningRate` if `learning_rate` is negative or not finite.
    pub fn apply_deltas(&mut self, learning_rate: f32) -> Result<()> {
        if !learning_rate.is_finite() || learning_rate < 0.0 {
            return Err(NetworkError::InvalidLearningRate(learning_rate));
        }

        let slots = self
            .layers
            .iter_mut()
            .zip(self.weight_deltas.iter())
            .zip(self.bias_deltas.iter());
        for ((layer, weight_delta), bias_delta) in slots {
            if let (ModelLayer::Parameterized(layer), Some(weight_delta), Some(bias_delta)) =
                (layer, weight_delta, bias_delta)
            {
                layer.weights_mut().sub_scaled(weight_delta, learning_rate)?;
                layer.biases_mut().sub_scaled(bias_delta, learning_rate)?;
            }
        }
        trace!("Applied deltas with learning rate {}", learning_rate);
        Ok(())
    }

    /// Snapshot every persisted tensor, keyed by layer index and field.
    pub fn export_state(&self) -> StateDict {
        let mut state = StateDict::new();
        for (i, layer) in self.layers.iter().enumerate() {
            if let Some((weights, biases)) = layer.parameters() {
                state.insert(StateKey::new(i, StateField::Weights), weights.clone());
                state.insert(StateKey::new(i, StateField::Biases), biases.clone());
            }
            if let Some(stats) = layer.statistics() {
                for field in StateField::STATISTICS {
                    if let Some(tensor) = stats.field(field) {
                        state.insert(StateKey::new(i, field), tensor.clone());
                    }
                }
            }
        }
        debug!("Exported {} state tensors", state.len());
        state
    }

    /// Overwrite parameters and statistics from `state`.
    ///
    /// Every tensor is checked before anything is written, so a failed import
    /// leaves the model unchanged. Keys for layers without the matching
    /// capability are ignored.
    ///
    /// # Errors
    ///
    /// * `MissingStateKey` if a key required by a layer's capability is absent
    /// * `ShapeMismatch` if a tensor's shape or length differs from the one it
    ///   replaces
    pub fn import_state(&mut self, state: &StateDict) -> Result<()> {
        let mut staged: Vec<(usize, StateField, Tensor)> = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            if let Some((weights, biases)) = layer.parameters() {
                let parameters = [(StateField::Weights, weights), (StateField::Biases, biases)];
                for (field, current) in parameters {
                    staged.push((i, field, checked(state, i, field, current)?));
                }
            }
            if let Some(stats) = layer.statistics() {
                for field in StateField::STATISTICS {
                    if let Some(current) = stats.field(field) {
                        staged.push((i, field, checked(state, i, field, current)?));
                    }
                }
            }
        }

        let count = staged.len();
        for (i, field, tensor) in staged {
            let ModelLayer::Parameterized(layer) = &mut self.layers[i] else {
                continue;
            };
            match field {
                StateField::Weights => *layer.weights_mut() = tensor,
                StateField::Biases => *layer.biases_mut() = tensor,
                StateField::Scale
                | StateField::Shift
                | StateField::RunningMean
                | StateField::RunningVar => {
                    if let Some(slot) = layer.statistics_mut().and_then(|s| s.field_mut(field)) {
                        *slot = tensor;
                    }
                }
            }
        }
        debug!("Imported {} state tensors", count);
        Ok(())
    }

    /// Switch every layer between training and inference behaviour.
    pub fn set_training(&mut self, training: bool) {
        for layer in &mut self.layers {
            layer.set_training(training);
        }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[ModelLayer] {
        &self.layers
    }

    pub fn capability(&self, index: usize) -> Option<Capability> {
        self.layers.get(index).map(ModelLayer::capability)
    }

    pub fn weight_delta(&self, index: usize) -> Option<&Tensor> {
        self.weight_deltas.get(index).and_then(Option::as_ref)
    }

    pub fn bias_delta(&self, index: usize) -> Option<&Tensor> {
        self.bias_deltas.get(index).and_then(Option::as_ref)
    }

    /// Weights and biases of the layer at `index`, if it is parameterized.
    pub fn parameters(&self, index: usize) -> Option<(&Tensor, &Tensor)> {
        self.layers.get(index).and_then(ModelLayer::parameters)
    }

    pub fn statistics(&self, index: usize) -> Option<&NormStatistics> {
        self.layers.get(index).and_then(ModelLayer::statistics)
    }

    /// Total number of weights and biases across all layers.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(ModelLayer::parameter_count).sum()
    }
}

impl std::fmt::Debug for CompositeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeModel")
            .field("layers", &self.layers)
            .finish()
    }
}

/// Fetch a required tensor and check it can replace `current`.
fn checked(
    state: &StateDict,
    layer: usize,
    field: StateField,
    current: &Tensor,
) -> Result<Tensor> {
    let key = StateKey::new(layer, field);
    let tensor = state.require(key)?;
    if !tensor.same_shape(current) || tensor.len() != current.len() {
        return Err(NetworkError::shape_mismatch(
            key.to_string(),
            current.shape(),
            tensor.shape(),
        ));
    }
    Ok(tensor.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{DenseLayer, DropoutLayer};
    use crate::utils::{Activation, SimpleRng};

    fn small_model() -> CompositeModel {
        let mut rng = SimpleRng::new(5);
        CompositeModel::new(vec![
            ModelLayer::parameterized(DenseLayer::new(
                &[3],
                4,
                Activation::Tanh,
                None,
                &mut rng,
            )),
            ModelLayer::stateless(DropoutLayer::new(0.2, &mut rng).unwrap()),
            ModelLayer::parameterized(DenseLayer::new(
                &[4],
                2,
                Activation::Sigmoid,
                None,
                &mut rng,
            )),
        ])
    }

    #[test]
    fn test_delta_slots_follow_capabilities() {
        let model = small_model();
        assert_eq!(model.len(), 3);
        assert_eq!(model.weight_delta(0).unwrap().shape(), &[3, 4]);
        assert_eq!(model.bias_delta(0).unwrap().shape(), &[4]);
        assert!(model.weight_delta(1).is_none());
        assert!(model.bias_delta(1).is_none());
        assert_eq!(model.weight_delta(2).unwrap().shape(), &[4, 2]);
        assert_eq!(model.capability(1), Some(Capability::Stateless));
        assert_eq!(model.capability(3), None);
    }

    #[test]
    fn test_apply_rejects_negative_learning_rate() {
        let mut model = small_model();
        assert!(matches!(
            model.apply_deltas(-0.1),
            Err(NetworkError::InvalidLearningRate(_))
        ));
        assert!(model.apply_deltas(f32::NAN).is_err());
    }

    #[test]
    fn test_parameter_count() {
        let model = small_model();
        assert_eq!(model.parameter_count(), (3 * 4 + 4) + (4 * 2 + 2));
    }

    #[test]
    fn test_export_skips_stateless_layers() {
        let state = small_model().export_state();
        assert_eq!(state.len(), 4);
        assert!(!state.contains(&StateKey::new(1, StateField::Weights)));
    }

    #[test]
    fn test_empty_model_forward_is_identity() {
        let mut model = CompositeModel::new(Vec::new());
        assert!(model.is_empty());
        let input = Tensor::full(&[1, 2], 3.0);
        assert_eq!(model.forward(&input).unwrap(), input);
    }
}
