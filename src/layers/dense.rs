//! Dense (fully connected) layer implementation
//!
//! This module provides a DenseLayer that performs the transformation:
//! output = act(norm(input × weights + biases))

use crate::error::{NetworkError, Result};
use crate::layers::batchnorm::{BatchNorm, NormStatistics};
use crate::layers::output::OutputStage;
use crate::layers::r#trait::{check_delta, check_grad, check_input};
use crate::layers::{Layer, ParameterizedLayer};
use crate::tensor::Tensor;
use crate::utils::{Activation, SimpleRng};

/// Dense (fully connected) layer with weights and biases.
///
/// Performs the linear transformation: z = xW + b, optionally batch-normalised,
/// followed by the activation. Any input whose per-sample element count equals
/// the product of `input_shape` is accepted and flattened.
///
/// # Fields
///
/// * `input_shape` - Per-sample input shape (e.g. `[16, 16, 128]`)
/// * `weights` - Weight matrix `[input_size, output_size]`
/// * `biases` - Bias vector `[output_size]`
///
/// # Example
///
/// ```
/// use gan_networks::layers::{DenseLayer, ParameterizedLayer};
/// use gan_networks::utils::{Activation, SimpleRng};
///
/// let mut rng = SimpleRng::new(42);
/// let layer = DenseLayer::new(&[1, 1, 100], 64, Activation::Linear, None, &mut rng);
/// assert_eq!(layer.weights().shape(), &[100, 64]);
/// assert_eq!(layer.parameter_count(), 100 * 64 + 64);
/// ```
pub struct DenseLayer {
    input_shape: Vec<usize>,
    input_size: usize,
    output_size: usize,
    weights: Tensor,
    biases: Tensor,
    stage: OutputStage,
    cached_input: Option<Tensor>,
}

impl DenseLayer {
    /// Create a new DenseLayer with Xavier initialization.
    ///
    /// Weights are sampled from `[-limit, limit]` with
    /// `limit = sqrt(6 / (input_size + output_size))`; biases start at zero.
    pub fn new(
        input_shape: &[usize],
        output_size: usize,
        activation: Activation,
        norm: Option<BatchNorm>,
        rng: &mut SimpleRng,
    ) -> Self {
        let input_size: usize = input_shape.iter().product();
        let limit = (6.0f32 / (input_size + output_size) as f32).sqrt();

        let mut weights = Tensor::zeros(&[input_size, output_size]);
        for value in weights.data_mut() {
            *value = rng.gen_range_f32(-limit, limit);
        }

        Self {
            input_shape: input_shape.to_vec(),
            input_size,
            output_size,
            weights,
            biases: Tensor::zeros(&[output_size]),
            stage: OutputStage::new(activation, norm),
            cached_input: None,
        }
    }

    /// Build a layer around explicit parameters.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` unless `weights` is `[in, out]` and `biases` is `[out]`.
    pub fn from_parameters(
        weights: Tensor,
        biases: Tensor,
        activation: Activation,
    ) -> Result<Self> {
        if weights.shape().len() != 2 {
            return Err(NetworkError::shape_mismatch(
                "dense weights",
                &[0, 0],
                weights.shape(),
            ));
        }
        let (input_size, output_size) = (weights.shape()[0], weights.shape()[1]);
        if biases.shape() != [output_size] {
            return Err(NetworkError::shape_mismatch(
                "dense biases",
                &[output_size],
                biases.shape(),
            ));
        }

        Ok(Self {
            input_shape: vec![input_size],
            input_size,
            output_size,
            weights,
            biases,
            stage: OutputStage::new(activation, None),
            cached_input: None,
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn activation(&self) -> Activation {
        self.stage.activation()
    }
}

impl Layer for DenseLayer {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let batch = check_input(self.name(), input, &self.input_shape)?;
        let (n_in, n_out) = (self.input_size, self.output_size);
        let x = input.data();
        let w = self.weights.data();
        let b = self.biases.data();

        let mut z = vec![0.0f32; batch * n_out];
        for (x_row, z_row) in x.chunks_exact(n_in).zip(z.chunks_exact_mut(n_out)) {
            z_row.copy_from_slice(b);
            for (i, &xi) in x_row.iter().enumerate() {
                if xi == 0.0 {
                    continue;
                }
                let w_row = &w[i * n_out..(i + 1) * n_out];
                for (zo, &wo) in z_row.iter_mut().zip(w_row.iter()) {
                    *zo += xi * wo;
                }
            }
        }

        let output = self.stage.forward(z);
        self.cached_input = Some(input.clone());
        Tensor::from_vec(vec![batch, n_out], output)
    }

    fn set_training(&mut self, training: bool) {
        self.stage.set_training(training);
    }

    fn name(&self) -> &'static str {
        "dense"
    }
}

impl ParameterizedLayer for DenseLayer {
    fn weights(&self) -> &Tensor {
        &self.weights
    }

    fn weights_mut(&mut self) -> &mut Tensor {
        &mut self.weights
    }

    fn biases(&self) -> &Tensor {
        &self.biases
    }

    fn biases_mut(&mut self) -> &mut Tensor {
        &mut self.biases
    }

    fn backward(
        &mut self,
        grad_output: &Tensor,
        weight_delta: &mut Tensor,
        bias_delta: &mut Tensor,
    ) -> Result<Tensor> {
        let input = self
            .cached_input
            .as_ref()
            .ok_or_else(|| NetworkError::MissingForwardCache {
                layer: self.name().to_string(),
            })?;
        let batch = input.batch_size();
        let (n_in, n_out) = (self.input_size, self.output_size);
        check_grad(self.name(), grad_output, &[batch, n_out])?;
        check_delta(self.name(), weight_delta, &self.weights)?;
        check_delta(self.name(), bias_delta, &self.biases)?;

        let grad = self.stage.backward(grad_output.data(), self.name())?;

        let x = input.data();
        let w = self.weights.data();
        let dw = weight_delta.data_mut();
        let db = bias_delta.data_mut();
        let mut grad_input = vec![0.0f32; batch * n_in];

        for ((x_row, g_row), gi_row) in x
            .chunks_exact(n_in)
            .zip(grad.chunks_exact(n_out))
            .zip(grad_input.chunks_exact_mut(n_in))
        {
            for (dbo, &go) in db.iter_mut().zip(g_row.iter()) {
                *dbo += go;
            }
            for i in 0..n_in {
                let w_row = &w[i * n_out..(i + 1) * n_out];
                let dw_row = &mut dw[i * n_out..(i + 1) * n_out];
                let mut acc = 0.0f32;
                for o in 0..n_out {
                    dw_row[o] += x_row[i] * g_row[o];
                    acc += w_row[o] * g_row[o];
                }
                gi_row[i] = acc;
            }
        }

        Tensor::from_vec(input.shape().to_vec(), grad_input)
    }

    fn statistics(&self) -> Option<&NormStatistics> {
        self.stage.statistics()
    }

    fn statistics_mut(&mut self) -> Option<&mut NormStatistics> {
        self.stage.statistics_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fixed_layer() -> DenseLayer {
        let weights = Tensor::from_vec(vec![2, 2], vec![0.5, -1.0, 0.25, 2.0]).unwrap();
        let biases = Tensor::from_vec(vec![2], vec![0.1, -0.2]).unwrap();
        DenseLayer::from_parameters(weights, biases, Activation::Linear).unwrap()
    }

    #[test]
    fn test_dense_layer_creation() {
        let mut rng = SimpleRng::new(42);
        let layer = DenseLayer::new(&[10], 5, Activation::Linear, None, &mut rng);

        assert_eq!(layer.input_size(), 10);
        assert_eq!(layer.output_size(), 5);
        assert_eq!(layer.weights().len(), 50);
        assert_eq!(layer.biases().len(), 5);
        assert!(layer.statistics().is_none());
    }

    #[test]
    fn test_xavier_initialization() {
        let mut rng = SimpleRng::new(42);
        let layer = DenseLayer::new(&[100], 50, Activation::Linear, None, &mut rng);
        let limit = (6.0f32 / 150.0).sqrt();

        for &weight in layer.weights().data() {
            assert!(
                weight >= -limit && weight <= limit,
                "Weight {} outside Xavier range [{}, {}]",
                weight,
                -limit,
                limit
            );
        }
        assert_eq!(layer.biases().abs_sum(), 0.0);
    }

    #[test]
    fn test_forward_known_values() {
        let mut layer = fixed_layer();
        let input = Tensor::from_vec(vec![1, 2], vec![1.0, 2.0]).unwrap();
        let output = layer.forward(&input).unwrap();

        assert_eq!(output.shape(), &[1, 2]);
        assert_relative_eq!(output.data()[0], 1.1, epsilon = 1e-6);
        assert_relative_eq!(output.data()[1], 2.8, epsilon = 1e-6);
    }

    #[test]
    fn test_backward_known_values() {
        let mut layer = fixed_layer();
        let input = Tensor::from_vec(vec![1, 2], vec![1.0, 2.0]).unwrap();
        layer.forward(&input).unwrap();

        let grad = Tensor::from_vec(vec![1, 2], vec![1.0, -1.0]).unwrap();
        let mut dw = Tensor::zeros(&[2, 2]);
        let mut db = Tensor::zeros(&[2]);
        let grad_input = layer.backward(&grad, &mut dw, &mut db).unwrap();

        assert_eq!(dw.data(), &[1.0, -1.0, 2.0, -2.0]);
        assert_eq!(db.data(), &[1.0, -1.0]);
        assert_relative_eq!(grad_input.data()[0], 1.5, epsilon = 1e-6);
        assert_relative_eq!(grad_input.data()[1], -1.75, epsilon = 1e-6);
    }

    #[test]
    fn test_forward_rejects_wrong_size() {
        let mut layer = fixed_layer();
        let input = Tensor::zeros(&[1, 3]);
        assert!(matches!(
            layer.forward(&input),
            Err(NetworkError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_backward_before_forward() {
        let mut layer = fixed_layer();
        let grad = Tensor::zeros(&[1, 2]);
        let mut dw = Tensor::zeros(&[2, 2]);
        let mut db = Tensor::zeros(&[2]);
        assert!(matches!(
            layer.backward(&grad, &mut dw, &mut db),
            Err(NetworkError::MissingForwardCache { .. })
        ));
    }

    #[test]
    fn test_batch_norm_capability() {
        let mut rng = SimpleRng::new(3);
        let norm = BatchNorm::new(8, 1e-5, 0.9).unwrap();
        let layer = DenseLayer::new(&[4], 8, Activation::Relu, Some(norm), &mut rng);
        let stats = layer.statistics().unwrap();
        assert_eq!(stats.scale.shape(), &[8]);
        assert_eq!(stats.running_var.shape(), &[8]);
    }
}
