//! Dropout layer implementation for regularization
//!
//! This module provides a DropoutLayer that randomly drops (sets to zero) a fraction
//! of input units during training. During inference all units are kept and the
//! input passes through unchanged. Dropout owns no persisted tensors, so it is the
//! stateless member of a composite model.

use crate::error::{NetworkError, Result};
use crate::layers::r#trait::check_grad;
use crate::layers::{Layer, StatelessLayer};
use crate::tensor::Tensor;
use crate::utils::rng::SimpleRng;

/// Dropout layer for regularization.
///
/// During training, each unit is zeroed with probability `drop_rate` and the
/// remaining units are scaled by 1/(1-drop_rate) to keep the expected value.
/// The layer accepts any input shape.
///
/// # Example
///
/// ```
/// use gan_networks::layers::{DropoutLayer, Layer};
/// use gan_networks::tensor::Tensor;
/// use gan_networks::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let mut layer = DropoutLayer::new(0.3, &mut rng).unwrap();
/// layer.set_training(false);
/// let input = Tensor::full(&[2, 4], 1.5);
/// assert_eq!(layer.forward(&input).unwrap(), input);
/// ```
pub struct DropoutLayer {
    drop_rate: f32,
    training: bool,
    mask: Vec<f32>,
    mask_shape: Vec<usize>,
    rng: SimpleRng,
}

impl DropoutLayer {
    /// Creates a new dropout layer in training mode.
    ///
    /// The layer draws its masks from a stream forked off `rng`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` unless `drop_rate` is in `[0.0, 1.0)`.
    pub fn new(drop_rate: f32, rng: &mut SimpleRng) -> Result<Self> {
        if !(0.0..1.0).contains(&drop_rate) {
            return Err(NetworkError::InvalidConfig(
                "drop_rate must be in range [0.0, 1.0)".to_string(),
            ));
        }

        Ok(Self {
            drop_rate,
            training: true,
            mask: Vec::new(),
            mask_shape: Vec::new(),
            rng: rng.fork(),
        })
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn drop_rate(&self) -> f32 {
        self.drop_rate
    }
}

impl Layer for DropoutLayer {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        if !self.training {
            return Ok(input.clone());
        }

        let scale = 1.0 / (1.0 - self.drop_rate);
        self.mask.clear();
        self.mask.reserve(input.len());

        let mut output = Tensor::zeros(input.shape());
        for (out, &value) in output.data_mut().iter_mut().zip(input.data().iter()) {
            if self.rng.next_f32() >= self.drop_rate {
                self.mask.push(1.0);
                *out = value * scale;
            } else {
                self.mask.push(0.0);
            }
        }
        self.mask_shape = input.shape().to_vec();
        Ok(output)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn name(&self) -> &'static str {
        "dropout"
    }
}

impl StatelessLayer for DropoutLayer {
    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        if !self.training {
            return Ok(grad_output.clone());
        }
        if self.mask_shape.is_empty() {
            return Err(NetworkError::MissingForwardCache {
                layer: self.name().to_string(),
            });
        }
        check_grad(self.name(), grad_output, &self.mask_shape)?;

        let scale = 1.0 / (1.0 - self.drop_rate);
        let mut grad_input = grad_output.clone();
        for (g, &m) in grad_input.data_mut().iter_mut().zip(self.mask.iter()) {
            *g *= m * scale;
        }
        Ok(grad_input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropout_creation() {
        let mut rng = SimpleRng::new(42);
        let layer = DropoutLayer::new(0.3, &mut rng).unwrap();
        assert!(layer.is_training());
        assert_eq!(layer.drop_rate(), 0.3);
    }

    #[test]
    fn test_invalid_drop_rate() {
        let mut rng = SimpleRng::new(42);
        assert!(DropoutLayer::new(1.0, &mut rng).is_err());
        assert!(DropoutLayer::new(-0.1, &mut rng).is_err());
    }

    #[test]
    fn test_training_mask_and_scale() {
        let mut rng = SimpleRng::new(42);
        let mut layer = DropoutLayer::new(0.5, &mut rng).unwrap();
        let input = Tensor::full(&[4, 250], 1.0);
        let output = layer.forward(&input).unwrap();

        let kept = output.data().iter().filter(|&&v| v != 0.0).count();
        for &v in output.data() {
            assert!(v == 0.0 || (v - 2.0).abs() < 1e-6);
        }
        // roughly half the units survive
        assert!(kept > 400 && kept < 600, "kept {} of 1000", kept);

        let grad = Tensor::full(&[4, 250], 1.0);
        let grad_input = layer.backward(&grad).unwrap();
        assert_eq!(grad_input, output);
    }

    #[test]
    fn test_zero_rate_keeps_everything() {
        let mut rng = SimpleRng::new(9);
        let mut layer = DropoutLayer::new(0.0, &mut rng).unwrap();
        let input = Tensor::from_vec(vec![1, 3], vec![1.0, -2.0, 3.0]).unwrap();
        assert_eq!(layer.forward(&input).unwrap(), input);
    }

    #[test]
    fn test_backward_shape_mismatch() {
        let mut rng = SimpleRng::new(42);
        let mut layer = DropoutLayer::new(0.5, &mut rng).unwrap();
        layer.forward(&Tensor::zeros(&[1, 4])).unwrap();
        assert!(matches!(
            layer.backward(&Tensor::zeros(&[1, 5])),
            Err(NetworkError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_backward_before_forward() {
        let mut rng = SimpleRng::new(42);
        let mut layer = DropoutLayer::new(0.5, &mut rng).unwrap();
        assert!(layer.backward(&Tensor::zeros(&[1, 4])).is_err());
    }
}
