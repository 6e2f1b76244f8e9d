//! Post-affine stage shared by parameterized layers: optional batch norm,
//! then the activation.

use crate::error::{NetworkError, Result};
use crate::layers::batchnorm::{BatchNorm, NormStatistics};
use crate::utils::Activation;

#[derive(Debug, Clone)]
pub(crate) struct OutputStage {
    activation: Activation,
    norm: Option<BatchNorm>,
    cached_pre_activation: Vec<f32>,
}

impl OutputStage {
    pub(crate) fn new(activation: Activation, norm: Option<BatchNorm>) -> Self {
        Self {
            activation,
            norm,
            cached_pre_activation: Vec::new(),
        }
    }

    pub(crate) fn activation(&self) -> Activation {
        self.activation
    }

    /// Normalise and activate the affine output `z` (laid out `[.., channels]`).
    pub(crate) fn forward(&mut self, mut z: Vec<f32>) -> Vec<f32> {
        if let Some(norm) = self.norm.as_mut() {
            norm.forward(&mut z);
        }
        let mut output = vec![0.0f32; z.len()];
        self.activation.apply_slice(&z, &mut output);
        self.cached_pre_activation = z;
        output
    }

    /// Gradient w.r.t. the affine output, given the gradient w.r.t. the layer output.
    pub(crate) fn backward(&self, grad_output: &[f32], layer: &str) -> Result<Vec<f32>> {
        if self.cached_pre_activation.len() != grad_output.len() {
            return Err(NetworkError::MissingForwardCache {
                layer: layer.to_string(),
            });
        }
        let mut grad = grad_output.to_vec();
        self.activation
            .backward_inplace(&self.cached_pre_activation, &mut grad);
        if let Some(norm) = self.norm.as_ref() {
            norm.backward(&mut grad, layer)?;
        }
        Ok(grad)
    }

    pub(crate) fn set_training(&mut self, training: bool) {
        if let Some(norm) = self.norm.as_mut() {
            norm.set_training(training);
        }
    }

    pub(crate) fn statistics(&self) -> Option<&NormStatistics> {
        self.norm.as_ref().map(BatchNorm::statistics)
    }

    pub(crate) fn statistics_mut(&mut self) -> Option<&mut NormStatistics> {
        self.norm.as_mut().map(BatchNorm::statistics_mut)
    }
}
