//! Batch normalization embedded in parameterized layers
//!
//! Dense, convolution and transposed-convolution layers configured with
//! `batch_norm = true` normalise their affine output per channel before the
//! activation:
//!
//! 1. Compute batch statistics: mean μ and variance σ² per channel over every
//!    batch entry and spatial position
//! 2. Normalize: x_norm = (x - μ) / sqrt(σ² + ε)
//! 3. Scale and shift: y = scale * x_norm + shift
//!
//! During training the running statistics are updated with an exponential
//! moving average; during inference they replace the batch statistics.
//!
//! Scale and shift are persisted with the model state but are not updated by
//! the model's gradient descent step.

use crate::error::{NetworkError, Result};
use crate::state::StateField;
use crate::tensor::Tensor;

/// The four persisted normalisation tensors, each of shape `[channels]`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormStatistics {
    pub scale: Tensor,
    pub shift: Tensor,
    pub running_mean: Tensor,
    pub running_var: Tensor,
}

impl NormStatistics {
    /// Identity affine transform, zero running mean, unit running variance.
    pub fn new(channels: usize) -> Self {
        Self {
            scale: Tensor::full(&[channels], 1.0),
            shift: Tensor::zeros(&[channels]),
            running_mean: Tensor::zeros(&[channels]),
            running_var: Tensor::full(&[channels], 1.0),
        }
    }

    /// The tensor stored under a statistics field; `None` for weights and biases.
    pub fn field(&self, field: StateField) -> Option<&Tensor> {
        match field {
            StateField::Scale => Some(&self.scale),
            StateField::Shift => Some(&self.shift),
            StateField::RunningMean => Some(&self.running_mean),
            StateField::RunningVar => Some(&self.running_var),
            StateField::Weights | StateField::Biases => None,
        }
    }

    pub fn field_mut(&mut self, field: StateField) -> Option<&mut Tensor> {
        match field {
            StateField::Scale => Some(&mut self.scale),
            StateField::Shift => Some(&mut self.shift),
            StateField::RunningMean => Some(&mut self.running_mean),
            StateField::RunningVar => Some(&mut self.running_var),
            StateField::Weights | StateField::Biases => None,
        }
    }
}

/// Per-channel batch normalisation over data laid out as `[rows, channels]`.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    channels: usize,
    epsilon: f32,
    momentum: f32,
    training: bool,
    stats: NormStatistics,

    // Cached values from forward pass (needed for backward pass)
    cached_normalized: Vec<f32>,
    cached_std: Vec<f32>,
}

impl BatchNorm {
    /// Create a batch normalisation stage.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `epsilon` is not positive or `momentum` is outside `[0, 1]`.
    pub fn new(channels: usize, epsilon: f32, momentum: f32) -> Result<Self> {
        if epsilon <= 0.0 {
            return Err(NetworkError::InvalidConfig(
                "epsilon must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&momentum) {
            return Err(NetworkError::InvalidConfig(
                "momentum must be in range [0.0, 1.0]".to_string(),
            ));
        }

        Ok(Self {
            channels,
            epsilon,
            momentum,
            training: true,
            stats: NormStatistics::new(channels),
            cached_normalized: Vec::new(),
            cached_std: Vec::new(),
        })
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn statistics(&self) -> &NormStatistics {
        &self.stats
    }

    pub fn statistics_mut(&mut self) -> &mut NormStatistics {
        &mut self.stats
    }

    /// Normalise `data` in place.
    pub fn forward(&mut self, data: &mut [f32]) {
        let channels = self.channels;
        let rows = data.len() / channels;
        let scale = self.stats.scale.data();
        let shift = self.stats.shift.data();

        if !self.training {
            let running_mean = self.stats.running_mean.data();
            let running_var = self.stats.running_var.data();
            for row in data.chunks_exact_mut(channels) {
                for j in 0..channels {
                    let normalized =
                        (row[j] - running_mean[j]) / (running_var[j] + self.epsilon).sqrt();
                    row[j] = scale[j] * normalized + shift[j];
                }
            }
            return;
        }

        let mut batch_mean = vec![0.0f32; channels];
        let mut batch_var = vec![0.0f32; channels];

        for row in data.chunks_exact(channels) {
            for j in 0..channels {
                batch_mean[j] += row[j];
            }
        }
        for mean in &mut batch_mean {
            *mean /= rows as f32;
        }

        for row in data.chunks_exact(channels) {
            for j in 0..channels {
                let diff = row[j] - batch_mean[j];
                batch_var[j] += diff * diff;
            }
        }
        for var in &mut batch_var {
            *var /= rows as f32;
        }

        let std: Vec<f32> = batch_var
            .iter()
            .map(|&v| (v + self.epsilon).sqrt())
            .collect();

        let mut normalized = vec![0.0f32; data.len()];
        for (row, norm_row) in data
            .chunks_exact_mut(channels)
            .zip(normalized.chunks_exact_mut(channels))
        {
            for j in 0..channels {
                norm_row[j] = (row[j] - batch_mean[j]) / std[j];
                row[j] = scale[j] * norm_row[j] + shift[j];
            }
        }

        // running = momentum * running + (1 - momentum) * batch
        let momentum = self.momentum;
        for (running, &batch) in self
            .stats
            .running_mean
            .data_mut()
            .iter_mut()
            .zip(batch_mean.iter())
        {
            *running = momentum * *running + (1.0 - momentum) * batch;
        }
        for (running, &batch) in self
            .stats
            .running_var
            .data_mut()
            .iter_mut()
            .zip(batch_var.iter())
        {
            *running = momentum * *running + (1.0 - momentum) * batch;
        }

        self.cached_normalized = normalized;
        self.cached_std = std;
    }

    /// Turn the gradient w.r.t. the normalised output into the gradient
    /// w.r.t. the normalisation input, in place.
    pub fn backward(&self, grad: &mut [f32], layer: &str) -> Result<()> {
        let channels = self.channels;
        let scale = self.stats.scale.data();

        if !self.training {
            let running_var = self.stats.running_var.data();
            for row in grad.chunks_exact_mut(channels) {
                for j in 0..channels {
                    row[j] *= scale[j] / (running_var[j] + self.epsilon).sqrt();
                }
            }
            return Ok(());
        }

        if self.cached_normalized.len() != grad.len() {
            return Err(NetworkError::MissingForwardCache {
                layer: layer.to_string(),
            });
        }

        let rows = (grad.len() / channels) as f32;
        let normalized = &self.cached_normalized;
        let std = &self.cached_std;

        let mut sum_grad = vec![0.0f32; channels];
        let mut sum_grad_norm = vec![0.0f32; channels];
        for (g_row, n_row) in grad
            .chunks_exact(channels)
            .zip(normalized.chunks_exact(channels))
        {
            for j in 0..channels {
                let d = g_row[j] * scale[j];
                sum_grad[j] += d;
                sum_grad_norm[j] += d * n_row[j];
            }
        }

        for (g_row, n_row) in grad
            .chunks_exact_mut(channels)
            .zip(normalized.chunks_exact(channels))
        {
            for j in 0..channels {
                let d = g_row[j] * scale[j];
                g_row[j] = (d - sum_grad[j] / rows - n_row[j] * sum_grad_norm[j] / rows) / std[j];
            }
        }
        Ok(())
    }
}
