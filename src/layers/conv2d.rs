//! 2D Convolutional layer implementation
//!
//! This module provides a Conv2DLayer that performs strided 2D convolution over
//! NHWC feature maps, plus the [`ConvGeometry`] shared with the transposed
//! convolution.

use crate::error::{NetworkError, Result};
use crate::layers::batchnorm::{BatchNorm, NormStatistics};
use crate::layers::output::OutputStage;
use crate::layers::r#trait::{check_delta, check_grad, check_input};
use crate::layers::{Layer, ParameterizedLayer};
use crate::tensor::Tensor;
use crate::utils::{Activation, SimpleRng};

/// Spatial configuration of a (transposed) convolution.
///
/// # Fields
///
/// * `input_height`, `input_width`, `in_channels` - Per-sample input shape (HWC)
/// * `filters` - Number of output channels
/// * `kernel_size` - Size of the square kernel
/// * `stride` - Step between kernel applications
/// * `padding` - Zero-padding applied symmetrically on every side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub input_height: usize,
    pub input_width: usize,
    pub in_channels: usize,
    pub filters: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
}

impl ConvGeometry {
    pub fn input_shape(&self) -> [usize; 3] {
        [self.input_height, self.input_width, self.in_channels]
    }

    /// Weight shape `[kernel, kernel, in_channels, filters]`.
    pub fn weight_shape(&self) -> [usize; 4] {
        [
            self.kernel_size,
            self.kernel_size,
            self.in_channels,
            self.filters,
        ]
    }

    /// Output size of a forward convolution: `(n + 2p - k) / s + 1`.
    pub fn conv_output(&self) -> Result<(usize, usize)> {
        self.check()?;
        let span = |n: usize| -> Result<usize> {
            let padded = n + 2 * self.padding;
            if padded < self.kernel_size {
                return Err(NetworkError::InvalidConfig(format!(
                    "kernel_size {} exceeds padded input size {}",
                    self.kernel_size, padded
                )));
            }
            Ok((padded - self.kernel_size) / self.stride + 1)
        };
        Ok((span(self.input_height)?, span(self.input_width)?))
    }

    /// Output size of a transposed convolution: `(n - 1) * s - 2p + k`.
    pub fn transposed_output(&self) -> Result<(usize, usize)> {
        self.check()?;
        let span = |n: usize| -> Result<usize> {
            let full = (n - 1) * self.stride + self.kernel_size;
            if full <= 2 * self.padding {
                return Err(NetworkError::InvalidConfig(format!(
                    "padding {} leaves no output for input size {}",
                    self.padding, n
                )));
            }
            Ok(full - 2 * self.padding)
        };
        Ok((span(self.input_height)?, span(self.input_width)?))
    }

    fn check(&self) -> Result<()> {
        let fields = [
            ("input_height", self.input_height),
            ("input_width", self.input_width),
            ("in_channels", self.in_channels),
            ("filters", self.filters),
            ("kernel_size", self.kernel_size),
            ("stride", self.stride),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(NetworkError::InvalidConfig(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Xavier-uniform weights: fan_in = c_in·k², fan_out = filters·k².
    pub(crate) fn xavier_weights(&self, rng: &mut SimpleRng) -> Tensor {
        let k2 = self.kernel_size * self.kernel_size;
        let fan_in = (self.in_channels * k2) as f32;
        let fan_out = (self.filters * k2) as f32;
        let limit = (6.0f32 / (fan_in + fan_out)).sqrt();

        let mut weights = Tensor::zeros(&self.weight_shape());
        for value in weights.data_mut() {
            *value = rng.gen_range_f32(-limit, limit);
        }
        weights
    }

    /// Map output (or, for transposed convolution, input) coordinate `o` and kernel
    /// offset `k` onto the other side's coordinate, if it falls inside `[0, n)`.
    #[inline]
    pub(crate) fn tap(&self, o: usize, k: usize, n: usize) -> Option<usize> {
        let pos = (o * self.stride + k) as isize - self.padding as isize;
        if pos >= 0 && (pos as usize) < n {
            Some(pos as usize)
        } else {
            None
        }
    }
}

/// 2D Convolutional layer with learnable filters.
///
/// # Example
///
/// ```
/// use gan_networks::layers::{Conv2DLayer, ConvGeometry, ParameterizedLayer};
/// use gan_networks::utils::{Activation, SimpleRng};
///
/// let geometry = ConvGeometry {
///     input_height: 64, input_width: 64, in_channels: 3,
///     filters: 64, kernel_size: 4, stride: 2, padding: 1,
/// };
/// let mut rng = SimpleRng::new(42);
/// let layer = Conv2DLayer::new(geometry, Activation::Linear, None, &mut rng).unwrap();
/// assert_eq!(layer.output_shape(), [32, 32, 64]);
/// assert_eq!(layer.weights().shape(), &[4, 4, 3, 64]);
/// ```
pub struct Conv2DLayer {
    geometry: ConvGeometry,
    output_height: usize,
    output_width: usize,
    weights: Tensor,
    biases: Tensor,
    stage: OutputStage,
    cached_input: Option<Tensor>,
}

impl Conv2DLayer {
    /// Create a new Conv2DLayer with Xavier initialization and zero biases.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the geometry has a zero dimension or produces an empty output.
    pub fn new(
        geometry: ConvGeometry,
        activation: Activation,
        norm: Option<BatchNorm>,
        rng: &mut SimpleRng,
    ) -> Result<Self> {
        let (output_height, output_width) = geometry.conv_output()?;
        Ok(Self {
            geometry,
            output_height,
            output_width,
            weights: geometry.xavier_weights(rng),
            biases: Tensor::zeros(&[geometry.filters]),
            stage: OutputStage::new(activation, norm),
            cached_input: None,
        })
    }

    pub fn geometry(&self) -> ConvGeometry {
        self.geometry
    }

    /// Per-sample output shape (HWC).
    pub fn output_shape(&self) -> [usize; 3] {
        [self.output_height, self.output_width, self.geometry.filters]
    }
}

impl Layer for Conv2DLayer {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let g = self.geometry;
        let batch = check_input(self.name(), input, &g.input_shape())?;
        let (ih, iw, c_in, f_out) = (g.input_height, g.input_width, g.in_channels, g.filters);
        let (oh, ow, k) = (self.output_height, self.output_width, g.kernel_size);
        let x = input.data();
        let w = self.weights.data();
        let b = self.biases.data();

        let mut z = vec![0.0f32; batch * oh * ow * f_out];
        for bi in 0..batch {
            for oy in 0..oh {
                for ox in 0..ow {
                    let out_base = ((bi * oh + oy) * ow + ox) * f_out;
                    let z_px = &mut z[out_base..out_base + f_out];
                    z_px.copy_from_slice(b);
                    for ky in 0..k {
                        let Some(iy) = g.tap(oy, ky, ih) else { continue };
                        for kx in 0..k {
                            let Some(ix) = g.tap(ox, kx, iw) else { continue };
                            let in_base = ((bi * ih + iy) * iw + ix) * c_in;
                            for c in 0..c_in {
                                let xv = x[in_base + c];
                                let w_base = ((ky * k + kx) * c_in + c) * f_out;
                                let w_row = &w[w_base..w_base + f_out];
                                for (zf, &wf) in z_px.iter_mut().zip(w_row.iter()) {
                                    *zf += xv * wf;
                                }
                            }
                        }
                    }
                }
            }
        }

        let output = self.stage.forward(z);
        self.cached_input = Some(input.clone());
        Tensor::from_vec(vec![batch, oh, ow, f_out], output)
    }

    fn set_training(&mut self, training: bool) {
        self.stage.set_training(training);
    }

    fn name(&self) -> &'static str {
        "conv2d"
    }
}

impl ParameterizedLayer for Conv2DLayer {
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
        let g = self.geometry;
        let batch = input.batch_size();
        let (ih, iw, c_in, f_out) = (g.input_height, g.input_width, g.in_channels, g.filters);
        let (oh, ow, k) = (self.output_height, self.output_width, g.kernel_size);
        check_grad(self.name(), grad_output, &[batch, oh, ow, f_out])?;
        check_delta(self.name(), weight_delta, &self.weights)?;
        check_delta(self.name(), bias_delta, &self.biases)?;

        let grad = self.stage.backward(grad_output.data(), self.name())?;

        let x = input.data();
        let w = self.weights.data();
        let dw = weight_delta.data_mut();
        let db = bias_delta.data_mut();
        let mut grad_input = vec![0.0f32; x.len()];

        for bi in 0..batch {
            for oy in 0..oh {
                for ox in 0..ow {
                    let out_base = ((bi * oh + oy) * ow + ox) * f_out;
                    let g_px = &grad[out_base..out_base + f_out];
                    for (dbf, &gf) in db.iter_mut().zip(g_px.iter()) {
                        *dbf += gf;
                    }
                    for ky in 0..k {
                        let Some(iy) = g.tap(oy, ky, ih) else { continue };
                        for kx in 0..k {
                            let Some(ix) = g.tap(ox, kx, iw) else { continue };
                            let in_base = ((bi * ih + iy) * iw + ix) * c_in;
                            for c in 0..c_in {
                                let xv = x[in_base + c];
                                let w_base = ((ky * k + kx) * c_in + c) * f_out;
                                let mut acc = 0.0f32;
                                for f in 0..f_out {
                                    dw[w_base + f] += xv * g_px[f];
                                    acc += w[w_base + f] * g_px[f];
                                }
                                grad_input[in_base + c] += acc;
                            }
                        }
                    }
                }
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

    fn geometry(h: usize, c: usize, f: usize, k: usize, s: usize, p: usize) -> ConvGeometry {
        ConvGeometry {
            input_height: h,
            input_width: h,
            in_channels: c,
            filters: f,
            kernel_size: k,
            stride: s,
            padding: p,
        }
    }

    fn linear(geometry: ConvGeometry, rng: &mut SimpleRng) -> Result<Conv2DLayer> {
        Conv2DLayer::new(geometry, Activation::Linear, None, rng)
    }

    #[test]
    fn test_conv2d_output_dimensions() {
        let mut rng = SimpleRng::new(42);
        let layer = linear(geometry(28, 1, 8, 3, 1, 1), &mut rng).unwrap();
        assert_eq!(layer.output_shape(), [28, 28, 8]);

        let layer = linear(geometry(28, 1, 8, 3, 1, 0), &mut rng).unwrap();
        assert_eq!(layer.output_shape(), [26, 26, 8]);

        let layer = linear(geometry(32, 64, 128, 4, 2, 1), &mut rng).unwrap();
        assert_eq!(layer.output_shape(), [16, 16, 128]);
    }

    #[test]
    fn test_conv2d_parameter_count() {
        let mut rng = SimpleRng::new(42);
        let layer = linear(geometry(28, 1, 8, 3, 1, 1), &mut rng).unwrap();
        // weights: 3 * 3 * 1 * 8 = 72, biases: 8
        assert_eq!(layer.parameter_count(), 80);
    }

    #[test]
    fn test_conv2d_invalid_geometry() {
        let mut rng = SimpleRng::new(42);
        assert!(linear(geometry(2, 1, 1, 5, 1, 0), &mut rng).is_err());
        assert!(linear(geometry(8, 1, 1, 3, 0, 0), &mut rng).is_err());
    }

    #[test]
    fn test_conv2d_known_values() {
        // 3x3 single-channel input, 2x2 kernel of ones, stride 1, no padding
        let mut rng = SimpleRng::new(1);
        let mut layer = linear(geometry(3, 1, 1, 2, 1, 0), &mut rng).unwrap();
        layer.weights_mut().fill(1.0);
        layer.biases_mut().fill(0.5);

        let input =
            Tensor::from_vec(vec![1, 3, 3, 1], (1..=9).map(|v| v as f32).collect()).unwrap();
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape(), &[1, 2, 2, 1]);
        assert_eq!(output.data(), &[12.5, 16.5, 24.5, 28.5]);

        let grad = Tensor::full(&[1, 2, 2, 1], 1.0);
        let mut dw = Tensor::zeros(&[2, 2, 1, 1]);
        let mut db = Tensor::zeros(&[1]);
        let grad_input = layer.backward(&grad, &mut dw, &mut db).unwrap();

        assert_eq!(db.data(), &[4.0]);
        // each kernel tap sees a 2x2 window of the input
        assert_eq!(dw.data(), &[12.0, 16.0, 24.0, 28.0]);
        // corner pixels are covered once, edges twice, centre four times
        assert_eq!(
            grad_input.data(),
            &[1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0]
        );
    }

    #[test]
    fn test_conv2d_padding_excludes_border() {
        let mut rng = SimpleRng::new(1);
        let mut layer = linear(geometry(2, 1, 1, 3, 1, 1), &mut rng).unwrap();
        layer.weights_mut().fill(1.0);
        let input = Tensor::full(&[1, 2, 2, 1], 1.0);
        let output = layer.forward(&input).unwrap();
        // every 3x3 window over the padded 4x4 input covers all four real pixels
        for &v in output.data() {
            assert_relative_eq!(v, 4.0);
        }
    }
}
