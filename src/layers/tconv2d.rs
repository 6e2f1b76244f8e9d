//! Transposed 2D convolution layer
//!
//! Upsamples NHWC feature maps: every input pixel scatters a weighted copy of
//! the kernel into the output. With kernel 4, stride 2 and padding 1 the
//! spatial size doubles.

use crate::error::{NetworkError, Result};
use crate::layers::batchnorm::{BatchNorm, NormStatistics};
use crate::layers::conv2d::ConvGeometry;
use crate::layers::output::OutputStage;
use crate::layers::r#trait::{check_delta, check_grad, check_input};
use crate::layers::{Layer, ParameterizedLayer};
use crate::tensor::Tensor;
use crate::utils::{Activation, SimpleRng};

/// Transposed convolution with weights `[k, k, in_channels, filters]`.
///
/// # Example
///
/// ```
/// use gan_networks::layers::{ConvGeometry, TConv2DLayer};
/// use gan_networks::utils::{Activation, SimpleRng};
///
/// let geometry = ConvGeometry {
///     input_height: 8, input_width: 8, in_channels: 256,
///     filters: 128, kernel_size: 4, stride: 2, padding: 1,
/// };
/// let mut rng = SimpleRng::new(42);
/// let layer = TConv2DLayer::new(geometry, Activation::Linear, None, &mut rng).unwrap();
/// assert_eq!(layer.output_shape(), [16, 16, 128]);
/// ```
pub struct TConv2DLayer {
    geometry: ConvGeometry,
    output_height: usize,
    output_width: usize,
    weights: Tensor,
    biases: Tensor,
    stage: OutputStage,
    cached_input: Option<Tensor>,
}

impl TConv2DLayer {
    pub fn new(
        geometry: ConvGeometry,
        activation: Activation,
        norm: Option<BatchNorm>,
        rng: &mut SimpleRng,
    ) -> Result<Self> {
        let (output_height, output_width) = geometry.transposed_output()?;
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

    pub fn output_shape(&self) -> [usize; 3] {
        [self.output_height, self.output_width, self.geometry.filters]
    }
}

impl Layer for TConv2DLayer {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let g = self.geometry;
        let batch = check_input(self.name(), input, &g.input_shape())?;
        let (ih, iw, c_in, f_out) = (g.input_height, g.input_width, g.in_channels, g.filters);
        let (oh, ow, k) = (self.output_height, self.output_width, g.kernel_size);
        let x = input.data();
        let w = self.weights.data();
        let b = self.biases.data();

        let mut z = vec![0.0f32; batch * oh * ow * f_out];
        for px in z.chunks_exact_mut(f_out) {
            px.copy_from_slice(b);
        }

        for bi in 0..batch {
            for iy in 0..ih {
                for ix in 0..iw {
                    let in_base = ((bi * ih + iy) * iw + ix) * c_in;
                    let x_px = &x[in_base..in_base + c_in];
                    for ky in 0..k {
                        let Some(oy) = g.tap(iy, ky, oh) else { continue };
                        for kx in 0..k {
                            let Some(ox) = g.tap(ix, kx, ow) else { continue };
                            let out_base = ((bi * oh + oy) * ow + ox) * f_out;
                            for (c, &xv) in x_px.iter().enumerate() {
                                if xv == 0.0 {
                                    continue;
                                }
                                let w_base = ((ky * k + kx) * c_in + c) * f_out;
                                for f in 0..f_out {
                                    z[out_base + f] += xv * w[w_base + f];
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
        "tconv2d"
    }
}

impl ParameterizedLayer for TConv2DLayer {
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

        let db = bias_delta.data_mut();
        for g_px in grad.chunks_exact(f_out) {
            for (dbf, &gf) in db.iter_mut().zip(g_px.iter()) {
                *dbf += gf;
            }
        }

        let x = input.data();
        let w = self.weights.data();
        let dw = weight_delta.data_mut();
        let mut grad_input = vec![0.0f32; x.len()];

        for bi in 0..batch {
            for iy in 0..ih {
                for ix in 0..iw {
                    let in_base = ((bi * ih + iy) * iw + ix) * c_in;
                    for ky in 0..k {
                        let Some(oy) = g.tap(iy, ky, oh) else { continue };
                        for kx in 0..k {
                            let Some(ox) = g.tap(ix, kx, ow) else { continue };
                            let out_base = ((bi * oh + oy) * ow + ox) * f_out;
                            let g_px = &grad[out_base..out_base + f_out];
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
