//! Dense f32 tensor used for activations, gradients, parameters and delta buffers
//!
//! Data is stored flat in row-major order. For activations the layout is NHWC:
//! dimension 0 is the batch and the last dimension is the channel.

use crate::error::{NetworkError, Result};
use serde::{Deserialize, Serialize};

/// Row-major f32 tensor with an explicit shape.
///
/// # Example
///
/// ```
/// use gan_networks::tensor::Tensor;
///
/// let t = Tensor::from_vec(vec![2, 2], vec![1.0, -2.0, 3.0, -4.0]).unwrap();
/// assert_eq!(t.shape(), &[2, 2]);
/// assert_eq!(t.abs_sum(), 10.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// Serialized form of a [`Tensor`] before its length is checked against its shape.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = NetworkError;

    fn try_from(raw: RawTensor) -> Result<Self> {
        Tensor::from_vec(raw.shape, raw.data)
    }
}

impl Tensor {
    /// Create a zero-filled tensor.
    pub fn zeros(shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0f32; len],
        }
    }

    /// Create a zero-filled tensor with the same shape as `other`.
    pub fn zeros_like(other: &Tensor) -> Self {
        Self::zeros(&other.shape)
    }

    /// Create a tensor filled with `value`.
    pub fn full(shape: &[usize], value: f32) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![value; len],
        }
    }

    /// Wrap existing data, checking that its length matches the shape.
    pub fn from_vec(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(NetworkError::shape_mismatch(
                "tensor construction",
                &[expected],
                &[data.len()],
            ));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn same_shape(&self, other: &Tensor) -> bool {
        self.shape == other.shape
    }

    /// Leading dimension, or 0 for a scalar-shaped tensor.
    pub fn batch_size(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Number of elements per batch entry (product of every dimension but the first).
    pub fn sample_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    pub fn fill(&mut self, value: f32) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    /// Sum of absolute values; zero exactly when every element is zero.
    pub fn abs_sum(&self) -> f32 {
        self.data.iter().map(|v| v.abs()).sum()
    }

    /// Element-wise `self -= scale * other`.
    ///
    /// This is the gradient-descent primitive: with `self` a parameter and
    /// `other` its accumulated delta, it applies `w = w - lr * dw`.
    pub fn sub_scaled(&mut self, other: &Tensor, scale: f32) -> Result<()> {
        if !self.same_shape(other) {
            return Err(NetworkError::shape_mismatch(
                "sub_scaled",
                &self.shape,
                &other.shape,
            ));
        }
        for (value, delta) in self.data.iter_mut().zip(other.data.iter()) {
            *value -= scale * delta;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let t = Tensor::zeros(&[2, 3, 4]);
        assert_eq!(t.len(), 24);
        assert_eq!(t.abs_sum(), 0.0);
        assert_eq!(t.batch_size(), 2);
        assert_eq!(t.sample_len(), 12);
    }

    #[test]
    fn test_deserialize_checks_length() {
        let t: Tensor = serde_json::from_str(r#"{"shape":[2],"data":[1.0,2.0]}"#).unwrap();
        assert_eq!(t.data(), &[1.0, 2.0]);
        assert!(!t.is_empty());

        let bad = serde_json::from_str::<Tensor>(r#"{"shape":[2,2],"data":[1.0]}"#);
        assert!(bad.is_err());
        assert!(Tensor::zeros(&[0, 3]).is_empty());
    }

    #[test]
    fn test_from_vec_length_mismatch() {
        let result = Tensor::from_vec(vec![2, 2], vec![1.0, 2.0, 3.0]);
        assert!(matches!(result, Err(NetworkError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_sub_scaled() {
        let mut w = Tensor::from_vec(vec![3], vec![1.0, 2.0, 3.0]).unwrap();
        let dw = Tensor::from_vec(vec![3], vec![0.1, 0.2, 0.3]).unwrap();
        w.sub_scaled(&dw, 0.1).unwrap();

        assert!((w.data()[0] - 0.99).abs() < 1e-6);
        assert!((w.data()[1] - 1.98).abs() < 1e-6);
        assert!((w.data()[2] - 2.97).abs() < 1e-6);
    }

    #[test]
    fn test_sub_scaled_zero_scale_is_noop() {
        let mut w = Tensor::from_vec(vec![2], vec![1.5, -2.5]).unwrap();
        let original = w.clone();
        let dw = Tensor::from_vec(vec![2], vec![10.0, -10.0]).unwrap();
        w.sub_scaled(&dw, 0.0).unwrap();
        assert_eq!(w, original);
    }

    #[test]
    fn test_sub_scaled_shape_mismatch() {
        let mut w = Tensor::zeros(&[2, 2]);
        let dw = Tensor::zeros(&[4]);
        assert!(w.sub_scaled(&dw, 1.0).is_err());
    }

    #[test]
    fn test_fill() {
        let mut t = Tensor::full(&[3], 7.0);
        assert_eq!(t.abs_sum(), 21.0);
        t.fill(0.0);
        assert_eq!(t.abs_sum(), 0.0);
    }
}
