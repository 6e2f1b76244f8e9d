//! Activation functions for parameterized layers
//!
//! Layers keep the pre-activation values from the forward pass, so every
//! derivative here is expressed in terms of the pre-activation `z`.

use crate::error::{NetworkError, Result};

/// Names accepted by [`Activation::from_name`].
pub const ACTIVATION_NAMES: [&str; 5] = ["linear", "relu", "lrelu", "sigmoid", "tanh"];

/// Element-wise activation applied after the affine transform (and batch norm).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Linear,
    Relu,
    LeakyRelu { alpha: f32 },
    Sigmoid,
    Tanh,
}

impl Activation {
    /// Parse an activation name from an architecture config.
    ///
    /// `alpha` is only used by `"lrelu"`.
    pub fn from_name(name: &str, alpha: f32) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "linear" | "none" => Ok(Activation::Linear),
            "relu" => Ok(Activation::Relu),
            "lrelu" | "leaky_relu" => Ok(Activation::LeakyRelu { alpha }),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            _ => Err(NetworkError::InvalidConfig(format!(
                "Invalid activation function '{}'. Must be one of: {}",
                name,
                ACTIVATION_NAMES.join(", ")
            ))),
        }
    }

    pub fn apply(&self, z: f32) -> f32 {
        match *self {
            Activation::Linear => z,
            Activation::Relu => z.max(0.0),
            Activation::LeakyRelu { alpha } => {
                if z > 0.0 {
                    z
                } else {
                    alpha * z
                }
            }
            Activation::Sigmoid => sigmoid(z),
            Activation::Tanh => z.tanh(),
        }
    }

    /// Derivative of the activation at pre-activation `z`.
    pub fn derivative(&self, z: f32) -> f32 {
        match *self {
            Activation::Linear => 1.0,
            Activation::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::LeakyRelu { alpha } => {
                if z > 0.0 {
                    1.0
                } else {
                    alpha
                }
            }
            Activation::Sigmoid => {
                let s = sigmoid(z);
                s * (1.0 - s)
            }
            Activation::Tanh => {
                let t = z.tanh();
                1.0 - t * t
            }
        }
    }

    pub fn apply_slice(&self, pre_activation: &[f32], output: &mut [f32]) {
        for (out, &z) in output.iter_mut().zip(pre_activation.iter()) {
            *out = self.apply(z);
        }
    }

    /// Multiply `grad` in place by the derivative at each pre-activation.
    pub fn backward_inplace(&self, pre_activation: &[f32], grad: &mut [f32]) {
        if *self == Activation::Linear {
            return;
        }
        for (g, &z) in grad.iter_mut().zip(pre_activation.iter()) {
            *g *= self.derivative(z);
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON_F32: f32 = 1e-6;

    #[test]
    fn test_sigmoid_zero() {
        assert!((Activation::Sigmoid.apply(0.0) - 0.5).abs() < EPSILON_F32);
        assert!((Activation::Sigmoid.derivative(0.0) - 0.25).abs() < EPSILON_F32);
    }

    #[test]
    fn test_leaky_relu() {
        let act = Activation::LeakyRelu { alpha: 0.2 };
        assert_eq!(act.apply(3.0), 3.0);
        assert!((act.apply(-1.0) + 0.2).abs() < EPSILON_F32);
        assert_eq!(act.derivative(3.0), 1.0);
        assert!((act.derivative(-1.0) - 0.2).abs() < EPSILON_F32);
    }

    #[test]
    fn test_tanh_derivative() {
        let z = 0.5f32;
        let expected = 1.0 - z.tanh() * z.tanh();
        assert!((Activation::Tanh.derivative(z) - expected).abs() < EPSILON_F32);
    }

    #[test]
    fn test_relu() {
        assert_eq!(Activation::Relu.apply(-2.0), 0.0);
        assert_eq!(Activation::Relu.derivative(-2.0), 0.0);
        assert_eq!(Activation::Relu.derivative(2.0), 1.0);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(
            Activation::from_name("lrelu", 0.2).unwrap(),
            Activation::LeakyRelu { alpha: 0.2 }
        );
        assert_eq!(Activation::from_name("Tanh", 0.2).unwrap(), Activation::Tanh);
        assert!(Activation::from_name("softplus", 0.2).is_err());
    }

    #[test]
    fn test_backward_inplace_linear_passthrough() {
        let z = [1.0, -1.0];
        let mut grad = [0.5, 0.25];
        Activation::Linear.backward_inplace(&z, &mut grad);
        assert_eq!(grad, [0.5, 0.25]);
    }
}
