//! Transfer functions for layer outputs
//!
//! Each activation is a zero-sized marker implementing [`Activation`]. Layers are
//! generic over the marker, so the choice is fixed at compile time and the
//! pre-activation buffer only exists for functions whose derivative needs it.
//!
//! - Linear, Sigmoid, Tanh: derivative computed from the activated output
//! - ReLU, LeakyReLU, ELU: derivative computed from the raw pre-activation value

/// Element-wise transfer function with its derivative.
pub trait Activation: Send + 'static {
    /// Short name used in logs.
    const NAME: &'static str;

    /// Whether [`Activation::derivative`] reads the pre-activation value.
    ///
    /// Layers allocate their raw output buffer only when this is `true`.
    const NEEDS_RAW: bool;

    /// Activate a pre-activation value.
    fn apply(x: f32) -> f32;

    /// Derivative at a point, given the activated `out` and the pre-activation `raw`.
    ///
    /// When `NEEDS_RAW` is `false` the layer passes `0.0` for `raw`.
    fn derivative(out: f32, raw: f32) -> f32;
}

/// Sigmoid activation function.
///
/// Returns the sigmoid of the input: 1 / (1 + exp(-x))
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Sigmoid derivative assuming x = sigmoid(z).
///
/// Returns the derivative: x * (1 - x)
pub fn sigmoid_derivative(x: f32) -> f32 {
    x * (1.0 - x)
}

/// Identity transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Linear;

impl Activation for Linear {
    const NAME: &'static str = "linear";
    const NEEDS_RAW: bool = false;

    fn apply(x: f32) -> f32 {
        x
    }

    fn derivative(_out: f32, _raw: f32) -> f32 {
        1.0
    }
}

/// Logistic sigmoid.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

impl Activation for Sigmoid {
    const NAME: &'static str = "sigmoid";
    const NEEDS_RAW: bool = false;

    fn apply(x: f32) -> f32 {
        sigmoid(x)
    }

    fn derivative(out: f32, _raw: f32) -> f32 {
        sigmoid_derivative(out)
    }
}

/// Hyperbolic tangent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tanh;

impl Activation for Tanh {
    const NAME: &'static str = "tanh";
    const NEEDS_RAW: bool = false;

    fn apply(x: f32) -> f32 {
        x.tanh()
    }

    fn derivative(out: f32, _raw: f32) -> f32 {
        1.0 - out * out
    }
}

/// Rectified linear unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Relu;

impl Activation for Relu {
    const NAME: &'static str = "relu";
    const NEEDS_RAW: bool = true;

    fn apply(x: f32) -> f32 {
        x.max(0.0)
    }

    fn derivative(_out: f32, raw: f32) -> f32 {
        if raw > 0.0 {
            1.0
        } else {
            0.0
        }
    }
}

/// Leaky ReLU with a fixed negative slope.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeakyRelu;

impl LeakyRelu {
    /// Slope applied to negative inputs.
    pub const ALPHA: f32 = 0.01;
}

impl Activation for LeakyRelu {
    const NAME: &'static str = "leaky_relu";
    const NEEDS_RAW: bool = true;

    fn apply(x: f32) -> f32 {
        if x > 0.0 {
            x
        } else {
            Self::ALPHA * x
        }
    }

    fn derivative(_out: f32, raw: f32) -> f32 {
        if raw > 0.0 {
            1.0
        } else {
            Self::ALPHA
        }
    }
}

/// Exponential linear unit with alpha = 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct Elu;

impl Elu {
    pub const ALPHA: f32 = 1.0;
}

impl Activation for Elu {
    const NAME: &'static str = "elu";
    const NEEDS_RAW: bool = true;

    fn apply(x: f32) -> f32 {
        if x > 0.0 {
            x
        } else {
            Self::ALPHA * (x.exp() - 1.0)
        }
    }

    fn derivative(_out: f32, raw: f32) -> f32 {
        if raw > 0.0 {
            1.0
        } else {
            Self::ALPHA * raw.exp()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    fn numeric_derivative<A: Activation>(x: f32) -> f32 {
        let h = 1e-3;
        (A::apply(x + h) - A::apply(x - h)) / (2.0 * h)
    }

    fn analytic_derivative<A: Activation>(x: f32) -> f32 {
        let out = A::apply(x);
        let raw = if A::NEEDS_RAW { x } else { 0.0 };
        A::derivative(out, raw)
    }

    #[test]
    fn test_sigmoid_zero() {
        assert!((sigmoid(0.0) - 0.5).abs() < EPSILON);
    }

    #[test]
    fn test_sigmoid_symmetry() {
        for &x in &[0.5f32, 1.0, 3.0] {
            assert!((sigmoid(x) + sigmoid(-x) - 1.0).abs() < EPSILON);
        }
    }

    #[test]
    fn test_sigmoid_derivative_at_half() {
        assert!((sigmoid_derivative(0.5) - 0.25).abs() < EPSILON);
    }

    #[test]
    fn test_raw_requirement() {
        assert!(!Linear::NEEDS_RAW);
        assert!(!Sigmoid::NEEDS_RAW);
        assert!(!Tanh::NEEDS_RAW);
        assert!(Relu::NEEDS_RAW);
        assert!(LeakyRelu::NEEDS_RAW);
        assert!(Elu::NEEDS_RAW);
    }

    #[test]
    fn test_relu_family_values() {
        assert_eq!(Relu::apply(-2.0), 0.0);
        assert_eq!(Relu::apply(2.0), 2.0);
        assert!((LeakyRelu::apply(-2.0) + 0.02).abs() < EPSILON);
        assert!((Elu::apply(-1.0) - ((-1.0f32).exp() - 1.0)).abs() < EPSILON);
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        for &x in &[-1.5f32, -0.3, 0.4, 2.0] {
            assert!((analytic_derivative::<Linear>(x) - numeric_derivative::<Linear>(x)).abs() < 1e-2);
            assert!((analytic_derivative::<Sigmoid>(x) - numeric_derivative::<Sigmoid>(x)).abs() < 1e-2);
            assert!((analytic_derivative::<Tanh>(x) - numeric_derivative::<Tanh>(x)).abs() < 1e-2);
            assert!((analytic_derivative::<Relu>(x) - numeric_derivative::<Relu>(x)).abs() < 1e-2);
            assert!(
                (analytic_derivative::<LeakyRelu>(x) - numeric_derivative::<LeakyRelu>(x)).abs() < 1e-2
            );
            assert!((analytic_derivative::<Elu>(x) - numeric_derivative::<Elu>(x)).abs() < 1e-2);
        }
    }
}
