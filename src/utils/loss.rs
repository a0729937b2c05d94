//! Error metrics evaluated at the tail of a chain.
//!
//! The tail layer is the only one that sees a target; it turns the target into
//! an error derivative with [`ErrorFn::derivative`] and reports the scalar error
//! with [`ErrorFn::error`].

/// Error metric with its per-element derivative with respect to the output.
pub trait ErrorFn: Send + 'static {
    const NAME: &'static str;

    /// Scalar error of `out` against `target`.
    fn error(target: &[f32], out: &[f32]) -> f32;

    /// Derivative of the error with respect to one output element.
    fn derivative(target: f32, out: f32) -> f32;
}

/// Mean squared error.
///
/// The derivative is `out - target`; the factor 2 of the exact derivative is
/// folded into the learning rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mse;

impl ErrorFn for Mse {
    const NAME: &'static str = "mse";

    fn error(target: &[f32], out: &[f32]) -> f32 {
        if out.is_empty() {
            return 0.0;
        }
        let sum: f32 = target
            .iter()
            .zip(out)
            .map(|(t, o)| (o - t) * (o - t))
            .sum();
        sum / out.len() as f32
    }

    fn derivative(target: f32, out: f32) -> f32 {
        out - target
    }
}

/// Mean absolute error.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mae;

impl ErrorFn for Mae {
    const NAME: &'static str = "mae";

    fn error(target: &[f32], out: &[f32]) -> f32 {
        if out.is_empty() {
            return 0.0;
        }
        let sum: f32 = target.iter().zip(out).map(|(t, o)| (o - t).abs()).sum();
        sum / out.len() as f32
    }

    fn derivative(target: f32, out: f32) -> f32 {
        let diff = out - target;
        if diff > 0.0 {
            1.0
        } else if diff < 0.0 {
            -1.0
        } else {
            0.0
        }
    }
}

/// Binary cross-entropy for outputs in (0, 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropy;

impl CrossEntropy {
    const CLAMP: f32 = 1e-7;

    fn clamp(out: f32) -> f32 {
        out.clamp(Self::CLAMP, 1.0 - Self::CLAMP)
    }
}

impl ErrorFn for CrossEntropy {
    const NAME: &'static str = "cross_entropy";

    fn error(target: &[f32], out: &[f32]) -> f32 {
        if out.is_empty() {
            return 0.0;
        }
        let sum: f32 = target
            .iter()
            .zip(out)
            .map(|(&t, &o)| {
                let o = Self::clamp(o);
                t * o.ln() + (1.0 - t) * (1.0 - o).ln()
            })
            .sum();
        -sum / out.len() as f32
    }

    fn derivative(target: f32, out: f32) -> f32 {
        let o = Self::clamp(out);
        (o - target) / (o * (1.0 - o))
    }
}
