//! Plain gradient descent.

use crate::optimizers::{Optimizer, OptimizerKind};

/// Gradient descent without optimizer state.
///
/// The update rule is:
///
/// ```text
/// parameter = parameter - rate * delta
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Sgd;

/// `params[i] -= rate * deltas[i]`
pub fn sgd_step(rate: f32, params: &mut [f32], deltas: &[f32]) {
    debug_assert_eq!(params.len(), deltas.len());
    for (p, &d) in params.iter_mut().zip(deltas) {
        *p -= rate * d;
    }
}

impl Optimizer for Sgd {
    type State = ();

    const KIND: OptimizerKind = OptimizerKind::None;

    fn state(_len: usize) -> Self::State {}

    fn step(rate: f32, params: &mut [f32], deltas: &[f32], _state: &mut Self::State) {
        sgd_step(rate, params, deltas);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sgd_update() {
        let mut weights = vec![1.0f32, 2.0, 3.0];
        let deltas = vec![0.1f32, 0.2, 0.3];

        Sgd::step(0.1, &mut weights, &deltas, &mut ());

        assert!((weights[0] - 0.99).abs() < 1e-6);
        assert!((weights[1] - 1.98).abs() < 1e-6);
        assert!((weights[2] - 2.97).abs() < 1e-6);
    }

    #[test]
    fn test_sgd_zero_delta_is_noop() {
        let mut weights = vec![0.25f32; 4];
        sgd_step(10.0, &mut weights, &[0.0; 4]);
        assert_eq!(weights, vec![0.25; 4]);
    }
}
