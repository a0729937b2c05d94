//! Adam (Adaptive Moment Estimation) optimizer implementation
//!
//! Moment estimates are carried per parameter and are never reset between
//! iterations.

use crate::optimizers::{Optimizer, OptimizerKind, OptimizerState, BETA1, BETA2, EPSILON};

/// Adam (Adaptive Moment Estimation) optimizer.
///
/// Maintains two moving averages for each parameter: the first moment of the
/// deltas (momentum) and the uncentered second moment (variance).
///
/// The update rule is:
///
/// ```text
/// m = β1 * m + (1 - β1) * delta
/// v = β2 * v + (1 - β2) * delta²
/// parameter = parameter - rate * (m / (1 - β1)) / (√(v / (1 - β2)) + ε)
/// ```
///
/// The moments are rescaled by the constant factors `1 - β1` and `1 - β2`, not
/// by the step-dependent `1 - βᵗ`. Both moments are stored in `f64`: β2 =
/// 0.99999999 rounds to exactly 1 in `f32`, and a variance held in `f32`
/// would never decay.
///
/// # Example
///
/// ```
/// use neural_stacks::optimizers::{Adam, Optimizer};
///
/// let mut weights = vec![1.0f32, 2.0, 3.0];
/// let mut state = Adam::state(weights.len());
///
/// Adam::step(0.01, &mut weights, &[0.1, -0.2, 0.0], &mut state);
///
/// // The first step moves every parameter with a non-zero delta by about `rate`.
/// assert!((weights[0] - 0.99).abs() < 1e-5);
/// assert!((weights[1] - 2.01).abs() < 1e-5);
/// assert_eq!(weights[2], 3.0);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Adam;

/// First and second moment estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct AdamState {
    pub momentum: Vec<f64>,
    pub variance: Vec<f64>,
}

impl OptimizerState for AdamState {
    fn momentum(&self) -> Option<&[f64]> {
        Some(&self.momentum)
    }

    fn variance(&self) -> Option<&[f64]> {
        Some(&self.variance)
    }
}

pub fn adam_step(
    rate: f32,
    params: &mut [f32],
    deltas: &[f32],
    momentum: &mut [f64],
    variance: &mut [f64],
) {
    debug_assert_eq!(params.len(), deltas.len());
    debug_assert_eq!(params.len(), momentum.len());
    debug_assert_eq!(params.len(), variance.len());

    let rate = rate as f64;
    let beta1f = 1.0 - BETA1;
    let beta2f = 1.0 - BETA2;

    for (((p, &d), m), v) in params
        .iter_mut()
        .zip(deltas)
        .zip(momentum.iter_mut())
        .zip(variance.iter_mut())
    {
        let d = d as f64;
        *m = *m * BETA1 + d * beta1f;
        *v = *v * BETA2 + d * d * beta2f;

        let step = (*m / beta1f) / ((*v / beta2f).sqrt() + EPSILON);
        *p -= (rate * step) as f32;
    }
}

impl Optimizer for Adam {
    type State = AdamState;

    const KIND: OptimizerKind = OptimizerKind::Adam;

    fn state(len: usize) -> Self::State {
        AdamState {
            momentum: vec![0.0; len],
            variance: vec![0.0; len],
        }
    }

    fn step(rate: f32, params: &mut [f32], deltas: &[f32], state: &mut Self::State) {
        adam_step(
            rate,
            params,
            deltas,
            &mut state.momentum,
            &mut state.variance,
        );
    }
}
