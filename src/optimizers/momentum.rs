//! Momentum gradient descent.

use crate::optimizers::{Optimizer, OptimizerKind, OptimizerState, BETA1};

/// Gradient descent on an exponential moving average of the deltas.
///
/// ```text
/// m = β1 * m + (1 - β1) * delta
/// parameter = parameter - rate * m
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Momentum;

/// Moving average of deltas, one entry per parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentumState {
    pub momentum: Vec<f64>,
}

impl OptimizerState for MomentumState {
    fn momentum(&self) -> Option<&[f64]> {
        Some(&self.momentum)
    }

    fn variance(&self) -> Option<&[f64]> {
        None
    }
}

pub fn momentum_step(rate: f32, params: &mut [f32], deltas: &[f32], momentum: &mut [f64]) {
    debug_assert_eq!(params.len(), deltas.len());
    debug_assert_eq!(params.len(), momentum.len());
    for ((p, &d), m) in params.iter_mut().zip(deltas).zip(momentum.iter_mut()) {
        *m = *m * BETA1 + d as f64 * (1.0 - BETA1);
        *p -= (rate as f64 * *m) as f32;
    }
}

impl Optimizer for Momentum {
    type State = MomentumState;

    const KIND: OptimizerKind = OptimizerKind::Momentum;

    fn state(len: usize) -> Self::State {
        MomentumState {
            momentum: vec![0.0; len],
        }
    }

    fn step(rate: f32, params: &mut [f32], deltas: &[f32], state: &mut Self::State) {
        momentum_step(rate, params, deltas, &mut state.momentum);
    }
}
