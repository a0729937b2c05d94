//! Parameter update policies
//!
//! An optimizer turns a parameter buffer and its accumulated delta buffer into
//! updated parameters. The policy is a type parameter of each layer, so the
//! momentum and variance buffers exist only for the policies that read them.
//!
//! # Available Optimizers
//!
//! - [`Sgd`]: plain gradient descent, `p -= rate * d`
//! - [`Momentum`]: exponential moving average of deltas
//! - [`Adam`]: moving averages of deltas and squared deltas
//!
//! # Example
//!
//! ```
//! use neural_stacks::optimizers::{Adam, Optimizer};
//!
//! let mut params = vec![1.0f32, 1.0];
//! let deltas = vec![0.5f32, -0.5];
//! let mut state = Adam::state(params.len());
//!
//! Adam::step(0.1, &mut params, &deltas, &mut state);
//! assert!((params[0] - 0.9).abs() < 1e-5);
//! assert!((params[1] - 1.1).abs() < 1e-5);
//! ```

pub mod adam;
pub mod momentum;
pub mod sgd;

pub use adam::{adam_step, Adam, AdamState};
pub use momentum::{momentum_step, Momentum, MomentumState};
pub use sgd::{sgd_step, Sgd};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Decay of the first moment estimate.
pub const BETA1: f64 = 0.9;

/// Decay of the second moment estimate.
pub const BETA2: f64 = 0.99999999;

/// Added to the denominator of the Adam step.
pub const EPSILON: f64 = 1e-8;

/// Runtime tag of an update policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    None,
    Momentum,
    Adam,
}

impl OptimizerKind {
    pub fn name(self) -> &'static str {
        match self {
            OptimizerKind::None => "sgd",
            OptimizerKind::Momentum => "momentum",
            OptimizerKind::Adam => "adam",
        }
    }
}

/// Long-lived per-parameter optimizer state.
///
/// Never cleared by `reset()`; only the delta buffers are per-iteration.
pub trait OptimizerState: Debug + Send {
    fn momentum(&self) -> Option<&[f64]>;
    fn variance(&self) -> Option<&[f64]>;
}

impl OptimizerState for () {
    fn momentum(&self) -> Option<&[f64]> {
        None
    }

    fn variance(&self) -> Option<&[f64]> {
        None
    }
}

/// Compile-time update policy.
///
/// `State` is whatever the policy needs between steps. [`Sgd`] uses `()`, so
/// a plain gradient descent layer owns no optimizer buffers at all.
pub trait Optimizer: Send + 'static {
    type State: OptimizerState;

    const KIND: OptimizerKind;

    /// Allocate zeroed state for a buffer of `len` parameters.
    fn state(len: usize) -> Self::State;

    /// Update `params` in place from `deltas`.
    ///
    /// # Arguments
    ///
    /// * `rate` - Learning rate
    /// * `params` - Parameters to update
    /// * `deltas` - Accumulated deltas, same length as `params`
    /// * `state` - Policy state created by [`Optimizer::state`] with the same length
    fn step(rate: f32, params: &mut [f32], deltas: &[f32], state: &mut Self::State);
}

/// Runtime-dispatched update over caller-owned buffers.
///
/// Momentum needs `momentum`; Adam needs both `momentum` and `variance`.
/// Extra buffers are ignored.
pub fn apply_update(
    kind: OptimizerKind,
    rate: f32,
    params: &mut [f32],
    deltas: &[f32],
    momentum: Option<&mut [f64]>,
    variance: Option<&mut [f64]>,
) -> Result<()> {
    match kind {
        OptimizerKind::None => sgd_step(rate, params, deltas),
        OptimizerKind::Momentum => {
            let momentum = momentum.ok_or(Error::MissingOptimizerState {
                optimizer: "momentum",
                buffer: "momentum",
            })?;
            momentum_step(rate, params, deltas, momentum);
        }
        OptimizerKind::Adam => {
            let momentum = momentum.ok_or(Error::MissingOptimizerState {
                optimizer: "adam",
                buffer: "momentum",
            })?;
            let variance = variance.ok_or(Error::MissingOptimizerState {
                optimizer: "adam",
                buffer: "variance",
            })?;
            adam_step(rate, params, deltas, momentum, variance);
        }
    }
    Ok(())
}
