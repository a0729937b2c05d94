//! Parameter storage shared by every trainable layer
//!
//! A [`Params`] owns a parameter buffer, the delta buffer accumulated by
//! `fit`, and whatever state its optimizer policy declares. Because the state
//! type comes from the policy, a layer trained with [`Sgd`](crate::optimizers::Sgd)
//! carries no momentum or variance buffers at all.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::optimizers::{Optimizer, OptimizerState};
use crate::persist::{read_f32_slice, write_f32_slice};
use crate::utils::FillRandom;

/// Range biases are drawn from.
pub const BIAS_RANGE: (f32, f32) = (0.0001, 0.001);

/// Activation family a fan-scaled initializer is tuned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scaling {
    Sigmoid,
    Tanh,
    Relu,
}

impl Scaling {
    /// Multiplier applied to the Glorot deviation or range.
    pub fn factor(self) -> f32 {
        match self {
            Scaling::Sigmoid => 4.0,
            Scaling::Tanh => 1.0,
            Scaling::Relu => std::f32::consts::SQRT_2,
        }
    }
}

/// Weight initialization policy.
///
/// # Example
///
/// ```
/// use neural_stacks::layers::{Init, Scaling};
///
/// let init: Init = serde_json::from_str(r#"{"normal": "relu"}"#).unwrap();
/// assert_eq!(init, Init::Normal(Scaling::Relu));
/// assert_eq!(Init::default(), Init::Uniform { low: -0.01, high: 0.01 });
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Init {
    /// Plain uniform range.
    Uniform { low: f32, high: f32 },
    /// Normal with deviation `k * sqrt(2 / (fan_in + fan_out))`.
    Normal(Scaling),
    /// Uniform in `±k * sqrt(6 / (fan_in + fan_out))`.
    ScaledUniform(Scaling),
}

impl Default for Init {
    fn default() -> Self {
        Init::Uniform {
            low: -0.01,
            high: 0.01,
        }
    }
}

impl Init {
    /// Fill `values` according to this policy.
    pub fn fill(&self, values: &mut [f32], fan_in: usize, fan_out: usize, rng: &mut dyn FillRandom) {
        let fan = (fan_in + fan_out).max(1) as f32;
        match *self {
            Init::Uniform { low, high } => rng.fill_uniform(values, low, high),
            Init::Normal(scaling) => {
                let sd = scaling.factor() * (2.0 / fan).sqrt();
                rng.fill_normal(values, 0.0, sd);
            }
            Init::ScaledUniform(scaling) => {
                let range = scaling.factor() * (6.0 / fan).sqrt();
                rng.fill_uniform(values, -range, range);
            }
        }
    }
}

/// A parameter buffer with its deltas and optimizer state.
#[derive(Debug)]
pub struct Params<O: Optimizer> {
    values: Vec<f32>,
    deltas: Vec<f32>,
    state: O::State,
}

impl<O: Optimizer> Params<O> {
    /// Weights drawn with `init`.
    ///
    /// # Arguments
    ///
    /// * `len` - Number of parameters
    /// * `init` - Initialization policy
    /// * `fan_in` - Inputs feeding one output unit
    /// * `fan_out` - Outputs fed by one input unit
    /// * `rng` - Random source
    pub fn weights(
        len: usize,
        init: Init,
        fan_in: usize,
        fan_out: usize,
        rng: &mut dyn FillRandom,
    ) -> Self {
        let mut params = Self::zeroed(len);
        init.fill(&mut params.values, fan_in, fan_out, rng);
        params
    }

    /// Biases drawn uniformly from [`BIAS_RANGE`].
    pub fn biases(len: usize, rng: &mut dyn FillRandom) -> Self {
        let mut params = Self::zeroed(len);
        rng.fill_uniform(&mut params.values, BIAS_RANGE.0, BIAS_RANGE.1);
        params
    }

    pub fn zeroed(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
            deltas: vec![0.0; len],
            state: O::state(len),
        }
    }

    /// Wrap existing values; deltas and state start at zero.
    pub fn from_values(values: Vec<f32>) -> Self {
        let len = values.len();
        Self {
            values,
            deltas: vec![0.0; len],
            state: O::state(len),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub fn deltas(&self) -> &[f32] {
        &self.deltas
    }

    pub fn deltas_mut(&mut self) -> &mut [f32] {
        &mut self.deltas
    }

    /// Values for reading alongside deltas for accumulation.
    pub fn split_mut(&mut self) -> (&[f32], &mut [f32]) {
        (&self.values, &mut self.deltas)
    }

    pub fn state(&self) -> &O::State {
        &self.state
    }

    pub fn momentum(&self) -> Option<&[f64]> {
        self.state.momentum()
    }

    pub fn variance(&self) -> Option<&[f64]> {
        self.state.variance()
    }

    /// Zero the deltas. Optimizer state is left as is.
    pub fn reset_deltas(&mut self) {
        self.deltas.fill(0.0);
    }

    /// Run one optimizer step with the accumulated deltas.
    pub fn step(&mut self, rate: f32) {
        O::step(rate, &mut self.values, &self.deltas, &mut self.state);
    }

    pub fn write_to(&self, w: &mut dyn Write) -> Result<()> {
        write_f32_slice(w, &self.values)?;
        Ok(())
    }

    pub fn read_from(&mut self, r: &mut dyn Read) -> Result<()> {
        read_f32_slice(r, &mut self.values)?;
        Ok(())
    }

    /// Push this replica's deltas to `master`, then pull the master's values.
    pub fn exchange_with(&mut self, master: &mut Self) {
        master.deltas.copy_from_slice(&self.deltas);
        self.values.copy_from_slice(&master.values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizers::{Adam, Momentum, Sgd};
    use crate::utils::SimpleRng;

    #[test]
    fn test_sgd_params_have_no_state() {
        let params: Params<Sgd> = Params::zeroed(8);
        assert!(params.momentum().is_none());
        assert!(params.variance().is_none());
    }

    #[test]
    fn test_momentum_params_have_momentum_only() {
        let params: Params<Momentum> = Params::zeroed(8);
        assert_eq!(params.momentum().map(|m| m.len()), Some(8));
        assert!(params.variance().is_none());
    }

    #[test]
    fn test_adam_params_have_both_buffers() {
        let params: Params<Adam> = Params::zeroed(8);
        assert_eq!(params.momentum().map(|m| m.len()), Some(8));
        assert_eq!(params.variance().map(|v| v.len()), Some(8));
    }

    #[test]
    fn test_bias_range() {
        let mut rng = SimpleRng::new(7);
        let params: Params<Sgd> = Params::biases(100, &mut rng);
        assert!(params
            .values()
            .iter()
            .all(|v| *v >= BIAS_RANGE.0 && *v < BIAS_RANGE.1));
    }

    #[test]
    fn test_scaled_uniform_bounds() {
        let mut rng = SimpleRng::new(9);
        let params: Params<Sgd> = Params::weights(
            600,
            Init::ScaledUniform(Scaling::Tanh),
            2,
            4,
            &mut rng,
        );
        let range = 1.0f32;
        assert!(params.values().iter().all(|v| v.abs() <= range));
        assert!(params.values().iter().any(|v| v.abs() > 0.5));
    }

    #[test]
    fn test_reset_keeps_optimizer_state() {
        let mut params: Params<Adam> = Params::from_values(vec![1.0, 1.0]);
        params.deltas_mut().copy_from_slice(&[0.5, -0.5]);
        params.step(0.1);

        let momentum = params.momentum().unwrap().to_vec();
        let variance = params.variance().unwrap().to_vec();
        params.reset_deltas();

        assert_eq!(params.deltas(), &[0.0, 0.0]);
        assert_eq!(params.momentum().unwrap(), momentum.as_slice());
        assert_eq!(params.variance().unwrap(), variance.as_slice());
    }

    #[test]
    fn test_exchange_moves_deltas_up_and_values_down() {
        let mut master: Params<Sgd> = Params::from_values(vec![1.0, 2.0]);
        let mut replica: Params<Sgd> = Params::from_values(vec![0.0, 0.0]);
        replica.deltas_mut().copy_from_slice(&[0.3, 0.4]);

        replica.exchange_with(&mut master);

        assert_eq!(master.deltas(), &[0.3, 0.4]);
        assert_eq!(replica.values(), &[1.0, 2.0]);
    }
}
