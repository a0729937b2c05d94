//! Dense (fully connected) layer implementation
//!
//! This module provides a DenseLayer that performs the transformation
//! `out[o] = activation(Σ_i in[i] · W[o, i] + b[o])`.

use std::any::Any;
use std::io::{Read, Write};
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::layers::params::{Init, Params};
use crate::layers::r#trait::same_layer;
use crate::layers::{Layer, LayerKind, Signal};
use crate::optimizers::{Optimizer, Sgd};
use crate::persist::{Dims, LayerHeader};
use crate::utils::{Activation, ErrorFn, FillRandom, Mse, Sigmoid};

/// Dense (fully connected) layer with weights and biases.
///
/// Weights are stored row-major, one row of `IN` weights per output unit, so
/// `W[o, i]` lives at `o * IN + i`.
///
/// # Type Parameters
///
/// * `IN` - Number of input features
/// * `OUT` - Number of output features
/// * `A` - Activation applied to each output
/// * `O` - Optimizer policy for weights and biases
/// * `E` - Error metric used when the layer is the tail
///
/// # Example
///
/// ```
/// use neural_stacks::layers::{DenseLayer, Layer};
/// use neural_stacks::optimizers::Sgd;
/// use neural_stacks::utils::{Linear, Mse};
///
/// let mut layer: DenseLayer<1, 1, Linear, Sgd, Mse> =
///     DenseLayer::from_parts(vec![2.0], vec![1.0]).unwrap();
/// layer.execute(&[3.0]);
/// assert_eq!(layer.output(), &[7.0]);
/// ```
pub struct DenseLayer<const IN: usize, const OUT: usize, A = Sigmoid, O = Sgd, E = Mse>
where
    O: Optimizer,
{
    weights: Params<O>,
    biases: Params<O>,
    raw: Vec<f32>,
    out: Vec<f32>,
    gradient: Vec<f32>,
    locked: bool,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<const IN: usize, const OUT: usize, A, O, E> DenseLayer<IN, OUT, A, O, E>
where
    A: Activation,
    O: Optimizer,
    E: ErrorFn,
{
    /// Create a layer with weights drawn by `init` and small positive biases.
    ///
    /// # Arguments
    ///
    /// * `init` - Weight initialization policy
    /// * `rng` - Random source, used only here
    pub fn new(init: Init, rng: &mut dyn FillRandom) -> Self {
        let weights = Params::weights(IN * OUT, init, IN, OUT, rng);
        let biases = Params::biases(OUT, rng);
        Self::with_params(weights, biases)
    }

    /// Create a layer from explicit parameters.
    ///
    /// `weights` must hold `OUT * IN` values and `biases` `OUT` values.
    pub fn from_parts(weights: Vec<f32>, biases: Vec<f32>) -> Result<Self> {
        if weights.len() != IN * OUT {
            return Err(Error::ShapeMismatch {
                at: 0,
                expected: IN * OUT,
                got: weights.len(),
            });
        }
        if biases.len() != OUT {
            return Err(Error::ShapeMismatch {
                at: 1,
                expected: OUT,
                got: biases.len(),
            });
        }
        Ok(Self::with_params(
            Params::from_values(weights),
            Params::from_values(biases),
        ))
    }

    fn with_params(weights: Params<O>, biases: Params<O>) -> Self {
        Self {
            weights,
            biases,
            raw: if A::NEEDS_RAW { vec![0.0; OUT] } else { Vec::new() },
            out: vec![0.0; OUT],
            gradient: vec![0.0; IN],
            locked: false,
            _marker: PhantomData,
        }
    }

    pub fn weights(&self) -> &Params<O> {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut Params<O> {
        &mut self.weights
    }

    pub fn biases(&self) -> &Params<O> {
        &self.biases
    }

    pub fn biases_mut(&mut self) -> &mut Params<O> {
        &mut self.biases
    }

    /// Pre-activation values; empty unless the activation needs them.
    pub fn raw(&self) -> &[f32] {
        &self.raw
    }

    fn header() -> LayerHeader {
        LayerHeader {
            kind: LayerKind::Dense,
            radius: 0,
            input: Dims::flat(IN),
            output: Dims::flat(OUT),
        }
    }
}

impl<const IN: usize, const OUT: usize, A, O, E> Layer for DenseLayer<IN, OUT, A, O, E>
where
    A: Activation,
    O: Optimizer,
    E: ErrorFn,
{
    fn kind(&self) -> LayerKind {
        LayerKind::Dense
    }

    fn describe(&self) -> String {
        format!("dense<{}, {}> {} {} {}", IN, OUT, A::NAME, O::KIND.name(), E::NAME)
    }

    fn input_size(&self) -> usize {
        IN
    }

    fn output_size(&self) -> usize {
        OUT
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    fn output(&self) -> &[f32] {
        &self.out
    }

    fn gradient(&self) -> &[f32] {
        &self.gradient
    }

    fn execute(&mut self, input: &[f32]) {
        debug_assert_eq!(input.len(), IN);
        let weights = self.weights.values();
        let biases = self.biases.values();

        for (o, row) in weights.chunks_exact(IN.max(1)).take(OUT).enumerate() {
            let sum = row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + biases[o];
            if A::NEEDS_RAW {
                self.raw[o] = sum;
            }
            self.out[o] = A::apply(sum);
        }
    }

    fn fit(&mut self, input: &[f32], signal: Signal<'_>) {
        debug_assert_eq!(input.len(), IN);
        self.gradient.fill(0.0);

        let (weights, weight_deltas) = self.weights.split_mut();
        let bias_deltas = self.biases.deltas_mut();

        for o in 0..OUT {
            let out = self.out[o];
            let raw = if A::NEEDS_RAW { self.raw[o] } else { 0.0 };
            let delta = A::derivative(out, raw) * signal.at::<E>(o, out);

            let row = o * IN..(o + 1) * IN;
            for (g, w) in self.gradient.iter_mut().zip(&weights[row.clone()]) {
                *g += w * delta;
            }

            if !self.locked {
                for (d, x) in weight_deltas[row].iter_mut().zip(input) {
                    *d += x * delta;
                }
                bias_deltas[o] += delta;
            }
        }
    }

    fn error(&self, target: &[f32]) -> f32 {
        E::error(target, &self.out)
    }

    fn reset(&mut self) {
        if !self.locked {
            self.weights.reset_deltas();
            self.biases.reset_deltas();
        }
    }

    fn apply(&mut self, rate: f32) {
        if !self.locked {
            self.weights.step(rate);
            self.biases.step(rate);
        }
    }

    fn lock(&mut self) {
        self.locked = true;
    }

    fn unlock(&mut self) {
        self.locked = false;
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn store(&self, w: &mut dyn Write) -> Result<()> {
        Self::header().write(w)?;
        self.weights.write_to(w)?;
        self.biases.write_to(w)
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        Self::header().verify(r)?;
        self.weights.read_from(r)?;
        self.biases.read_from(r)
    }

    fn exchange(&mut self, master: &mut dyn Layer) -> Result<()> {
        let master = same_layer(self, master)?;
        self.weights.exchange_with(&mut master.weights);
        self.biases.exchange_with(&mut master.biases);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizers::Adam;
    use crate::utils::{Linear, Relu, SimpleRng};

    #[test]
    fn test_dense_layer_creation() {
        let mut rng = SimpleRng::new(42);
        let layer: DenseLayer<10, 5> = DenseLayer::new(Init::default(), &mut rng);

        assert_eq!(layer.input_size(), 10);
        assert_eq!(layer.output_size(), 5);
        assert_eq!(layer.weights().len(), 50);
        assert_eq!(layer.biases().len(), 5);
        assert_eq!(layer.parameter_count(), 55);
    }

    #[test]
    fn test_default_initialization_ranges() {
        let mut rng = SimpleRng::new(42);
        let layer: DenseLayer<100, 50> = DenseLayer::new(Init::default(), &mut rng);

        assert!(layer.weights().values().iter().all(|w| w.abs() <= 0.01));
        assert!(layer
            .biases()
            .values()
            .iter()
            .all(|b| *b >= 0.0001 && *b < 0.001));
    }

    #[test]
    fn test_deterministic_initialization() {
        let layer1: DenseLayer<10, 5> = DenseLayer::new(Init::default(), &mut SimpleRng::new(42));
        let layer2: DenseLayer<10, 5> = DenseLayer::new(Init::default(), &mut SimpleRng::new(42));

        assert_eq!(layer1.weights().values(), layer2.weights().values());
        assert_eq!(layer1.biases().values(), layer2.biases().values());
    }

    #[test]
    fn test_from_parts_rejects_wrong_sizes() {
        let result: Result<DenseLayer<2, 2, Linear, Sgd, Mse>> =
            DenseLayer::from_parts(vec![0.0; 3], vec![0.0; 2]);
        assert!(matches!(result, Err(Error::ShapeMismatch { expected: 4, got: 3, .. })));
    }

    #[test]
    fn test_raw_buffer_only_for_relu_family() {
        let mut rng = SimpleRng::new(1);
        let sigmoid: DenseLayer<3, 2, Sigmoid, Sgd, Mse> = DenseLayer::new(Init::default(), &mut rng);
        let relu: DenseLayer<3, 2, Relu, Sgd, Mse> = DenseLayer::new(Init::default(), &mut rng);
        assert!(sigmoid.raw().is_empty());
        assert_eq!(relu.raw().len(), 2);
    }

    #[test]
    fn test_gradient_matches_weights_times_delta() {
        let mut layer: DenseLayer<2, 2, Linear, Sgd, Mse> =
            DenseLayer::from_parts(vec![1.0, 2.0, 3.0, 4.0], vec![0.0, 0.0]).unwrap();
        let input = [1.0, 1.0];
        layer.execute(&input);
        assert_eq!(layer.output(), &[3.0, 7.0]);

        layer.fit(&input, Signal::Downstream(&[1.0, -1.0]));
        // Gradient[i] = Σ_o W[o, i] * delta[o]
        assert_eq!(layer.gradient(), &[1.0 - 3.0, 2.0 - 4.0]);
        assert_eq!(layer.weights().deltas(), &[1.0, 1.0, -1.0, -1.0]);
        assert_eq!(layer.biases().deltas(), &[1.0, -1.0]);
    }

    #[test]
    fn test_fit_accumulates_until_reset() {
        let mut layer: DenseLayer<1, 1, Linear, Adam, Mse> =
            DenseLayer::from_parts(vec![2.0], vec![1.0]).unwrap();
        layer.execute(&[3.0]);
        layer.fit(&[3.0], Signal::Target(&[5.0]));
        layer.fit(&[3.0], Signal::Target(&[5.0]));
        assert_eq!(layer.weights().deltas(), &[12.0]);

        layer.reset();
        assert_eq!(layer.weights().deltas(), &[0.0]);
        assert_eq!(layer.biases().deltas(), &[0.0]);
    }
}
