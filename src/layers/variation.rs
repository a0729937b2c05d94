//! Reparameterized sampling layer for variational autoencoders
//!
//! Two linear dense heads read the same input: one predicts a mean `μ`, the
//! other a log-variance `λ`. The output is `μ + λ · ε` with `ε ~ N(0, 1)`
//! drawn fresh on every `execute`. The layer also owns the KL term
//! `½ Σ (μ² + e^λ − λ − 1)` that pulls the code towards the unit normal.

use std::any::Any;
use std::io::{Read, Write};

use crate::error::Result;
use crate::layers::params::Init;
use crate::layers::r#trait::same_layer;
use crate::layers::{DenseLayer, Layer, LayerKind, Signal};
use crate::optimizers::{Momentum, Optimizer};
use crate::persist::{Dims, LayerHeader};
use crate::utils::{ErrorFn, FillRandom, Linear, Mse, SimpleRng};

type Head<const IN: usize, const OUT: usize, O, E> = DenseLayer<IN, OUT, Linear, O, E>;

/// Sampling layer with a mean head and a log-variance head.
///
/// # Type Parameters
///
/// * `IN` - Number of input features
/// * `OUT` - Size of the sampled code
/// * `O` - Optimizer policy of both heads
/// * `E` - Error metric used when the layer is the tail
/// * `R` - Noise source for `ε`
///
/// # Example
///
/// ```
/// use neural_stacks::layers::{Init, Layer, VariationLayer};
/// use neural_stacks::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(3);
/// let mut layer: VariationLayer<4, 2> =
///     VariationLayer::new(Init::default(), &mut rng, SimpleRng::new(4));
/// layer.execute(&[0.1, 0.2, 0.3, 0.4]);
/// assert_eq!(layer.output().len(), 2);
/// assert!(layer.divergence().is_finite());
/// ```
pub struct VariationLayer<const IN: usize, const OUT: usize, O = Momentum, E = Mse, R = SimpleRng>
where
    O: Optimizer,
{
    mean: Head<IN, OUT, O, E>,
    deviation: Head<IN, OUT, O, E>,
    sampler: R,
    noise: Vec<f32>,
    mean_signal: Vec<f32>,
    deviation_signal: Vec<f32>,
    out: Vec<f32>,
    gradient: Vec<f32>,
    locked: bool,
}

impl<const IN: usize, const OUT: usize, O, E, R> VariationLayer<IN, OUT, O, E, R>
where
    O: Optimizer,
    E: ErrorFn,
    R: FillRandom + Send + 'static,
{
    /// Create both heads from `rng`; `sampler` draws the noise during training.
    pub fn new(init: Init, rng: &mut dyn FillRandom, sampler: R) -> Self {
        let mean = Head::<IN, OUT, O, E>::new(init, rng);
        let deviation = Head::<IN, OUT, O, E>::new(init, rng);
        Self::from_heads(mean, deviation, sampler)
    }

    pub fn from_heads(mean: Head<IN, OUT, O, E>, deviation: Head<IN, OUT, O, E>, sampler: R) -> Self {
        Self {
            mean,
            deviation,
            sampler,
            noise: vec![0.0; OUT],
            mean_signal: vec![0.0; OUT],
            deviation_signal: vec![0.0; OUT],
            out: vec![0.0; OUT],
            gradient: vec![0.0; IN],
            locked: false,
        }
    }

    pub fn mean(&self) -> &Head<IN, OUT, O, E> {
        &self.mean
    }

    pub fn deviation(&self) -> &Head<IN, OUT, O, E> {
        &self.deviation
    }

    /// `ε` drawn by the last `execute`.
    pub fn noise(&self) -> &[f32] {
        &self.noise
    }

    /// KL divergence of the current code from N(0, 1).
    pub fn divergence(&self) -> f32 {
        let sum: f32 = self
            .mean
            .output()
            .iter()
            .zip(self.deviation.output())
            .map(|(&mu, &lv)| mu * mu + lv.exp() - lv - 1.0)
            .sum();
        sum * 0.5
    }

    fn header() -> LayerHeader {
        LayerHeader {
            kind: LayerKind::Variation,
            radius: 0,
            input: Dims::flat(IN),
            output: Dims::flat(OUT),
        }
    }
}

impl<const IN: usize, const OUT: usize, O, E, R> Layer for VariationLayer<IN, OUT, O, E, R>
where
    O: Optimizer,
    E: ErrorFn,
    R: FillRandom + Send + 'static,
{
    fn kind(&self) -> LayerKind {
        LayerKind::Variation
    }

    fn describe(&self) -> String {
        format!("variation<{}, {}> {} {}", IN, OUT, O::KIND.name(), E::NAME)
    }

    fn input_size(&self) -> usize {
        IN
    }

    fn output_size(&self) -> usize {
        OUT
    }

    fn parameter_count(&self) -> usize {
        self.mean.parameter_count() + self.deviation.parameter_count()
    }

    fn output(&self) -> &[f32] {
        &self.out
    }

    fn gradient(&self) -> &[f32] {
        &self.gradient
    }

    fn execute(&mut self, input: &[f32]) {
        self.mean.execute(input);
        self.deviation.execute(input);
        self.sampler.fill_normal(&mut self.noise, 0.0, 1.0);

        let heads = self.mean.output().iter().zip(self.deviation.output());
        for ((o, (&mu, &lv)), &eps) in self.out.iter_mut().zip(heads).zip(&self.noise) {
            *o = mu + lv * eps;
        }
    }

    fn fit(&mut self, input: &[f32], signal: Signal<'_>) {
        for o in 0..OUT {
            let down = signal.at::<E>(o, self.out[o]);
            let mu = self.mean.output()[o];
            let lv = self.deviation.output()[o];

            // Reconstruction path plus the KL derivative of each head
            self.mean_signal[o] = down + mu;
            self.deviation_signal[o] = down * self.noise[o] + 0.5 * (lv.exp() - 1.0);
        }

        self.mean.fit(input, Signal::Downstream(&self.mean_signal));
        self.deviation.fit(input, Signal::Downstream(&self.deviation_signal));

        let heads = self.mean.gradient().iter().zip(self.deviation.gradient());
        for (g, (a, b)) in self.gradient.iter_mut().zip(heads) {
            *g = a + b;
        }
    }

    /// Reconstruction error against `target` plus the KL term.
    fn error(&self, target: &[f32]) -> f32 {
        E::error(target, &self.out) + self.divergence()
    }

    fn reset(&mut self) {
        self.mean.reset();
        self.deviation.reset();
    }

    fn apply(&mut self, rate: f32) {
        self.mean.apply(rate);
        self.deviation.apply(rate);
    }

    fn lock(&mut self) {
        self.mean.lock();
        self.deviation.lock();
        self.locked = true;
    }

    fn unlock(&mut self) {
        self.mean.unlock();
        self.deviation.unlock();
        self.locked = false;
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn store(&self, w: &mut dyn Write) -> Result<()> {
        Self::header().write(w)?;
        self.mean.store(w)?;
        self.deviation.store(w)
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        Self::header().verify(r)?;
        self.mean.load(r)?;
        self.deviation.load(r)
    }

    fn exchange(&mut self, master: &mut dyn Layer) -> Result<()> {
        let master = same_layer(self, master)?;
        self.mean.exchange(&mut master.mean)?;
        self.deviation.exchange(&mut master.deviation)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
