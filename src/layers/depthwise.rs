//! Depthwise 2D correlation: one kernel per channel, channels never mix.

use std::any::Any;
use std::io::{Read, Write};
use std::marker::PhantomData;

use crate::error::Result;
use crate::layers::conv2::index_c;
use crate::layers::params::{Init, Params};
use crate::layers::r#trait::same_layer;
use crate::layers::{Layer, LayerKind, Signal};
use crate::optimizers::{Optimizer, Sgd};
use crate::persist::{Dims, LayerHeader};
use crate::utils::{Activation, ErrorFn, FillRandom, Mse, Relu};

/// Shared-kernel correlation applied to each of the `D` channels separately.
///
/// Channel `d` is filtered by its own `(2R+1) × (2R+1)` kernel and produces
/// output channel `d`. Biases are per output pixel. The kernel-fit rule and
/// border policy are the same as [`Conv2Layer`](crate::layers::Conv2Layer).
///
/// ```compile_fail
/// use neural_stacks::layers::{DepthwiseConv2Layer, Init};
/// use neural_stacks::utils::SimpleRng;
///
/// // 8 - 4 < 5: the 5x5 kernel does not fit an 8-pixel-high image
/// let layer: DepthwiseConv2Layer<9, 8, 2, 2> =
///     DepthwiseConv2Layer::new(Init::default(), &mut SimpleRng::new(1));
/// ```
pub struct DepthwiseConv2Layer<
    const W: usize,
    const H: usize,
    const D: usize,
    const R: usize,
    A = Relu,
    O = Sgd,
    E = Mse,
> where
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

impl<const W: usize, const H: usize, const D: usize, const R: usize, A, O, E>
    DepthwiseConv2Layer<W, H, D, R, A, O, E>
where
    A: Activation,
    O: Optimizer,
    E: ErrorFn,
{
    const KERNEL_FITS: () = assert!(
        W >= 4 * R + 1 && H >= 4 * R + 1,
        "kernel radius too large for image: need dimension - 2R >= 2R + 1"
    );

    const SIDE: usize = 2 * R + 1;
    const AREA: usize = Self::SIDE * Self::SIDE;

    pub fn new(init: Init, rng: &mut dyn FillRandom) -> Self {
        let () = Self::KERNEL_FITS;
        let weights = Params::weights(D * Self::AREA, init, Self::AREA, Self::AREA, rng);
        let biases = Params::biases(W * H * D, rng);
        Self {
            weights,
            biases,
            raw: if A::NEEDS_RAW {
                vec![0.0; W * H * D]
            } else {
                Vec::new()
            },
            out: vec![0.0; W * H * D],
            gradient: vec![0.0; W * H * D],
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

    fn header() -> LayerHeader {
        LayerHeader {
            kind: LayerKind::DepthwiseConv2,
            radius: R,
            input: Dims::new(W, H, D),
            output: Dims::new(W, H, D),
        }
    }
}

impl<const W: usize, const H: usize, const D: usize, const R: usize, A, O, E> Layer
    for DepthwiseConv2Layer<W, H, D, R, A, O, E>
where
    A: Activation,
    O: Optimizer,
    E: ErrorFn,
{
    fn kind(&self) -> LayerKind {
        LayerKind::DepthwiseConv2
    }

    fn describe(&self) -> String {
        format!(
            "depthwise_conv2<{}x{}x{}, r{}> {} {} {}",
            W,
            H,
            D,
            R,
            A::NAME,
            O::KIND.name(),
            E::NAME
        )
    }

    fn input_size(&self) -> usize {
        W * H * D
    }

    fn output_size(&self) -> usize {
        W * H * D
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
        debug_assert_eq!(input.len(), W * H * D);
        let weights = self.weights.values();
        let biases = self.biases.values();

        for d in 0..D {
            let kernel = &weights[d * Self::AREA..(d + 1) * Self::AREA];
            for y in R..H - R {
                for x in R..W - R {
                    let o = index_c(x, y, d, W, H);
                    let mut sum = biases[o];
                    for (t, w) in kernel.iter().enumerate() {
                        let (ky, kx) = (t / Self::SIDE, t % Self::SIDE);
                        sum += input[index_c(x + kx - R, y + ky - R, d, W, H)] * w;
                    }
                    if A::NEEDS_RAW {
                        self.raw[o] = sum;
                    }
                    self.out[o] = A::apply(sum);
                }
            }
        }
    }

    fn fit(&mut self, input: &[f32], signal: Signal<'_>) {
        debug_assert_eq!(input.len(), W * H * D);
        self.gradient.fill(0.0);

        let (weights, weight_deltas) = self.weights.split_mut();
        let bias_deltas = self.biases.deltas_mut();

        for d in 0..D {
            let base = d * Self::AREA;
            for y in R..H - R {
                for x in R..W - R {
                    let o = index_c(x, y, d, W, H);
                    let out = self.out[o];
                    let raw = if A::NEEDS_RAW { self.raw[o] } else { 0.0 };
                    let delta = A::derivative(out, raw) * signal.at::<E>(o, out);

                    for t in 0..Self::AREA {
                        let (ky, kx) = (t / Self::SIDE, t % Self::SIDE);
                        let i = index_c(x + kx - R, y + ky - R, d, W, H);
                        self.gradient[i] += weights[base + t] * delta;
                        if !self.locked {
                            weight_deltas[base + t] += input[i] * delta;
                        }
                    }
                    if !self.locked {
                        bias_deltas[o] += delta;
                    }
                }
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
    use crate::utils::{Linear, SimpleRng};

    #[test]
    fn test_channels_stay_separate() {
        let mut layer: DepthwiseConv2Layer<5, 5, 2, 1, Linear, Sgd, Mse> =
            DepthwiseConv2Layer::new(Init::default(), &mut SimpleRng::new(4));
        layer.biases_mut().values_mut().fill(0.0);
        {
            let w = layer.weights_mut().values_mut();
            w[..9].fill(1.0);
            w[9..].fill(0.0);
        }

        // Channel 0 all ones, channel 1 all twos.
        let mut input = vec![1.0f32; 25];
        input.extend(std::iter::repeat(2.0).take(25));
        layer.execute(&input);

        assert_eq!(layer.output()[index_c(2, 2, 0, 5, 5)], 9.0);
        assert_eq!(layer.output()[index_c(2, 2, 1, 5, 5)], 0.0);
        assert_eq!(layer.parameter_count(), 2 * 9 + 5 * 5 * 2);
    }
}
