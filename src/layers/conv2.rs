//! 2D shared-kernel correlation layer
//!
//! Images are stored planar: value `(x, y, c)` of a `W × H` image lives at
//! `x + W * (y + H * c)`. Only interior pixels, at least `R` away from every
//! edge, are computed; border outputs stay zero and receive no gradient.

use std::any::Any;
use std::io::{Read, Write};
use std::marker::PhantomData;

use crate::error::Result;
use crate::layers::params::{Init, Params};
use crate::layers::r#trait::same_layer;
use crate::layers::{Layer, LayerKind, Signal};
use crate::optimizers::{Optimizer, Sgd};
use crate::persist::{Dims, LayerHeader};
use crate::utils::{Activation, ErrorFn, FillRandom, Mse, Relu};

/// Planar index of `(x, y, c)` in a `width × height` image.
#[inline]
pub fn index_c(x: usize, y: usize, c: usize, width: usize, height: usize) -> usize {
    x + width * (y + height * c)
}

/// 2D correlation with `K` kernels shared across all spatial positions.
///
/// Each kernel spans all `D` input channels and a `(2R+1) × (2R+1)` window.
/// Weight `(k, d, ky, kx)` lives at `((k * D + d) * S + ky) * S + kx` with
/// `S = 2R + 1`.
///
/// The kernel must fit inside the image with room to spare:
/// `W - 2R >= 2R + 1` and `H - 2R >= 2R + 1`. A violating shape is rejected
/// when the constructor is instantiated:
///
/// ```compile_fail
/// use neural_stacks::layers::{Conv2Layer, Init};
/// use neural_stacks::utils::SimpleRng;
///
/// // 4 - 2 < 3: the 3x3 kernel does not fit a 4x4 image
/// let layer: Conv2Layer<4, 4, 1, 1, 1> = Conv2Layer::new(Init::default(), &mut SimpleRng::new(1));
/// ```
///
/// # Example
///
/// ```
/// use neural_stacks::layers::{Conv2Layer, Init, Layer};
/// use neural_stacks::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(3);
/// let mut conv: Conv2Layer<8, 8, 3, 4, 1> = Conv2Layer::new(Init::default(), &mut rng);
/// conv.execute(&[0.5; 8 * 8 * 3]);
/// assert_eq!(conv.output().len(), 8 * 8 * 4);
/// assert_eq!(conv.parameter_count(), 4 * 3 * 9 + 8 * 8 * 4);
/// ```
pub struct Conv2Layer<
    const W: usize,
    const H: usize,
    const D: usize,
    const K: usize,
    const R: usize,
    A = Relu,
    O = Sgd,
    E = Mse,
> where
    O: Optimizer,
{
    weights: Params<O>,
    biases: Option<Params<O>>,
    raw: Vec<f32>,
    out: Vec<f32>,
    gradient: Vec<f32>,
    locked: bool,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<const W: usize, const H: usize, const D: usize, const K: usize, const R: usize, A, O, E>
    Conv2Layer<W, H, D, K, R, A, O, E>
where
    A: Activation,
    O: Optimizer,
    E: ErrorFn,
{
    const KERNEL_FITS: () = assert!(
        W >= 4 * R + 1 && H >= 4 * R + 1,
        "kernel radius too large for image: need dimension - 2R >= 2R + 1"
    );

    /// Kernel edge length.
    pub const SIDE: usize = 2 * R + 1;

    /// Weights per kernel.
    pub const KERNEL_SIZE: usize = D * Self::SIDE * Self::SIDE;

    /// Create a layer with per-pixel biases.
    ///
    /// # Arguments
    ///
    /// * `init` - Weight initialization policy
    /// * `rng` - Random source
    pub fn new(init: Init, rng: &mut dyn FillRandom) -> Self {
        let () = Self::KERNEL_FITS;
        let weights = Self::init_weights(init, rng);
        let biases = Params::biases(W * H * K, rng);
        Self::with_params(weights, Some(biases))
    }

    /// Create a layer without biases.
    pub fn without_biases(init: Init, rng: &mut dyn FillRandom) -> Self {
        let () = Self::KERNEL_FITS;
        let weights = Self::init_weights(init, rng);
        Self::with_params(weights, None)
    }

    fn init_weights(init: Init, rng: &mut dyn FillRandom) -> Params<O> {
        let area = Self::SIDE * Self::SIDE;
        Params::weights(K * Self::KERNEL_SIZE, init, D * area, K * area, rng)
    }

    fn with_params(weights: Params<O>, biases: Option<Params<O>>) -> Self {
        Self {
            weights,
            biases,
            raw: if A::NEEDS_RAW {
                vec![0.0; W * H * K]
            } else {
                Vec::new()
            },
            out: vec![0.0; W * H * K],
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

    pub fn biases(&self) -> Option<&Params<O>> {
        self.biases.as_ref()
    }

    #[inline]
    fn weight_index(k: usize, d: usize, ky: usize, kx: usize) -> usize {
        ((k * D + d) * Self::SIDE + ky) * Self::SIDE + kx
    }

    fn header() -> LayerHeader {
        LayerHeader {
            kind: LayerKind::Conv2,
            radius: R,
            input: Dims::new(W, H, D),
            output: Dims::new(W, H, K),
        }
    }
}

impl<const W: usize, const H: usize, const D: usize, const K: usize, const R: usize, A, O, E> Layer
    for Conv2Layer<W, H, D, K, R, A, O, E>
where
    A: Activation,
    O: Optimizer,
    E: ErrorFn,
{
    fn kind(&self) -> LayerKind {
        LayerKind::Conv2
    }

    fn describe(&self) -> String {
        format!(
            "conv2<{}x{}x{}, k{} r{}> {} {} {}",
            W,
            H,
            D,
            K,
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
        W * H * K
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.as_ref().map_or(0, Params::len)
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
        let biases = self.biases.as_ref().map(Params::values);
        let side = Self::SIDE;

        for k in 0..K {
            for y in R..H - R {
                for x in R..W - R {
                    let o = index_c(x, y, k, W, H);
                    let mut sum = biases.map_or(0.0, |b| b[o]);
                    for d in 0..D {
                        for ky in 0..side {
                            for kx in 0..side {
                                let i = index_c(x + kx - R, y + ky - R, d, W, H);
                                sum += input[i] * weights[Self::weight_index(k, d, ky, kx)];
                            }
                        }
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
        let mut bias_deltas = self.biases.as_mut().map(Params::deltas_mut);
        let side = Self::SIDE;

        for k in 0..K {
            for y in R..H - R {
                for x in R..W - R {
                    let o = index_c(x, y, k, W, H);
                    let out = self.out[o];
                    let raw = if A::NEEDS_RAW { self.raw[o] } else { 0.0 };
                    let delta = A::derivative(out, raw) * signal.at::<E>(o, out);

                    for d in 0..D {
                        for ky in 0..side {
                            for kx in 0..side {
                                let i = index_c(x + kx - R, y + ky - R, d, W, H);
                                let wi = Self::weight_index(k, d, ky, kx);
                                self.gradient[i] += weights[wi] * delta;
                                if !self.locked {
                                    weight_deltas[wi] += input[i] * delta;
                                }
                            }
                        }
                    }

                    if !self.locked {
                        if let Some(bias_deltas) = bias_deltas.as_deref_mut() {
                            bias_deltas[o] += delta;
                        }
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
            if let Some(biases) = self.biases.as_mut() {
                biases.reset_deltas();
            }
        }
    }

    fn apply(&mut self, rate: f32) {
        if !self.locked {
            self.weights.step(rate);
            if let Some(biases) = self.biases.as_mut() {
                biases.step(rate);
            }
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
        if let Some(biases) = &self.biases {
            biases.write_to(w)?;
        }
        Ok(())
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        Self::header().verify(r)?;
        self.weights.read_from(r)?;
        if let Some(biases) = self.biases.as_mut() {
            biases.read_from(r)?;
        }
        Ok(())
    }

    fn exchange(&mut self, master: &mut dyn Layer) -> Result<()> {
        let master = same_layer(self, master)?;
        self.weights.exchange_with(&mut master.weights);
        if let (Some(mine), Some(theirs)) = (self.biases.as_mut(), master.biases.as_mut()) {
            mine.exchange_with(theirs);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
