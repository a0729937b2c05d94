//! Locally connected 2D layer
//!
//! Like [`Conv2Layer`](crate::layers::Conv2Layer), but every output unit owns
//! its kernel. The output grid may differ in size from the input grid; the
//! window centre for output `(ox, oy)` sits at `(ox * WI / WO, oy * HI / HO)`
//! in the input, and taps that land outside the input contribute nothing.

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

/// Unshared-kernel 2D correlation with optional resampling.
///
/// Input is `WI × HI × D`, output `WO × HO × D`; channels map one to one.
/// Output unit `o` owns kernel weights `o * S² .. (o + 1) * S²` (`S = 2R + 1`)
/// and one bias.
///
/// # Type Parameters
///
/// * `WI`, `HI` - Input grid
/// * `D` - Channels
/// * `WO`, `HO` - Output grid
/// * `R` - Kernel radius; `WI - 2R >= 2R + 1` and `HI - 2R >= 2R + 1` must hold
///
/// The radius is checked against the input grid, not the output grid:
///
/// ```compile_fail
/// use neural_stacks::layers::{Init, Local2Layer};
/// use neural_stacks::utils::SimpleRng;
///
/// // 4 - 2 < 3: a 3x3 window does not fit a 4x4 input, however large the output
/// let layer: Local2Layer<4, 4, 1, 8, 8, 1> = Local2Layer::new(Init::default(), &mut SimpleRng::new(1));
/// ```
///
/// # Example
///
/// ```
/// use neural_stacks::layers::{Init, Layer, Local2Layer};
/// use neural_stacks::utils::SimpleRng;
///
/// // 8x8 down to 4x4 while filtering with 3x3 windows.
/// let mut layer: Local2Layer<8, 8, 1, 4, 4, 1> =
///     Local2Layer::new(Init::default(), &mut SimpleRng::new(8));
/// layer.execute(&[1.0; 64]);
/// assert_eq!(layer.output().len(), 16);
/// assert_eq!(layer.parameter_count(), 16 * 9 + 16);
/// ```
pub struct Local2Layer<
    const WI: usize,
    const HI: usize,
    const D: usize,
    const WO: usize,
    const HO: usize,
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

impl<
        const WI: usize,
        const HI: usize,
        const D: usize,
        const WO: usize,
        const HO: usize,
        const R: usize,
        A,
        O,
        E,
    > Local2Layer<WI, HI, D, WO, HO, R, A, O, E>
where
    A: Activation,
    O: Optimizer,
    E: ErrorFn,
{
    const KERNEL_FITS: () = assert!(
        WI >= 4 * R + 1 && HI >= 4 * R + 1,
        "kernel radius too large for input: need dimension - 2R >= 2R + 1"
    );

    const SIDE: usize = 2 * R + 1;
    const AREA: usize = Self::SIDE * Self::SIDE;
    const OUT_LEN: usize = WO * HO * D;

    pub fn new(init: Init, rng: &mut dyn FillRandom) -> Self {
        let () = Self::KERNEL_FITS;
        let weights = Params::weights(Self::OUT_LEN * Self::AREA, init, Self::AREA, 1, rng);
        let biases = Params::biases(Self::OUT_LEN, rng);
        Self {
            weights,
            biases,
            raw: if A::NEEDS_RAW {
                vec![0.0; Self::OUT_LEN]
            } else {
                Vec::new()
            },
            out: vec![0.0; Self::OUT_LEN],
            gradient: vec![0.0; WI * HI * D],
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

    /// Input coordinate of tap `t` for output `(ox, oy)`, or `None` off the grid.
    #[inline]
    fn tap(ox: usize, oy: usize, t: usize) -> Option<(usize, usize)> {
        let cx = (ox * WI / WO) as isize;
        let cy = (oy * HI / HO) as isize;
        let ix = cx + (t % Self::SIDE) as isize - R as isize;
        let iy = cy + (t / Self::SIDE) as isize - R as isize;
        if ix < 0 || iy < 0 || ix >= WI as isize || iy >= HI as isize {
            None
        } else {
            Some((ix as usize, iy as usize))
        }
    }

    fn header() -> LayerHeader {
        LayerHeader {
            kind: LayerKind::Local2,
            radius: R,
            input: Dims::new(WI, HI, D),
            output: Dims::new(WO, HO, D),
        }
    }
}

impl<
        const WI: usize,
        const HI: usize,
        const D: usize,
        const WO: usize,
        const HO: usize,
        const R: usize,
        A,
        O,
        E,
    > Layer for Local2Layer<WI, HI, D, WO, HO, R, A, O, E>
where
    A: Activation,
    O: Optimizer,
    E: ErrorFn,
{
    fn kind(&self) -> LayerKind {
        LayerKind::Local2
    }

    fn describe(&self) -> String {
        format!(
            "local2<{}x{}x{} -> {}x{}, r{}> {} {} {}",
            WI,
            HI,
            D,
            WO,
            HO,
            R,
            A::NAME,
            O::KIND.name(),
            E::NAME
        )
    }

    fn input_size(&self) -> usize {
        WI * HI * D
    }

    fn output_size(&self) -> usize {
        Self::OUT_LEN
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
        debug_assert_eq!(input.len(), WI * HI * D);
        let weights = self.weights.values();
        let biases = self.biases.values();

        for d in 0..D {
            for oy in 0..HO {
                for ox in 0..WO {
                    let o = index_c(ox, oy, d, WO, HO);
                    let kernel = &weights[o * Self::AREA..(o + 1) * Self::AREA];
                    let mut sum = biases[o];
                    for (t, w) in kernel.iter().enumerate() {
                        if let Some((ix, iy)) = Self::tap(ox, oy, t) {
                            sum += input[index_c(ix, iy, d, WI, HI)] * w;
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
        debug_assert_eq!(input.len(), WI * HI * D);
        self.gradient.fill(0.0);

        let (weights, weight_deltas) = self.weights.split_mut();
        let bias_deltas = self.biases.deltas_mut();

        for d in 0..D {
            for oy in 0..HO {
                for ox in 0..WO {
                    let o = index_c(ox, oy, d, WO, HO);
                    let out = self.out[o];
                    let raw = if A::NEEDS_RAW { self.raw[o] } else { 0.0 };
                    let delta = A::derivative(out, raw) * signal.at::<E>(o, out);

                    for t in 0..Self::AREA {
                        let Some((ix, iy)) = Self::tap(ox, oy, t) else {
                            continue;
                        };
                        let i = index_c(ix, iy, d, WI, HI);
                        let wi = o * Self::AREA + t;
                        self.gradient[i] += weights[wi] * delta;
                        if !self.locked {
                            weight_deltas[wi] += input[i] * delta;
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
