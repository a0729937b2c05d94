//! Fixed 2× downscaling with selectable reduction
//!
//! Each output cell reduces a 2×2 block of input cells, visited in raster
//! order `[(x, y), (x+1, y), (x, y+1), (x+1, y+1)]`. MIN and MAX remember which
//! cell won so the backward pass can route the whole gradient to it.

use std::any::Any;
use std::marker::PhantomData;

use crate::error::Result;
use crate::layers::conv2::index_c;
use crate::layers::r#trait::same_layer;
use crate::layers::{Layer, LayerKind, Signal};
use crate::utils::{ErrorFn, Mse};

/// Reduction applied to each 2×2 block.
pub trait Pooling: Send + 'static {
    const NAME: &'static str;

    /// Whether the backward pass follows a recorded route.
    ///
    /// The route buffer is only allocated when this is `true`.
    const ROUTED: bool;

    /// Gradient share given to each cell when not routed.
    const SHARE: f32;

    /// Reduce a block; returns the value and the index of the selected cell.
    fn reduce(block: [f32; 4]) -> (f32, u8);
}

/// Mean of the block.
#[derive(Debug, Clone, Copy, Default)]
pub struct Avg;

impl Pooling for Avg {
    const NAME: &'static str = "avg";
    const ROUTED: bool = false;
    const SHARE: f32 = 0.25;

    fn reduce(block: [f32; 4]) -> (f32, u8) {
        ((block[0] + block[1] + block[2] + block[3]) * 0.25, 0)
    }
}

/// Sum of the block.
#[derive(Debug, Clone, Copy, Default)]
pub struct Add;

impl Pooling for Add {
    const NAME: &'static str = "add";
    const ROUTED: bool = false;
    const SHARE: f32 = 1.0;

    fn reduce(block: [f32; 4]) -> (f32, u8) {
        (block[0] + block[1] + block[2] + block[3], 0)
    }
}

/// Smallest cell; ties go to the first in raster order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Min;

impl Pooling for Min {
    const NAME: &'static str = "min";
    const ROUTED: bool = true;
    const SHARE: f32 = 0.0;

    fn reduce(block: [f32; 4]) -> (f32, u8) {
        let mut best = (block[0], 0u8);
        for (i, &v) in block.iter().enumerate().skip(1) {
            if v < best.0 {
                best = (v, i as u8);
            }
        }
        best
    }
}

/// Largest cell; ties go to the first in raster order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Max;

impl Pooling for Max {
    const NAME: &'static str = "max";
    const ROUTED: bool = true;
    const SHARE: f32 = 0.0;

    fn reduce(block: [f32; 4]) -> (f32, u8) {
        let mut best = (block[0], 0u8);
        for (i, &v) in block.iter().enumerate().skip(1) {
            if v > best.0 {
                best = (v, i as u8);
            }
        }
        best
    }
}

/// Halves a `W × H × D` image to `W/2 × H/2 × D`.
///
/// # Example
///
/// ```
/// use neural_stacks::layers::{Downscale2Layer, Layer, Max, Signal};
/// use neural_stacks::utils::Mse;
///
/// let mut pool: Downscale2Layer<2, 2, 1, Max, Mse> = Downscale2Layer::new();
/// let input = [3.0, 7.0, 2.0, 5.0];
/// pool.execute(&input);
/// assert_eq!(pool.output(), &[7.0]);
///
/// pool.fit(&input, Signal::Downstream(&[0.5]));
/// assert_eq!(pool.gradient(), &[0.0, 0.5, 0.0, 0.0]);
/// ```
pub struct Downscale2Layer<const W: usize, const H: usize, const D: usize, P = Max, E = Mse> {
    out: Vec<f32>,
    route: Vec<u8>,
    gradient: Vec<f32>,
    locked: bool,
    _marker: PhantomData<fn() -> (P, E)>,
}

impl<const W: usize, const H: usize, const D: usize, P, E> Downscale2Layer<W, H, D, P, E>
where
    P: Pooling,
    E: ErrorFn,
{
    const EVEN: () = assert!(
        W % 2 == 0 && H % 2 == 0 && W > 0 && H > 0,
        "downscaling needs even, non-zero width and height"
    );

    const OUT_W: usize = W / 2;
    const OUT_H: usize = H / 2;

    pub fn new() -> Self {
        let () = Self::EVEN;
        let out_len = Self::OUT_W * Self::OUT_H * D;
        Self {
            out: vec![0.0; out_len],
            route: if P::ROUTED { vec![0; out_len] } else { Vec::new() },
            gradient: vec![0.0; W * H * D],
            locked: false,
            _marker: PhantomData,
        }
    }

    /// Selected cell per output; empty for AVG and ADD.
    pub fn route(&self) -> &[u8] {
        &self.route
    }

    #[inline]
    fn block(ox: usize, oy: usize, d: usize) -> [usize; 4] {
        let (x, y) = (ox * 2, oy * 2);
        [
            index_c(x, y, d, W, H),
            index_c(x + 1, y, d, W, H),
            index_c(x, y + 1, d, W, H),
            index_c(x + 1, y + 1, d, W, H),
        ]
    }
}

impl<const W: usize, const H: usize, const D: usize, P, E> Default for Downscale2Layer<W, H, D, P, E>
where
    P: Pooling,
    E: ErrorFn,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const W: usize, const H: usize, const D: usize, P, E> Layer for Downscale2Layer<W, H, D, P, E>
where
    P: Pooling,
    E: ErrorFn,
{
    fn kind(&self) -> LayerKind {
        LayerKind::Downscale2
    }

    fn describe(&self) -> String {
        format!("downscale2<{}x{}x{}> {} {}", W, H, D, P::NAME, E::NAME)
    }

    fn input_size(&self) -> usize {
        W * H * D
    }

    fn output_size(&self) -> usize {
        self.out.len()
    }

    fn output(&self) -> &[f32] {
        &self.out
    }

    fn gradient(&self) -> &[f32] {
        &self.gradient
    }

    fn execute(&mut self, input: &[f32]) {
        debug_assert_eq!(input.len(), W * H * D);
        for d in 0..D {
            for oy in 0..Self::OUT_H {
                for ox in 0..Self::OUT_W {
                    let cells = Self::block(ox, oy, d);
                    let (value, route) = P::reduce(cells.map(|i| input[i]));
                    let o = index_c(ox, oy, d, Self::OUT_W, Self::OUT_H);
                    self.out[o] = value;
                    if P::ROUTED {
                        self.route[o] = route;
                    }
                }
            }
        }
    }

    fn fit(&mut self, input: &[f32], signal: Signal<'_>) {
        debug_assert_eq!(input.len(), W * H * D);
        if P::ROUTED {
            self.gradient.fill(0.0);
        }
        for d in 0..D {
            for oy in 0..Self::OUT_H {
                for ox in 0..Self::OUT_W {
                    let o = index_c(ox, oy, d, Self::OUT_W, Self::OUT_H);
                    let der = signal.at::<E>(o, self.out[o]);
                    let cells = Self::block(ox, oy, d);
                    if P::ROUTED {
                        self.gradient[cells[self.route[o] as usize]] = der;
                    } else {
                        for i in cells {
                            self.gradient[i] = der * P::SHARE;
                        }
                    }
                }
            }
        }
    }

    fn error(&self, target: &[f32]) -> f32 {
        E::error(target, &self.out)
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

    fn exchange(&mut self, master: &mut dyn Layer) -> Result<()> {
        same_layer(self, master)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
