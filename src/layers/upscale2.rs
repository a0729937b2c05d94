//! Nearest-neighbour 2× upscaling.

use std::any::Any;
use std::marker::PhantomData;

use crate::error::Result;
use crate::layers::conv2::index_c;
use crate::layers::r#trait::same_layer;
use crate::layers::{Layer, LayerKind, Signal};
use crate::utils::{ErrorFn, Mse};

/// Doubles a `W × H × D` image to `2W × 2H × D` by replicating each cell into a
/// 2×2 block. The backward pass sums the four block gradients into the source.
pub struct Upscale2Layer<const W: usize, const H: usize, const D: usize, E = Mse> {
    out: Vec<f32>,
    gradient: Vec<f32>,
    locked: bool,
    _marker: PhantomData<fn() -> E>,
}

impl<const W: usize, const H: usize, const D: usize, E: ErrorFn> Upscale2Layer<W, H, D, E> {
    const OUT_W: usize = W * 2;
    const OUT_H: usize = H * 2;

    pub fn new() -> Self {
        Self {
            out: vec![0.0; Self::OUT_W * Self::OUT_H * D],
            gradient: vec![0.0; W * H * D],
            locked: false,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn block(x: usize, y: usize, d: usize) -> [usize; 4] {
        let (ox, oy) = (x * 2, y * 2);
        [
            index_c(ox, oy, d, Self::OUT_W, Self::OUT_H),
            index_c(ox + 1, oy, d, Self::OUT_W, Self::OUT_H),
            index_c(ox, oy + 1, d, Self::OUT_W, Self::OUT_H),
            index_c(ox + 1, oy + 1, d, Self::OUT_W, Self::OUT_H),
        ]
    }
}

impl<const W: usize, const H: usize, const D: usize, E: ErrorFn> Default for Upscale2Layer<W, H, D, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const W: usize, const H: usize, const D: usize, E: ErrorFn> Layer for Upscale2Layer<W, H, D, E> {
    fn kind(&self) -> LayerKind {
        LayerKind::Upscale2
    }

    fn describe(&self) -> String {
        format!("upscale2<{}x{}x{}> {}", W, H, D, E::NAME)
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
            for y in 0..H {
                for x in 0..W {
                    let value = input[index_c(x, y, d, W, H)];
                    for o in Self::block(x, y, d) {
                        self.out[o] = value;
                    }
                }
            }
        }
    }

    fn fit(&mut self, input: &[f32], signal: Signal<'_>) {
        debug_assert_eq!(input.len(), W * H * D);
        for d in 0..D {
            for y in 0..H {
                for x in 0..W {
                    self.gradient[index_c(x, y, d, W, H)] = Self::block(x, y, d)
                        .iter()
                        .map(|&o| signal.at::<E>(o, self.out[o]))
                        .sum();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicates_and_sums() {
        let mut up: Upscale2Layer<2, 1, 1> = Upscale2Layer::new();
        let input = [1.0, 2.0];
        up.execute(&input);
        // 4x2 output: rows [1 1 2 2], [1 1 2 2]
        assert_eq!(up.output(), &[1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0]);

        let downstream = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        up.fit(&input, Signal::Downstream(&downstream));
        assert_eq!(up.gradient(), &[1.0 + 2.0 + 5.0 + 6.0, 3.0 + 4.0 + 7.0 + 8.0]);
    }

    #[test]
    fn test_tail_uses_error_derivative() {
        let mut up: Upscale2Layer<1, 1, 1, Mse> = Upscale2Layer::new();
        up.execute(&[1.0]);
        up.fit(&[1.0], Signal::Target(&[0.0, 0.0, 0.0, 0.0]));
        assert_eq!(up.gradient(), &[4.0]);
    }
}
