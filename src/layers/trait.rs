//! Layer trait definition
//!
//! Every layer in a chain implements [`Layer`]. A chain is driven forward with
//! `execute` from the head to the tail, then backward with `fit` from the tail
//! to the head. Each layer reads the gradient its front neighbour left behind
//! and leaves its own gradient for its back neighbour.

use std::any::Any;
use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::utils::ErrorFn;

/// Identifies a concrete layer type in persisted streams and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Dense,
    Conv2,
    DepthwiseConv2,
    Local2,
    Downscale2,
    Upscale2,
    Error,
    Filter,
    Effect,
    Variation,
}

impl LayerKind {
    /// Numeric id stored in the low bits of a layer tag.
    pub fn id(self) -> u32 {
        match self {
            LayerKind::Dense => 1,
            LayerKind::Conv2 => 2,
            LayerKind::DepthwiseConv2 => 3,
            LayerKind::Local2 => 4,
            LayerKind::Downscale2 => 5,
            LayerKind::Upscale2 => 6,
            LayerKind::Error => 7,
            LayerKind::Filter => 8,
            LayerKind::Effect => 9,
            LayerKind::Variation => 10,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Dense => "dense",
            LayerKind::Conv2 => "conv2",
            LayerKind::DepthwiseConv2 => "depthwise_conv2",
            LayerKind::Local2 => "local2",
            LayerKind::Downscale2 => "downscale2",
            LayerKind::Upscale2 => "upscale2",
            LayerKind::Error => "error",
            LayerKind::Filter => "filter",
            LayerKind::Effect => "effect",
            LayerKind::Variation => "variation",
        }
    }
}

/// Where the error derivative at a layer's output comes from.
#[derive(Debug, Clone, Copy)]
pub enum Signal<'a> {
    /// The layer is the tail; derive the error from the target.
    Target(&'a [f32]),
    /// The gradient left by the front neighbour.
    Downstream(&'a [f32]),
}

impl<'a> Signal<'a> {
    /// Error derivative at output element `i`, whose current value is `out`.
    #[inline]
    pub fn at<E: ErrorFn>(&self, i: usize, out: f32) -> f32 {
        match *self {
            Signal::Target(target) => E::derivative(target[i], out),
            Signal::Downstream(gradient) => gradient[i],
        }
    }

    pub fn len(&self) -> usize {
        match *self {
            Signal::Target(values) | Signal::Downstream(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Core trait for chainable layers.
///
/// Sizes are fixed by the concrete type's const parameters; buffers are
/// allocated once at construction. Callers must pass slices of exactly
/// [`input_size`](Layer::input_size) and [`output_size`](Layer::output_size)
/// values; [`Network`](crate::network::Network) checks this at its boundary.
///
/// # Example
///
/// ```
/// use neural_stacks::layers::{DenseLayer, Init, Layer, Signal};
/// use neural_stacks::optimizers::Sgd;
/// use neural_stacks::utils::{Linear, Mse, SimpleRng};
///
/// let mut rng = SimpleRng::new(42);
/// let mut layer: DenseLayer<4, 2, Linear, Sgd, Mse> = DenseLayer::new(Init::default(), &mut rng);
///
/// let input = [0.1, 0.2, 0.3, 0.4];
/// layer.execute(&input);
/// layer.reset();
/// layer.fit(&input, Signal::Target(&[0.0, 1.0]));
/// layer.apply(0.1);
///
/// assert_eq!(layer.output().len(), 2);
/// assert_eq!(layer.gradient().len(), 4);
/// ```
pub trait Layer: Any + Send {
    fn kind(&self) -> LayerKind;

    /// One-line description for logs: kind, shape and policies.
    fn describe(&self) -> String {
        self.kind().name().to_string()
    }

    /// Number of values consumed by `execute`.
    fn input_size(&self) -> usize;

    /// Number of values produced by `execute`.
    fn output_size(&self) -> usize;

    /// Trainable parameters, weights and biases together.
    fn parameter_count(&self) -> usize {
        0
    }

    /// Activated output of the last `execute`.
    fn output(&self) -> &[f32];

    /// Error derivative with respect to the input, written by the last `fit`.
    fn gradient(&self) -> &[f32];

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// * `input` - The back neighbour's output, or the network input for the head
    fn execute(&mut self, input: &[f32]);

    /// Backward pass.
    ///
    /// Overwrites [`gradient`](Layer::gradient) and, unless the layer is locked,
    /// adds this sample's contribution to the parameter deltas.
    ///
    /// # Arguments
    ///
    /// * `input` - The same input passed to the matching `execute`
    /// * `signal` - Target values at the tail, or the front neighbour's gradient
    fn fit(&mut self, input: &[f32], signal: Signal<'_>);

    /// Error of the current output against `target`.
    fn error(&self, target: &[f32]) -> f32;

    /// Zero the parameter deltas. No-op when locked.
    fn reset(&mut self) {}

    /// Update parameters from the accumulated deltas. No-op when locked.
    fn apply(&mut self, _rate: f32) {}

    fn lock(&mut self);

    fn unlock(&mut self);

    fn is_locked(&self) -> bool;

    /// Write the parameters, preceded by a shape header where the layer has any.
    fn store(&self, _w: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    /// Read parameters written by [`store`](Layer::store) on an identically shaped layer.
    fn load(&mut self, _r: &mut dyn Read) -> Result<()> {
        Ok(())
    }

    /// Merge with the same layer of a master replica.
    ///
    /// Copies this layer's deltas into `master` and the master's parameters
    /// into this layer.
    fn exchange(&mut self, master: &mut dyn Layer) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Downcast `master` to the concrete type of `this`.
pub(crate) fn same_layer<'a, L: Layer>(this: &L, master: &'a mut dyn Layer) -> Result<&'a mut L> {
    let master_kind = master.kind();
    master
        .as_any_mut()
        .downcast_mut::<L>()
        .ok_or(Error::ExchangeMismatch {
            this: this.kind(),
            master: master_kind,
        })
}
