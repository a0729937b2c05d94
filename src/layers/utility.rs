//! Parameter-free utility layers.

use std::any::Any;
use std::marker::PhantomData;

use crate::error::Result;
use crate::layers::r#trait::same_layer;
use crate::layers::{Layer, LayerKind, Signal};
use crate::utils::{Activation, ErrorFn, Mse, Sigmoid};

/// Identity layer that owns the error boundary.
///
/// Appending it to a chain lets the error metric be chosen independently of
/// the layer in front of it.
pub struct ErrorLayer<const N: usize, E = Mse> {
    out: Vec<f32>,
    gradient: Vec<f32>,
    locked: bool,
    _marker: PhantomData<fn() -> E>,
}

impl<const N: usize, E: ErrorFn> ErrorLayer<N, E> {
    pub fn new() -> Self {
        Self {
            out: vec![0.0; N],
            gradient: vec![0.0; N],
            locked: false,
            _marker: PhantomData,
        }
    }
}

impl<const N: usize, E: ErrorFn> Default for ErrorLayer<N, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, E: ErrorFn> Layer for ErrorLayer<N, E> {
    fn kind(&self) -> LayerKind {
        LayerKind::Error
    }

    fn describe(&self) -> String {
        format!("error<{}> {}", N, E::NAME)
    }

    fn input_size(&self) -> usize {
        N
    }

    fn output_size(&self) -> usize {
        N
    }

    fn output(&self) -> &[f32] {
        &self.out
    }

    fn gradient(&self) -> &[f32] {
        &self.gradient
    }

    fn execute(&mut self, input: &[f32]) {
        self.out.copy_from_slice(input);
    }

    fn fit(&mut self, _input: &[f32], signal: Signal<'_>) {
        for (i, g) in self.gradient.iter_mut().enumerate() {
            *g = signal.at::<E>(i, self.out[i]);
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

/// Element-wise activation without parameters.
///
/// The derivative reads the input of the matching `execute` as its raw value,
/// so no pre-activation buffer is kept.
pub struct FilterLayer<const N: usize, A = Sigmoid, E = Mse> {
    out: Vec<f32>,
    gradient: Vec<f32>,
    locked: bool,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<const N: usize, A: Activation, E: ErrorFn> FilterLayer<N, A, E> {
    pub fn new() -> Self {
        Self {
            out: vec![0.0; N],
            gradient: vec![0.0; N],
            locked: false,
            _marker: PhantomData,
        }
    }
}

impl<const N: usize, A: Activation, E: ErrorFn> Default for FilterLayer<N, A, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, A: Activation, E: ErrorFn> Layer for FilterLayer<N, A, E> {
    fn kind(&self) -> LayerKind {
        LayerKind::Filter
    }

    fn describe(&self) -> String {
        format!("filter<{}> {} {}", N, A::NAME, E::NAME)
    }

    fn input_size(&self) -> usize {
        N
    }

    fn output_size(&self) -> usize {
        N
    }

    fn output(&self) -> &[f32] {
        &self.out
    }

    fn gradient(&self) -> &[f32] {
        &self.gradient
    }

    fn execute(&mut self, input: &[f32]) {
        for (o, &x) in self.out.iter_mut().zip(input) {
            *o = A::apply(x);
        }
    }

    fn fit(&mut self, input: &[f32], signal: Signal<'_>) {
        for (i, g) in self.gradient.iter_mut().enumerate() {
            let out = self.out[i];
            *g = A::derivative(out, input[i]) * signal.at::<E>(i, out);
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

/// Per-sample standardization of the input vector.
///
/// Each flag enables one stage, applied in this order:
///
/// * `ZEROMEAN` - subtract the mean of the vector
/// * `STDDEV` - divide by its standard deviation
/// * `NORMALIZE` - map `[min, max]` onto `[0, 1]`
///
/// The statistics are treated as constants in the backward pass: the gradient
/// is the incoming derivative scaled by the same factors the forward pass
/// applied. A vector with zero deviation or zero range skips that scaling;
/// a zero range maps every element to 0.
///
/// # Example
///
/// ```
/// use neural_stacks::layers::{EffectLayer, Layer};
/// use neural_stacks::utils::Mse;
///
/// let mut layer: EffectLayer<4, true, false, false, Mse> = EffectLayer::new();
/// layer.execute(&[1.0, 2.0, 3.0, 6.0]);
/// assert_eq!(layer.output(), &[-2.0, -1.0, 0.0, 3.0]);
/// ```
pub struct EffectLayer<
    const N: usize,
    const ZEROMEAN: bool = true,
    const STDDEV: bool = true,
    const NORMALIZE: bool = false,
    E = Mse,
> {
    out: Vec<f32>,
    gradient: Vec<f32>,
    stddev_scale: f32,
    range_scale: f32,
    locked: bool,
    _marker: PhantomData<fn() -> E>,
}

impl<const N: usize, const ZEROMEAN: bool, const STDDEV: bool, const NORMALIZE: bool, E>
    EffectLayer<N, ZEROMEAN, STDDEV, NORMALIZE, E>
where
    E: ErrorFn,
{
    pub fn new() -> Self {
        Self {
            out: vec![0.0; N],
            gradient: vec![0.0; N],
            stddev_scale: 1.0,
            range_scale: 1.0,
            locked: false,
            _marker: PhantomData,
        }
    }

    /// Combined factor the last `execute` multiplied the input by.
    pub fn scale(&self) -> f32 {
        self.stddev_scale * self.range_scale
    }

    fn mean(values: &[f32]) -> f32 {
        values.iter().sum::<f32>() / values.len().max(1) as f32
    }
}

impl<const N: usize, const ZEROMEAN: bool, const STDDEV: bool, const NORMALIZE: bool, E> Default
    for EffectLayer<N, ZEROMEAN, STDDEV, NORMALIZE, E>
where
    E: ErrorFn,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const ZEROMEAN: bool, const STDDEV: bool, const NORMALIZE: bool, E> Layer
    for EffectLayer<N, ZEROMEAN, STDDEV, NORMALIZE, E>
where
    E: ErrorFn,
{
    fn kind(&self) -> LayerKind {
        LayerKind::Effect
    }

    fn describe(&self) -> String {
        let stages: Vec<&str> = [(ZEROMEAN, "zeromean"), (STDDEV, "stddev"), (NORMALIZE, "normalize")]
            .into_iter()
            .filter_map(|(on, name)| on.then_some(name))
            .collect();
        format!("effect<{}> [{}] {}", N, stages.join(","), E::NAME)
    }

    fn input_size(&self) -> usize {
        N
    }

    fn output_size(&self) -> usize {
        N
    }

    fn output(&self) -> &[f32] {
        &self.out
    }

    fn gradient(&self) -> &[f32] {
        &self.gradient
    }

    fn execute(&mut self, input: &[f32]) {
        self.out.copy_from_slice(input);
        self.stddev_scale = 1.0;
        self.range_scale = 1.0;

        if ZEROMEAN {
            let mean = Self::mean(&self.out);
            self.out.iter_mut().for_each(|v| *v -= mean);
        }

        if STDDEV {
            let mean = Self::mean(&self.out);
            let var = self.out.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>()
                / N.max(1) as f32;
            let stddev = var.sqrt();
            if stddev > 0.0 {
                self.stddev_scale = 1.0 / stddev;
                self.out.iter_mut().for_each(|v| *v *= self.stddev_scale);
            }
        }

        if NORMALIZE {
            let (min, max) = self
                .out
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            let range = max - min;
            if range > 0.0 {
                self.range_scale = 1.0 / range;
                self.out.iter_mut().for_each(|v| *v = (*v - min) * self.range_scale);
            } else {
                self.out.fill(0.0);
            }
        }
    }

    fn fit(&mut self, _input: &[f32], signal: Signal<'_>) {
        let scale = self.scale();
        for (i, g) in self.gradient.iter_mut().enumerate() {
            *g = signal.at::<E>(i, self.out[i]) * scale;
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
    use crate::utils::{Mae, Relu};

    #[test]
    fn test_error_layer_is_identity_forward() {
        let mut layer: ErrorLayer<3, Mae> = ErrorLayer::new();
        layer.execute(&[1.0, -2.0, 0.5]);
        assert_eq!(layer.output(), &[1.0, -2.0, 0.5]);

        layer.fit(&[1.0, -2.0, 0.5], Signal::Target(&[0.0, 0.0, 0.5]));
        assert_eq!(layer.gradient(), &[1.0, -1.0, 0.0]);
        assert!((layer.error(&[0.0, 0.0, 0.5]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_filter_uses_input_as_raw() {
        let mut layer: FilterLayer<2, Relu, Mse> = FilterLayer::new();
        let input = [-1.0, 2.0];
        layer.execute(&input);
        assert_eq!(layer.output(), &[0.0, 2.0]);

        layer.fit(&input, Signal::Downstream(&[3.0, 3.0]));
        assert_eq!(layer.gradient(), &[0.0, 3.0]);
    }

    #[test]
    fn test_exchange_rejects_other_kinds() {
        let mut a: FilterLayer<2, Relu, Mse> = FilterLayer::new();
        let mut b: ErrorLayer<2, Mse> = ErrorLayer::new();
        assert!(a.exchange(&mut b).is_err());
    }

    #[test]
    fn test_effect_standardizes() {
        let mut layer: EffectLayer<4, true, true, false, Mse> = EffectLayer::new();
        layer.execute(&[1.0, 3.0, 5.0, 7.0]);
        // mean 4, population deviation sqrt(5)
        let sd = 5.0f32.sqrt();
        let expected = [-3.0 / sd, -1.0 / sd, 1.0 / sd, 3.0 / sd];
        for (o, e) in layer.output().iter().zip(expected) {
            assert!((o - e).abs() < 1e-6);
        }
        let mean: f32 = layer.output().iter().sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-6);
    }

    #[test]
    fn test_effect_normalize_to_unit_range() {
        let mut layer: EffectLayer<3, false, false, true, Mse> = EffectLayer::new();
        layer.execute(&[2.0, 4.0, 10.0]);
        assert_eq!(layer.output(), &[0.0, 0.25, 1.0]);
        assert_eq!(layer.scale(), 0.125);

        layer.fit(&[2.0, 4.0, 10.0], Signal::Downstream(&[8.0, -8.0, 4.0]));
        assert_eq!(layer.gradient(), &[1.0, -1.0, 0.5]);
    }

    #[test]
    fn test_effect_constant_input_stays_finite() {
        let mut layer: EffectLayer<3, true, true, true, Mse> = EffectLayer::new();
        layer.execute(&[5.0, 5.0, 5.0]);
        assert_eq!(layer.output(), &[0.0, 0.0, 0.0]);
        assert_eq!(layer.scale(), 1.0);

        layer.fit(&[5.0, 5.0, 5.0], Signal::Target(&[1.0, 0.0, -1.0]));
        assert_eq!(layer.gradient(), &[-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_effect_scale_resets_each_execute() {
        let mut layer: EffectLayer<2, false, true, false, Mse> = EffectLayer::new();
        layer.execute(&[0.0, 4.0]);
        assert_eq!(layer.scale(), 0.5);
        layer.execute(&[1.0, 1.0]);
        assert_eq!(layer.scale(), 1.0);
        assert_eq!(layer.output(), &[1.0, 1.0]);
    }

    #[test]
    fn test_describe_names_policies() {
        let filter: FilterLayer<2, Relu, Mae> = FilterLayer::new();
        assert_eq!(filter.describe(), "filter<2> relu mae");
        let effect: EffectLayer<8, true, false, true, Mse> = EffectLayer::new();
        assert_eq!(effect.describe(), "effect<8> [zeromean,normalize] mse");
    }
}
