//! Tests for the dense layer protocol
//!
//! This file covers:
//! - Forward values for known weights
//! - Delta accumulation across several fits and reset
//! - Parameter updates with each optimizer policy
//! - Finite-difference agreement of weight deltas and input gradients

use approx::assert_abs_diff_eq;
use neural_stacks::layers::{DenseLayer, Init, Layer, Scaling, Signal};
use neural_stacks::optimizers::{Momentum, Sgd};
use neural_stacks::utils::{Linear, Mse, SimpleRng, Tanh};

type Unit = DenseLayer<1, 1, Linear, Sgd, Mse>;

// ============================================================================
// Single Weight Scenario
// ============================================================================

mod single_weight_tests {
    use super::*;

    fn unit() -> Unit {
        Unit::from_parts(vec![2.0], vec![1.0]).unwrap()
    }

    #[test]
    fn test_forward_value() {
        let mut layer = unit();
        layer.execute(&[3.0]);
        assert_eq!(layer.output(), &[7.0]);
    }

    #[test]
    fn test_fit_against_target() {
        let mut layer = unit();
        layer.execute(&[3.0]);
        layer.reset();
        layer.fit(&[3.0], Signal::Target(&[5.0]));

        // delta = out - target = 2
        assert_eq!(layer.weights().deltas(), &[6.0]);
        assert_eq!(layer.biases().deltas(), &[2.0]);
        assert_eq!(layer.gradient(), &[4.0]);
    }

    #[test]
    fn test_apply_sgd() {
        let mut layer = unit();
        layer.execute(&[3.0]);
        layer.reset();
        layer.fit(&[3.0], Signal::Target(&[5.0]));
        layer.apply(0.1);

        assert_abs_diff_eq!(layer.weights().values()[0], 1.4, epsilon = 1e-6);
        assert_abs_diff_eq!(layer.biases().values()[0], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_apply_without_fit_keeps_parameters() {
        let mut layer = unit();
        layer.reset();
        layer.apply(0.5);
        assert_eq!(layer.weights().values(), &[2.0]);
        assert_eq!(layer.biases().values(), &[1.0]);
    }

    #[test]
    fn test_error_is_mean_square() {
        let mut layer = unit();
        layer.execute(&[3.0]);
        assert_abs_diff_eq!(layer.error(&[5.0]), 4.0, epsilon = 1e-6);
    }
}

// ============================================================================
// Accumulation Tests
// ============================================================================

mod accumulation_tests {
    use super::*;

    #[test]
    fn test_batch_deltas_are_summed() {
        let mut layer = Unit::from_parts(vec![1.0], vec![0.0]).unwrap();
        layer.reset();
        for (x, t) in [(1.0, 0.0), (2.0, 0.0), (3.0, 0.0)] {
            layer.execute(&[x]);
            layer.fit(&[x], Signal::Target(&[t]));
        }
        // Σ x * (x - 0) = 1 + 4 + 9
        assert_eq!(layer.weights().deltas(), &[14.0]);
        assert_eq!(layer.biases().deltas(), &[6.0]);
    }

    #[test]
    fn test_momentum_state_survives_reset() {
        let mut layer: DenseLayer<1, 1, Linear, Momentum, Mse> =
            DenseLayer::from_parts(vec![1.0], vec![0.0]).unwrap();
        layer.execute(&[1.0]);
        layer.reset();
        layer.fit(&[1.0], Signal::Target(&[0.0]));
        layer.apply(1.0);

        let momentum = layer.weights().momentum().unwrap().to_vec();
        assert_abs_diff_eq!(momentum[0], 0.1, epsilon = 1e-6);

        layer.reset();
        assert_eq!(layer.weights().momentum().unwrap(), momentum.as_slice());
        assert_eq!(layer.weights().deltas(), &[0.0]);
    }
}

// ============================================================================
// Gradient Checking Tests
// ============================================================================

mod gradient_checking_tests {
    use super::*;

    type Hidden = DenseLayer<3, 2, Tanh, Sgd, Mse>;

    const EPSILON: f32 = 1e-2;

    // Half sum of squares, whose derivative is `out - target`.
    fn loss(layer: &mut Hidden, input: &[f32], target: &[f32]) -> f32 {
        layer.execute(input);
        layer
            .output()
            .iter()
            .zip(target)
            .map(|(o, t)| 0.5 * (o - t) * (o - t))
            .sum()
    }

    fn layer() -> Hidden {
        let mut rng = SimpleRng::new(42);
        Hidden::new(Init::ScaledUniform(Scaling::Tanh), &mut rng)
    }

    #[test]
    fn test_weight_deltas_match_finite_differences() {
        let input = [0.3, -0.7, 0.5];
        let target = [0.2, -0.4];
        let mut layer = layer();

        layer.execute(&input);
        layer.reset();
        layer.fit(&input, Signal::Target(&target));
        let analytic = layer.weights().deltas().to_vec();

        for (i, &expected) in analytic.iter().enumerate() {
            let original = layer.weights().values()[i];
            layer.weights_mut().values_mut()[i] = original + EPSILON;
            let plus = loss(&mut layer, &input, &target);
            layer.weights_mut().values_mut()[i] = original - EPSILON;
            let minus = loss(&mut layer, &input, &target);
            layer.weights_mut().values_mut()[i] = original;

            let numeric = (plus - minus) / (2.0 * EPSILON);
            assert_abs_diff_eq!(expected, numeric, epsilon = 2e-3);
        }
    }

    #[test]
    fn test_input_gradient_matches_finite_differences() {
        let input = [0.3, -0.7, 0.5];
        let target = [0.2, -0.4];
        let mut layer = layer();

        layer.execute(&input);
        layer.fit(&input, Signal::Target(&target));
        let analytic = layer.gradient().to_vec();

        for i in 0..input.len() {
            let mut shifted = input;
            shifted[i] += EPSILON;
            let plus = loss(&mut layer, &shifted, &target);
            shifted[i] -= 2.0 * EPSILON;
            let minus = loss(&mut layer, &shifted, &target);

            let numeric = (plus - minus) / (2.0 * EPSILON);
            assert_abs_diff_eq!(analytic[i], numeric, epsilon = 2e-3);
        }
    }
}
