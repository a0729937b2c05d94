//! End-to-end training tests
//!
//! This file trains small dense networks on XOR:
//! - By hand through the reset / exe / fit / apply cycle
//! - Through the Trainer driven by a JSON config
//! - Saving the result with its training info

use neural_stacks::config::{load_config, TrainingConfig};
use neural_stacks::layers::{DenseLayer, Init};
use neural_stacks::network::{Composition, Network};
use neural_stacks::optimizers::Sgd;
use neural_stacks::training::{Sample, Trainer};
use neural_stacks::utils::{Mse, Sigmoid, SimpleRng, Tanh};

fn xor_samples() -> Vec<Sample> {
    vec![
        (vec![0.0, 0.0], vec![0.0]),
        (vec![0.0, 1.0], vec![1.0]),
        (vec![1.0, 0.0], vec![1.0]),
        (vec![1.0, 1.0], vec![0.0]),
    ]
}

fn sigmoid_net(seed: u64) -> Network {
    let mut rng = SimpleRng::new(seed);
    let init = Init::Uniform {
        low: -1.0,
        high: 1.0,
    };
    let mut net = Network::new(Composition::Layers);
    net.attach(DenseLayer::<2, 3, Sigmoid, Sgd, Mse>::new(init, &mut rng))
        .unwrap();
    net.attach(DenseLayer::<3, 1, Sigmoid, Sgd, Mse>::new(init, &mut rng))
        .unwrap();
    net
}

fn mean_error(net: &mut Network, samples: &[Sample]) -> f32 {
    let mut total = 0.0;
    for (input, target) in samples {
        net.exe(input).unwrap();
        total += net.err(target).unwrap();
    }
    total / samples.len() as f32
}

// ============================================================================
// Manual Loop Tests
// ============================================================================

mod manual_loop_tests {
    use super::*;

    #[test]
    fn test_xor_converges_with_manual_loop() {
        let samples = xor_samples();
        let mut net = sigmoid_net(12);
        let mut order = [0usize, 1, 2, 3];
        let mut shuffle = SimpleRng::new(42);
        let before = mean_error(&mut net, &samples);

        for epoch in 0..1000u64 {
            shuffle.shuffle(&mut order);
            for &i in &order {
                let (input, target) = &samples[i];
                net.reset();
                net.exe(input).unwrap();
                net.fit(target).unwrap();
                net.apply(2.0, epoch);
            }
        }

        let after = mean_error(&mut net, &samples);
        assert!(after < before);
        assert!(after < 0.05, "xor error {} after training", after);
    }
}

// ============================================================================
// Trainer Tests
// ============================================================================

mod trainer_tests {
    use super::*;

    #[test]
    fn test_trainer_matches_manual_schedule() {
        let mut config = TrainingConfig::with_scheduler("constant");
        config.learning_rate = 2.0;
        config.epochs = 1000;

        let samples = xor_samples();
        let mut net = sigmoid_net(12);
        let mut trainer = Trainer::new(config).unwrap();
        let info = trainer.train(&mut net, &samples).unwrap();

        assert_eq!(info.epochs, 1000);
        assert_eq!(info.unique_samples, 4);
        assert_eq!(trainer.iteration(), 4000);
        assert!(info.err_min <= info.err_avg && info.err_avg <= info.err_max);
        assert!(trainer.evaluate(&mut net, &samples).unwrap() < 0.05);
    }

    #[test]
    fn test_trainer_from_config_file() {
        let config = load_config("config/xor_step.json").unwrap();
        let init = config.init.unwrap_or_default();

        let mut rng = SimpleRng::new(3);
        let mut net = Network::new(Composition::Layers);
        net.attach(DenseLayer::<2, 4, Tanh, Sgd, Mse>::new(init, &mut rng))
            .unwrap();
        net.attach(DenseLayer::<4, 1, Sigmoid, Sgd, Mse>::new(init, &mut rng))
            .unwrap();

        let samples = xor_samples();
        let mut trainer = Trainer::new(config).unwrap();
        trainer.train(&mut net, &samples).unwrap();

        // Two decays of 0.5 after 5000 epochs
        assert!((trainer.learning_rate() - 0.125).abs() < 1e-6);
        for (input, target) in &samples {
            net.exe(input).unwrap();
            assert_eq!(net.out()[0].round(), target[0]);
        }
    }

    #[test]
    fn test_trained_network_survives_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xor.nsn");

        let mut config = TrainingConfig::with_scheduler("constant");
        config.learning_rate = 2.0;
        config.epochs = 200;
        let samples = xor_samples();
        let mut net = sigmoid_net(12);
        let info = Trainer::new(config).unwrap().train(&mut net, &samples).unwrap();
        net.store_with_info(&path, &info).unwrap();

        let mut restored = sigmoid_net(99);
        let loaded = restored.load_with_info(&path).unwrap();
        assert_eq!(loaded, info);
        assert_eq!(mean_error(&mut restored, &samples), mean_error(&mut net, &samples));
    }
}
