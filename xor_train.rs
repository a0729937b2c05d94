use std::env;
use std::time::Instant;

use neural_stacks::config::{load_config, TrainingConfig};
use neural_stacks::layers::DenseLayer;
use neural_stacks::network::{Composition, Network, NetworkInfo};
use neural_stacks::optimizers::Sgd;
use neural_stacks::parallel::ReplicaSet;
use neural_stacks::training::{ErrorStats, Sample, Trainer};
use neural_stacks::utils::lr_scheduler::LRScheduler;
use neural_stacks::utils::{Mse, Sigmoid, SimpleRng, Tanh};
use neural_stacks::Result;

// Small network to learn XOR.
const NUM_INPUTS: usize = 2;
const NUM_HIDDEN: usize = 4;
const NUM_OUTPUTS: usize = 1;

const DEFAULT_CONFIG: &str = "config/xor_step.json";
const OUTPUT_FILE: &str = "xor.nsn";

type Hidden = DenseLayer<NUM_INPUTS, NUM_HIDDEN, Tanh, Sgd, Mse>;
type Output = DenseLayer<NUM_HIDDEN, NUM_OUTPUTS, Sigmoid, Sgd, Mse>;

fn xor_samples() -> Vec<Sample> {
    vec![
        (vec![0.0, 0.0], vec![0.0]),
        (vec![0.0, 1.0], vec![1.0]),
        (vec![1.0, 0.0], vec![1.0]),
        (vec![1.0, 1.0], vec![0.0]),
    ]
}

// Hidden tanh layer feeding a single sigmoid output.
fn build_network(config: &TrainingConfig, rng: &mut SimpleRng) -> Result<Network> {
    let init = config.init.unwrap_or_default();
    let mut net = Network::new(Composition::Layers);
    net.attach(Hidden::new(init, rng))?;
    net.attach(Output::new(init, rng))?;
    net.connect()?;
    Ok(net)
}

// Replicas split each batch and merge into the master after every batch.
fn train_replicated(config: &TrainingConfig, samples: &[Sample]) -> Result<(Network, NetworkInfo)> {
    let mut rng = SimpleRng::new(config.seed);
    let mut set = ReplicaSet::from_factory(config.replicas, || build_network(config, &mut rng))?;
    let mut scheduler = config.scheduler();
    let mut order = samples.to_vec();
    let mut info = NetworkInfo {
        unique_samples: samples.len() as u64,
        ..NetworkInfo::default()
    };
    let start = Instant::now();

    for epoch in 0..config.epochs {
        if config.shuffle {
            rng.shuffle(&mut order);
        }
        let lr = scheduler.get_lr();
        let mut stats = ErrorStats::default();
        for batch in order.chunks(config.batch_size.max(1)) {
            stats.merge(&set.train_batch_stats(batch, lr)?);
        }
        if (epoch + 1) % 1000 == 0 {
            println!("Epoch {}, Error: {:.6}", epoch + 1, stats.mean());
        }
        scheduler.step();

        info.epochs += 1;
        info.err_min = stats.min as f64;
        info.err_max = stats.max as f64;
        info.err_avg = stats.mean() as f64;
    }

    info.train_time_secs = start.elapsed().as_secs();
    Ok((set.into_master(), info))
}

fn test(net: &mut Network, samples: &[Sample]) -> Result<()> {
    println!("\nTesting the trained network:");
    for (input, target) in samples {
        net.exe(input)?;
        println!(
            "Input: {:.1}, {:.1}, Expected Output: {:.1}, Predicted Output: {:.3}",
            input[0],
            input[1],
            target[0],
            net.out()[0]
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = load_config(&path)?;
    let samples = xor_samples();

    println!(
        "Training XOR for {} epochs ({} schedule, {} replica(s))",
        config.epochs, config.scheduler_type, config.replicas
    );

    let (mut net, info) = if config.replicas > 1 {
        train_replicated(&config, &samples)?
    } else {
        let mut rng = SimpleRng::new(config.seed);
        let mut net = build_network(&config, &mut rng)?;
        let mut trainer = Trainer::new(config.clone())?;
        let info = trainer.train(&mut net, &samples)?;
        (net, info)
    };

    println!(
        "Finished after {} epochs in {}s, final error {:.6}",
        info.epochs, info.train_time_secs, info.err_avg
    );
    net.store_with_info(OUTPUT_FILE, &info)?;
    println!("Saved parameters to {}", OUTPUT_FILE);

    test(&mut net, &samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_network_sizes() {
        let config = TrainingConfig::with_scheduler("constant");
        let mut rng = SimpleRng::new(42);
        let net = build_network(&config, &mut rng).unwrap();

        assert_eq!(net.input_size(), NUM_INPUTS);
        assert_eq!(net.output_size(), NUM_OUTPUTS);
        assert_eq!(
            net.parameter_count(),
            NUM_INPUTS * NUM_HIDDEN + NUM_HIDDEN + NUM_HIDDEN * NUM_OUTPUTS + NUM_OUTPUTS
        );
    }

    #[test]
    fn test_replicated_training_runs() {
        let mut config = TrainingConfig::with_scheduler("constant");
        config.epochs = 5;
        config.replicas = 2;
        let (mut net, info) = train_replicated(&config, &xor_samples()).unwrap();
        net.exe(&[1.0, 0.0]).unwrap();
        assert!(net.out()[0] > 0.0 && net.out()[0] < 1.0);

        assert_eq!(info.epochs, 5);
        assert_eq!(info.unique_samples, 4);
        assert!(info.err_min <= info.err_avg && info.err_avg <= info.err_max);
    }

    #[test]
    fn test_replicated_info_round_trips() {
        let mut config = TrainingConfig::with_scheduler("constant");
        config.epochs = 3;
        config.replicas = 2;
        config.batch_size = 1;
        let (mut net, info) = train_replicated(&config, &xor_samples()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xor.nsn");
        net.store_with_info(&path, &info).unwrap();

        let mut reloaded = build_network(&config, &mut SimpleRng::new(99)).unwrap();
        let loaded = reloaded.load_with_info(&path).unwrap();
        assert_eq!(loaded.epochs, 3);
        assert_eq!(loaded.unique_samples, 4);
    }

    #[test]
    fn test_batch_size_and_shuffle_change_training() {
        let mut config = TrainingConfig::with_scheduler("constant");
        config.epochs = 4;
        config.replicas = 2;
        config.shuffle = false;
        config.batch_size = 4;
        let (mut whole, _) = train_replicated(&config, &xor_samples()).unwrap();

        config.batch_size = 1;
        let (mut single, _) = train_replicated(&config, &xor_samples()).unwrap();

        whole.exe(&[0.0, 1.0]).unwrap();
        single.exe(&[0.0, 1.0]).unwrap();
        assert_ne!(whole.out()[0], single.out()[0]);
    }
}
