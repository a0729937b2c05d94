//! Epoch-driven training loop
//!
//! [`Trainer`] runs the reset / exe+fit / apply cycle over shuffled
//! mini-batches and reports the per-epoch error spread as a
//! [`NetworkInfo`] ready to be stored with the parameters.

use std::time::Instant;

use log::{debug, info};

use crate::config::TrainingConfig;
use crate::error::{Error, Result};
use crate::network::{Network, NetworkInfo};
use crate::utils::lr_scheduler::LRScheduler;
use crate::utils::SimpleRng;

/// An input vector and its target.
pub type Sample = (Vec<f32>, Vec<f32>);

/// Epochs between two `info` progress lines.
const LOG_INTERVAL: usize = 1000;

/// Running min / max / sum of per-sample errors.
#[derive(Debug, Clone, Copy)]
pub struct ErrorStats {
    pub min: f32,
    pub max: f32,
    pub sum: f64,
    pub count: usize,
}

impl Default for ErrorStats {
    fn default() -> Self {
        Self {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        }
    }
}

impl ErrorStats {
    pub fn record(&mut self, err: f32) {
        self.min = self.min.min(err);
        self.max = self.max.max(err);
        self.sum += err as f64;
        self.count += 1;
    }

    pub fn merge(&mut self, other: &ErrorStats) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.count += other.count;
    }

    pub fn mean(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum / self.count as f64) as f32
        }
    }
}

/// Drives a [`Network`] through a configured number of epochs.
pub struct Trainer {
    config: TrainingConfig,
    scheduler: Box<dyn LRScheduler>,
    rng: SimpleRng,
    iteration: u64,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scheduler: config.scheduler(),
            rng: SimpleRng::new(config.seed),
            iteration: 0,
            config,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Rate the next update will use.
    pub fn learning_rate(&self) -> f32 {
        self.scheduler.get_lr()
    }

    /// Updates applied so far.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// One mini-batch: reset, exe+fit per sample, then a single apply.
    ///
    /// Returns the mean error of the batch, measured before the update.
    pub fn train_step(&mut self, network: &mut Network, batch: &[Sample]) -> Result<f32> {
        let mut stats = ErrorStats::default();
        self.run_batch(network, batch.iter(), &mut stats)?;
        Ok(stats.mean())
    }

    fn run_batch<'a>(
        &mut self,
        network: &mut Network,
        batch: impl Iterator<Item = &'a Sample>,
        stats: &mut ErrorStats,
    ) -> Result<()> {
        network.reset();
        for (input, target) in batch {
            network.exe(input)?;
            stats.record(network.err(target)?);
            network.fit(target)?;
        }
        network.apply(self.scheduler.get_lr(), self.iteration);
        self.iteration += 1;
        Ok(())
    }

    /// Train for `config.epochs` epochs over `samples`.
    ///
    /// The scheduler steps once per epoch. The returned info holds the error
    /// spread of the final epoch.
    pub fn train(&mut self, network: &mut Network, samples: &[Sample]) -> Result<NetworkInfo> {
        if samples.is_empty() {
            return Err(Error::Config("no training samples".into()));
        }
        network.connect()?;
        info!(
            "training {} on {} samples for {} epochs",
            network.describe(),
            samples.len(),
            self.config.epochs
        );

        let start = Instant::now();
        let mut order: Vec<usize> = (0..samples.len()).collect();
        let mut info = NetworkInfo {
            unique_samples: samples.len() as u64,
            ..NetworkInfo::default()
        };

        for epoch in 0..self.config.epochs {
            if self.config.shuffle {
                self.rng.shuffle(&mut order);
            }

            let lr = self.scheduler.get_lr();
            let mut stats = ErrorStats::default();
            for chunk in order.chunks(self.config.batch_size) {
                self.run_batch(network, chunk.iter().map(|&i| &samples[i]), &mut stats)?;
            }

            if (epoch + 1) % LOG_INTERVAL == 0 || epoch + 1 == self.config.epochs {
                info!(
                    "Epoch {}, Error: {:.6} (min {:.6}, max {:.6}, lr {:.6})",
                    epoch + 1,
                    stats.mean(),
                    stats.min,
                    stats.max,
                    lr
                );
            } else {
                debug!("Epoch {}, Error: {:.6}", epoch + 1, stats.mean());
            }

            self.scheduler.step();
            info.epochs += 1;
            info.err_min = stats.min as f64;
            info.err_max = stats.max as f64;
            info.err_avg = stats.mean() as f64;
        }

        info.train_time_secs = start.elapsed().as_secs();
        Ok(info)
    }

    /// Mean error over `samples` without touching any parameter.
    pub fn evaluate(&self, network: &mut Network, samples: &[Sample]) -> Result<f32> {
        let mut stats = ErrorStats::default();
        for (input, target) in samples {
            network.exe(input)?;
            stats.record(network.err(target)?);
        }
        Ok(stats.mean())
    }
}
