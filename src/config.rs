//! Configuration structures for training
//!
//! This module provides the JSON-backed [`TrainingConfig`] consumed by
//! [`Trainer`](crate::training::Trainer) and [`ReplicaSet`](crate::parallel::ReplicaSet).

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::layers::Init;
use crate::utils::lr_scheduler::{
    Constant, CosineAnnealing, ExponentialDecay, LRScheduler, StepDecay,
};

/// Scheduler names accepted in `scheduler_type`.
pub const SCHEDULER_TYPES: [&str; 4] = ["constant", "step_decay", "exponential", "cosine_annealing"];

/// Configuration for training, including learning rate scheduling.
///
/// Only `scheduler_type` is required. Each scheduler reads its own fields:
///
/// - **constant**: none
/// - **step_decay**: `step_size` and `gamma`
/// - **exponential**: `decay_rate`
/// - **cosine_annealing**: `min_lr` and `T_max`
///
/// # Example
///
/// ```json
/// {
///   "learning_rate": 0.5,
///   "epochs": 2000,
///   "scheduler_type": "step_decay",
///   "step_size": 500,
///   "gamma": 0.5,
///   "init": { "scaled_uniform": "sigmoid" }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[allow(non_snake_case)]
pub struct TrainingConfig {
    /// Initial learning rate handed to the scheduler
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,

    #[serde(default = "default_epochs")]
    pub epochs: usize,

    /// Samples accumulated between two parameter updates
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seed for sample shuffling
    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default = "default_shuffle")]
    pub shuffle: bool,

    /// Type of learning rate scheduler, one of [`SCHEDULER_TYPES`]
    pub scheduler_type: String,

    /// Step size for StepDecay scheduler (epochs between LR reductions)
    pub step_size: Option<usize>,

    /// Multiplicative factor for StepDecay scheduler (LR multiplier)
    pub gamma: Option<f32>,

    /// Decay rate for ExponentialDecay scheduler (per-epoch multiplier)
    pub decay_rate: Option<f32>,

    /// Minimum learning rate for CosineAnnealing scheduler
    pub min_lr: Option<f32>,

    /// Total number of epochs for CosineAnnealing scheduler
    pub T_max: Option<usize>,

    /// Number of data-parallel replicas
    #[serde(default = "default_replicas")]
    pub replicas: usize,

    /// Weight initialization for layers built from this config
    pub init: Option<Init>,
}

fn default_learning_rate() -> f32 {
    0.5
}

fn default_epochs() -> usize {
    1000
}

fn default_batch_size() -> usize {
    1
}

fn default_seed() -> u64 {
    42
}

fn default_shuffle() -> bool {
    true
}

fn default_replicas() -> usize {
    1
}

impl TrainingConfig {
    /// Config with every default and the given scheduler.
    pub fn with_scheduler(scheduler_type: &str) -> Self {
        Self {
            learning_rate: default_learning_rate(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            seed: default_seed(),
            shuffle: default_shuffle(),
            scheduler_type: scheduler_type.to_string(),
            step_size: None,
            gamma: None,
            decay_rate: None,
            min_lr: None,
            T_max: None,
            replicas: default_replicas(),
            init: None,
        }
    }

    /// Parse and validate a config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrainingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(Error::Config("learning_rate must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.replicas == 0 {
            return Err(Error::Config("replicas must be at least 1".into()));
        }

        if !SCHEDULER_TYPES.contains(&self.scheduler_type.as_str()) {
            return Err(Error::Config(format!(
                "Invalid scheduler type '{}'. Must be one of: {}",
                self.scheduler_type,
                SCHEDULER_TYPES.join(", ")
            )));
        }

        for (name, value) in [
            ("gamma", self.gamma),
            ("decay_rate", self.decay_rate),
            ("min_lr", self.min_lr),
        ] {
            if matches!(value, Some(v) if v < 0.0) {
                return Err(Error::Config(format!("{} must be non-negative", name)));
            }
        }

        let missing = match self.scheduler_type.as_str() {
            "step_decay" if self.step_size.is_none() => Some("step_size"),
            "step_decay" if self.gamma.is_none() => Some("gamma"),
            "exponential" if self.decay_rate.is_none() => Some("decay_rate"),
            "cosine_annealing" if self.min_lr.is_none() => Some("min_lr"),
            "cosine_annealing" if self.T_max.is_none() => Some("T_max"),
            _ => None,
        };
        if let Some(field) = missing {
            return Err(Error::Config(format!(
                "{} scheduler requires '{}'",
                self.scheduler_type, field
            )));
        }

        Ok(())
    }

    /// Build the scheduler this config describes, starting at `learning_rate`.
    pub fn scheduler(&self) -> Box<dyn LRScheduler> {
        let lr = self.learning_rate;
        match self.scheduler_type.as_str() {
            "step_decay" => Box::new(StepDecay::new(
                lr,
                self.step_size.unwrap_or(1),
                self.gamma.unwrap_or(1.0),
            )),
            "exponential" => Box::new(ExponentialDecay::new(lr, self.decay_rate.unwrap_or(1.0))),
            "cosine_annealing" => Box::new(CosineAnnealing::new(
                lr,
                self.min_lr.unwrap_or(0.0),
                self.T_max.unwrap_or(self.epochs),
            )),
            _ => Box::new(Constant::new(lr)),
        }
    }
}

/// Loads a training configuration from a JSON file.
///
/// Reads the file at `path`, deserializes it and validates the result.
///
/// # Examples
///
/// ```no_run
/// use neural_stacks::config::load_config;
///
/// let cfg = load_config("config/xor_step.json").unwrap();
/// assert_eq!(cfg.scheduler_type, "step_decay");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<TrainingConfig> {
    let contents = fs::read_to_string(path)?;
    TrainingConfig::from_json(&contents)
}
