//! Learning rate schedules
//!
//! The rate handed to [`Network::apply`](crate::network::Network::apply) can be
//! driven by a schedule that advances once per training epoch. Each schedule
//! is a closed-form function of the epoch counter, so any epoch can be queried
//! with [`LRScheduler::lr_at`] without stepping.

use std::f32::consts::PI;

/// Epoch-indexed learning rate.
///
/// Implementors provide the closed form and the epoch counter; stepping and
/// resetting come for free.
///
/// # Example
///
/// ```
/// use neural_stacks::utils::lr_scheduler::{LRScheduler, StepDecay};
///
/// let mut scheduler = StepDecay::new(0.1, 3, 0.5);
/// for _ in 0..3 {
///     scheduler.step();
/// }
/// assert!((scheduler.get_lr() - 0.05).abs() < 1e-7);
/// assert_eq!(scheduler.lr_at(6), scheduler.lr_at(3) * 0.5);
/// scheduler.reset();
/// assert_eq!(scheduler.get_lr(), 0.1);
/// ```
pub trait LRScheduler: Send {
    /// Rate for an arbitrary epoch. Epoch 0 is the initial rate.
    fn lr_at(&self, epoch: usize) -> f32;

    /// Epochs stepped so far.
    fn epoch(&self) -> usize;

    fn set_epoch(&mut self, epoch: usize);

    /// Rate for the current epoch.
    fn get_lr(&self) -> f32 {
        self.lr_at(self.epoch())
    }

    fn step(&mut self) {
        self.set_epoch(self.epoch() + 1);
    }

    fn reset(&mut self) {
        self.set_epoch(0);
    }
}

/// Fixed learning rate.
#[derive(Debug, Clone)]
pub struct Constant {
    lr: f32,
    epoch: usize,
}

impl Constant {
    pub fn new(lr: f32) -> Self {
        Self { lr, epoch: 0 }
    }
}

impl LRScheduler for Constant {
    fn lr_at(&self, _epoch: usize) -> f32 {
        self.lr
    }

    fn epoch(&self) -> usize {
        self.epoch
    }

    fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }
}

/// Multiply the rate by `gamma` every `step_size` epochs.
///
/// `lr = initial_lr * gamma^(epoch / step_size)` with integer division.
#[derive(Debug, Clone)]
pub struct StepDecay {
    initial_lr: f32,
    step_size: usize,
    gamma: f32,
    epoch: usize,
}

impl StepDecay {
    /// A `step_size` of 0 decays every epoch, like 1.
    pub fn new(initial_lr: f32, step_size: usize, gamma: f32) -> Self {
        Self {
            initial_lr,
            step_size: step_size.max(1),
            gamma,
            epoch: 0,
        }
    }
}

impl LRScheduler for StepDecay {
    fn lr_at(&self, epoch: usize) -> f32 {
        let decays = (epoch / self.step_size) as i32;
        self.initial_lr * self.gamma.powi(decays)
    }

    fn epoch(&self) -> usize {
        self.epoch
    }

    fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }
}

/// `lr = initial_lr * gamma^epoch`.
#[derive(Debug, Clone)]
pub struct ExponentialDecay {
    initial_lr: f32,
    gamma: f32,
    epoch: usize,
}

impl ExponentialDecay {
    pub fn new(initial_lr: f32, gamma: f32) -> Self {
        Self {
            initial_lr,
            gamma,
            epoch: 0,
        }
    }
}

impl LRScheduler for ExponentialDecay {
    fn lr_at(&self, epoch: usize) -> f32 {
        self.initial_lr * self.gamma.powi(epoch as i32)
    }

    fn epoch(&self) -> usize {
        self.epoch
    }

    fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }
}

/// Half-cosine from `initial_lr` down to `min_lr` over `t_max` epochs.
///
/// `lr = min_lr + (initial_lr - min_lr) * (1 + cos(pi * epoch / t_max)) / 2`
///
/// Past `t_max` the cosine keeps turning, so the rate climbs back towards
/// `initial_lr` and reaches it again at `2 * t_max`.
#[derive(Debug, Clone)]
pub struct CosineAnnealing {
    initial_lr: f32,
    min_lr: f32,
    t_max: usize,
    epoch: usize,
}

impl CosineAnnealing {
    /// A `t_max` of 0 is treated as 1.
    pub fn new(initial_lr: f32, min_lr: f32, t_max: usize) -> Self {
        Self {
            initial_lr,
            min_lr,
            t_max: t_max.max(1),
            epoch: 0,
        }
    }
}

impl LRScheduler for CosineAnnealing {
    fn lr_at(&self, epoch: usize) -> f32 {
        if epoch == 0 {
            return self.initial_lr;
        }
        let phase = PI * epoch as f32 / self.t_max as f32;
        self.min_lr + 0.5 * (self.initial_lr - self.min_lr) * (1.0 + phase.cos())
    }

    fn epoch(&self) -> usize {
        self.epoch
    }

    fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lr_at_does_not_advance() {
        let scheduler = ExponentialDecay::new(1.0, 0.5);
        assert_eq!(scheduler.lr_at(3), 0.125);
        assert_eq!(scheduler.epoch(), 0);
        assert_eq!(scheduler.get_lr(), 1.0);
    }

    #[test]
    fn test_set_epoch_jumps() {
        let mut scheduler = StepDecay::new(0.8, 10, 0.5);
        scheduler.set_epoch(25);
        assert_eq!(scheduler.get_lr(), 0.2);
        scheduler.step();
        assert_eq!(scheduler.epoch(), 26);
    }

    #[test]
    fn test_cosine_starts_exactly_at_initial() {
        let scheduler = CosineAnnealing::new(0.05, 0.001, 5);
        assert_eq!(scheduler.get_lr(), 0.05);
    }
}
