//! Shared utilities for layer implementations
//!
//! Transfer functions, error metrics, the random number collaborator used for
//! parameter initialization, and learning rate schedules.

pub mod activations;
pub mod loss;
pub mod lr_scheduler;
pub mod rng;

pub use activations::{Activation, Elu, LeakyRelu, Linear, Relu, Sigmoid, Tanh};
pub use loss::{CrossEntropy, ErrorFn, Mae, Mse};
pub use rng::{FillRandom, SimpleRng};
