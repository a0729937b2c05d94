//! Neural Stacks Library
//!
//! Fixed-shape CPU neural network layers chained into networks. Every layer
//! size is a const generic parameter, and activation, optimizer and error
//! metric are chosen as type parameters, so a layer only carries the buffers
//! its configuration needs.
//!
//! # Modules
//!
//! - `layers`: Layer trait and implementations (Dense, Conv2, Local2, pooling, etc.)
//! - `network`: Chains of layers or sub-networks
//! - `optimizers`: Parameter update policies (SGD, Momentum, Adam)
//! - `utils`: Activations, error metrics, RNG and learning rate schedulers
//! - `persist`: Binary parameter format
//! - `config`: Training configuration structures
//! - `training`: Epoch-driven training loop
//! - `parallel`: Data-parallel replicas

pub mod config;
pub mod error;
pub mod layers;
pub mod network;
pub mod optimizers;
pub mod parallel;
pub mod persist;
pub mod training;
pub mod utils;

pub use error::{Error, Result};
pub use network::{Composition, Network, NetworkInfo};
