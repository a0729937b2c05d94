//! Error types for chain construction, persistence and configuration.
//!
//! Shape problems inside a layer (kernel larger than the image) are caught at
//! compile time; everything that can only be known at run time surfaces here.

use crate::layers::LayerKind;

/// Errors raised by networks, layers and their persistence.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("shape mismatch at link {at}: expected {expected} values, got {got}")]
    ShapeMismatch {
        at: usize,
        expected: usize,
        got: usize,
    },

    #[error("network holds {mode}, cannot attach {attempted}")]
    WrongComposition {
        mode: &'static str,
        attempted: &'static str,
    },

    #[error("network has no components")]
    EmptyNetwork,

    #[error("input has {got} values, expected {expected}")]
    InputSize { expected: usize, got: usize },

    #[error("target has {got} values, expected {expected}")]
    TargetSize { expected: usize, got: usize },

    #[error("{component}: {field} mismatch on load (expected {expected:#x}, got {got:#x})")]
    LoadMismatch {
        component: &'static str,
        field: &'static str,
        expected: u64,
        got: u64,
    },

    #[error("cannot exchange parameters between {this:?} and {master:?}")]
    ExchangeMismatch { this: LayerKind, master: LayerKind },

    #[error("networks differ in structure: expected {expected} components, got {got}")]
    TopologyMismatch { expected: usize, got: usize },

    #[error("{optimizer} update requires a {buffer} buffer")]
    MissingOptimizerState {
        optimizer: &'static str,
        buffer: &'static str,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
