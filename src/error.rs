//! Error type shared by every module of the crate.

use thiserror::Error;

/// Errors raised while setting up or running a training session.
///
/// Nothing here is retried: configuration problems stop the run before the
/// first step, numeric and integrity problems stop it where they happen.
#[derive(Error, Debug)]
pub enum Error {
    #[error("only continuous (box) action spaces are supported, got {0}")]
    UnsupportedActionSpace(String),

    #[error("invalid action bounds: {0}")]
    InvalidBounds(String),

    #[error("unknown environment id `{0}`")]
    UnknownEnvironment(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("replay buffer is empty")]
    EmptyReplay,

    #[error("batch must not be empty")]
    EmptyBatch,

    #[error("{what} has length {actual}, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("parameter `{name}` has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("non-finite {what} at step {step}")]
    NonFinite { what: &'static str, step: usize },

    #[error("tensor data error: {0}")]
    TensorData(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
