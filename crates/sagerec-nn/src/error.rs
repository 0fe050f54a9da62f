//! Error types for sagerec-nn.

use thiserror::Error;

/// Error type for encoding, scoring and training.
#[derive(Debug, Error)]
pub enum Error {
    /// Graph, sampling or batching error.
    #[error(transparent)]
    Core(#[from] sagerec_core::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
