//! Error types for sagerec-core.

use thiserror::Error;

/// Error type for graph, sampling and loading operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A node or edge id is out of range, or an argument violates a
    /// structural constraint (e.g. an edge between two users).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A flow's layers and blocks reference each other inconsistently.
    #[error("malformed flow: {0}")]
    MalformedFlow(String),

    /// A data file contained a row that could not be interpreted.
    #[error("{file}:{line}: {message}")]
    Parse {
        /// File the row came from.
        file: String,
        /// 1-based line number.
        line: u64,
        /// What was wrong with the row.
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reader error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type for sagerec-core operations.
pub type Result<T> = std::result::Result<T, Error>;
