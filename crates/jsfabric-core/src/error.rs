//! Error types for `jsfabric` core library.

use thiserror::Error;

/// Result type alias using `jsfabric` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `jsfabric` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
