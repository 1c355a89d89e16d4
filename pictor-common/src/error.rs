//! Error type shared by the Pictor services
//!
//! Covers the infrastructure failures the shared layer can produce:
//! catalog access, filesystem access, and configuration resolution.
//! Service-specific errors (HTTP status mapping, pipeline failures) live
//! in each service's own error type and wrap this one.

use thiserror::Error;

/// Result alias for shared-layer operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Catalog read or write failed
    #[error("catalog error: {0}")]
    Database(#[from] sqlx::Error),

    /// Storage tree or scratch filesystem access failed
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage root or config file could not be resolved
    #[error("configuration error: {0}")]
    Config(String),
}
