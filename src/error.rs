//! Error types for the memory engine.
//!
//! Cache misses are not errors (they surface as `None`), and per-backend
//! failures inside the fan-out are absorbed and logged. What remains here is
//! what a caller can actually act on.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Caller input was rejected (unknown thought type, confidence out of range, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// A single backend adapter failed. Only raised by adapters; the fan-out
    /// converts it into a `false` / missing response.
    #[error("backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn backend(backend: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    /// `true` for input validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
