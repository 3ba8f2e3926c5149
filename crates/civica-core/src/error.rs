//! Error types for Civica operations.
//!
//! This module provides a common `Error` type and `Result<T>` alias used across
//! all Civica crates. Uses `thiserror` for derive macros.
//!
//! # Taxonomy
//!
//! The retrieval subsystem distinguishes three caller-visible classes:
//!
//! - [`Error::Config`] — fatal precondition failures (unsafe process
//!   topology, missing required native library, empty corpus at build time,
//!   bare query against a rerank-only backend). Never retried.
//! - [`Error::NotBuilt`] — index artifacts absent. Recoverable by running a
//!   build; callers surface this as "index not yet built".
//! - [`Error::Store`] — the relational store was unreachable or rejected an
//!   operation transiently. Callers may retry with backoff; this layer
//!   never retries internally.

use thiserror::Error;

/// Errors that can occur in Civica operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error with an associated path.
    #[error("I/O error at {path}: {source}")]
    IoPath {
        /// The path being accessed.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Configuration error — a fatal precondition failure.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The index has never been built (artifacts absent).
    #[error("Index not built: {0}")]
    NotBuilt(String),

    /// Transient relational-store failure; the caller may retry.
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid data or format.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Embedding or backend operation failure.
    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not-built error.
    pub fn not_built(msg: impl Into<String>) -> Self {
        Self::NotBuilt(msg.into())
    }

    /// Create a transient store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create an invalid data error.
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Create an operation error.
    pub fn operation(msg: impl Into<String>) -> Self {
        Self::Operation(msg.into())
    }

    /// Create an I/O error carrying the offending path.
    pub fn io_with_path(source: std::io::Error, path: impl AsRef<std::path::Path>) -> Self {
        Self::IoPath {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Whether this error is a fatal configuration precondition failure.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Whether this error means the index has never been built.
    pub fn is_not_built(&self) -> bool {
        matches!(self, Self::NotBuilt(_))
    }

    /// Whether the caller may retry this error with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using Civica's Error type.
pub type Result<T> = std::result::Result<T, Error>;
