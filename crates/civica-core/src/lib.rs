//! Civica Core — shared error taxonomy and result alias.
//!
//! This crate provides the foundational error type used across all Civica
//! crates. It has no internal Civica dependencies (dependency level 0).
//!
//! # Modules
//!
//! - [`error`]: Error types and Result alias

pub mod error;

// Re-export key types at crate root for convenience
pub use error::{Error, Result};
