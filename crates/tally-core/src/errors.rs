//! Cross-cutting error types for Tally.
//!
//! Domain-specific errors (`AuthError`, `FetchError`, `SinkError`) live in their
//! respective crates. `CoreError` covers failures that are detected before any
//! provider call is made.

use thiserror::Error;

/// Errors that can be raised while validating run inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An endpoint name is not part of the registry.
    #[error("unknown endpoint '{name}', valid endpoints are: {valid}")]
    UnknownEndpoint { name: String, valid: String },

    /// Configured tenant ids are not authorized for the current credential.
    #[error("tenant ids not authorized for this credential: {}", .0.join(", "))]
    UnknownTenants(Vec<String>),

    /// A policy string could not be parsed.
    #[error("invalid {field} '{value}'")]
    InvalidPolicy { field: &'static str, value: String },

    /// Data failed validation (selection, format, constraints).
    #[error("Validation error: {0}")]
    Validation(String),
}
