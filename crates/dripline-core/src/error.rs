// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Dripline scheduler.

use thiserror::Error;

/// The primary error type used across Dripline crates.
#[derive(Debug, Error)]
pub enum DriplineError {
    /// Configuration errors (invalid TOML, missing required fields, bad ranges).
    #[error("configuration error: {0}")]
    Config(String),

    /// Datastore errors (connection, query failure, constraint violation).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Device directory errors (status lookup failed).
    #[error("device error: {message}")]
    Device {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A value violated a domain rule before reaching the datastore.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DriplineError {
    /// Wrap any error as a storage error.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            source: Box::new(err),
        }
    }
}

/// Outcome of a failed delivery attempt reported by a [`Sender`](crate::Sender).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The message can never be delivered (invalid number, content rejected).
    #[error("permanent send failure: {0}")]
    Permanent(String),

    /// The device or network is temporarily unavailable; retry later.
    #[error("transient send failure: {0}")]
    Transient(String),
}

impl SendError {
    /// Returns the human-readable reason without the classification prefix.
    pub fn reason(&self) -> &str {
        match self {
            Self::Permanent(reason) | Self::Transient(reason) => reason,
        }
    }
}
