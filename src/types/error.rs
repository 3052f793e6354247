//! Error types for the wallet ledger
//!
//! This module defines every error that can surface from the ledger core.
//!
//! # Error Categories
//!
//! - **Validation Errors**: malformed identities, amounts or reasons. These are
//!   raised synchronously, before any state is touched.
//! - **Policy Errors**: a debit rejected by a caller-level funds check.
//! - **Backend Errors**: the store is not ready or an I/O call failed. Inside the
//!   background flush and nickname tasks these are logged, never propagated.
//! - **Codec/Config Errors**: snapshot (de)serialization, file I/O, config parsing.

use super::balance::Balance;
use thiserror::Error;

/// Result alias used across the crate
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Main error type for the ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// An identity string or handle did not match the configured format
    #[error("Invalid identity '{input}': {reason}")]
    InvalidIdentity {
        /// The rejected input (or a description of the handle)
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// An amount could not be interpreted as an integer
    #[error("Non numeric input '{input}'")]
    NonNumericInput {
        /// The rejected input
        input: String,
    },

    /// A history reason exceeded the maximum length
    #[error("Reason too long: {length} characters (max {max})")]
    ReasonTooLong {
        /// Length of the rejected reason in characters
        length: usize,
        /// Maximum accepted length
        max: usize,
    },

    /// A transfer amount was zero or negative
    #[error("Amount must be positive, got {amount}")]
    NonPositiveAmount {
        /// The rejected amount
        amount: Balance,
    },

    /// A debit was rejected because the wallet lacks funds
    #[error("Insufficient funds for {identity}: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Identity of the debited wallet
        identity: String,
        /// Balance at the time of the check
        available: Balance,
        /// Requested debit
        requested: Balance,
    },

    /// The backend has not finished its bootstrap
    #[error("Store backend '{backend}' is not connected")]
    NotConnected {
        /// Backend name
        backend: String,
    },

    /// An I/O error reported by the store backend
    #[error("Store backend '{backend}' failed: {message}")]
    BackendFailure {
        /// Backend name
        backend: String,
        /// Description of the failure
        message: String,
    },

    /// Snapshot encoding or decoding failed
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the failure
        message: String,
    },

    /// File I/O outside of a backend (snapshot files, config files)
    #[error("I/O error: {message}")]
    Io {
        /// Description of the I/O error
        message: String,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },
}

impl From<std::io::Error> for LedgerError {
    fn from(error: std::io::Error) -> Self {
        LedgerError::Io {
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(error: serde_json::Error) -> Self {
        LedgerError::Serialization {
            message: error.to_string(),
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(error: sqlx::Error) -> Self {
        LedgerError::backend_failure("sqlite", error)
    }
}

impl From<sled::Error> for LedgerError {
    fn from(error: sled::Error) -> Self {
        LedgerError::backend_failure("sled", error)
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(error: toml::de::Error) -> Self {
        LedgerError::Config {
            message: error.to_string(),
        }
    }
}

// Helper functions for creating common errors

impl LedgerError {
    /// Create an InvalidIdentity error
    pub fn invalid_identity(input: &str, reason: impl Into<String>) -> Self {
        LedgerError::InvalidIdentity {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a NonNumericInput error
    pub fn non_numeric(input: impl Into<String>) -> Self {
        LedgerError::NonNumericInput {
            input: input.into(),
        }
    }

    /// Create a ReasonTooLong error
    pub fn reason_too_long(length: usize, max: usize) -> Self {
        LedgerError::ReasonTooLong { length, max }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(identity: &str, available: Balance, requested: Balance) -> Self {
        LedgerError::InsufficientFunds {
            identity: identity.to_string(),
            available,
            requested,
        }
    }

    /// Create a NotConnected error
    pub fn not_connected(backend: &str) -> Self {
        LedgerError::NotConnected {
            backend: backend.to_string(),
        }
    }

    /// Create a BackendFailure error from anything printable
    pub fn backend_failure(backend: &str, message: impl std::fmt::Display) -> Self {
        LedgerError::BackendFailure {
            backend: backend.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this error came from the storage layer
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            LedgerError::BackendFailure { .. } | LedgerError::NotConnected { .. }
        )
    }
}
