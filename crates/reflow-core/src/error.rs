//! Error types for Reflow
//!
//! `StoreError` is the unified error type for all Reflow APIs. We use
//! `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Error Classification
//!
//! - **Validation failures (`InvalidInput`)**: programmer error, raised
//!   synchronously before any effect. Fix the input, don't retry.
//! - **Incompatible updates (`IncompatibleUpdate`)**: shape mismatch between
//!   an incoming value and the existing one. Write operations log these and
//!   drop the update; the variant exists so the drop can be reported with
//!   structure.
//! - **Storage failures (`Storage`)**: the backing driver rejected an
//!   operation. The write pipeline evicts one cache key and retries once
//!   before surfacing this.
//! - **Internal (`Internal`)**: bug or invariant violation.

use crate::value::ValueKind;
use thiserror::Error;

/// Result type alias for Reflow operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for all Reflow operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Input validation failed
    ///
    /// The input parameters are invalid. This cannot be fixed by retrying -
    /// the input must be corrected.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of what's wrong with the input
        message: String,
    },

    /// Incompatible update dropped
    ///
    /// The incoming value's shape does not match the existing value's shape
    /// (array vs object). Write operations never return this; they log it
    /// and resolve. It is constructed so the drop can be reported uniformly.
    #[error("incompatible update for {key}: existing is {existing}, incoming is {incoming}")]
    IncompatibleUpdate {
        /// Key the update targeted
        key: String,
        /// Shape of the existing value
        existing: ValueKind,
        /// Shape of the incoming value
        incoming: ValueKind,
    },

    /// Storage driver failure
    #[error("storage error: {message}")]
    Storage {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Failed to serialize or deserialize a value
    #[error("serialization error: {message}")]
    Serialization {
        /// What went wrong
        message: String,
    },

    /// Bug or invariant violation
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl StoreError {
    /// Create an InvalidInput error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        StoreError::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an IncompatibleUpdate error
    pub fn incompatible_update(
        key: impl Into<String>,
        existing: ValueKind,
        incoming: ValueKind,
    ) -> Self {
        StoreError::IncompatibleUpdate {
            key: key.into(),
            existing,
            incoming,
        }
    }

    /// Create a Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        StoreError::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a Storage error with an underlying cause
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        StoreError::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        StoreError::Serialization {
            message: message.into(),
        }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        StoreError::Internal {
            message: message.into(),
        }
    }

    /// Check if this is a validation error
    ///
    /// Validation errors indicate bad input - don't retry, fix the input.
    pub fn is_validation_error(&self) -> bool {
        matches!(self, StoreError::InvalidInput { .. })
    }

    /// Check if this is a storage error
    pub fn is_storage_error(&self) -> bool {
        matches!(self, StoreError::Storage { .. })
    }

    /// Duplicate this error without its `source` chain
    ///
    /// The merge queue completes every waiter of a coalesced fold with the
    /// same outcome; the outcome is shared behind an `Arc`, and each waiter
    /// receives a detached copy produced here.
    pub fn duplicate(&self) -> StoreError {
        match self {
            StoreError::InvalidInput { message } => StoreError::invalid_input(message.clone()),
            StoreError::IncompatibleUpdate {
                key,
                existing,
                incoming,
            } => StoreError::incompatible_update(key.clone(), *existing, *incoming),
            StoreError::Storage { message, .. } => StoreError::storage(message.clone()),
            StoreError::Serialization { message } => StoreError::serialization(message.clone()),
            StoreError::Internal { message } => StoreError::internal(message.clone()),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::storage_with_source("I/O failure", e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::serialization(e.to_string())
    }
}
