//! Error types for Stratus
//!
//! One taxonomy covering the object-store port, the upload pipeline,
//! the wire protocol and the runtime.

use thiserror::Error;

/// Primary error type for all Stratus operations
#[derive(Debug, Error)]
pub enum StratusError {
    // ========== Storage Errors ==========

    /// Object store operation failed
    #[error("Storage operation failed: {message}")]
    StorageError { message: String },

    /// Object not found in storage
    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    // ========== Upload Errors ==========

    /// create-multipart-upload failed, the session never started streaming
    #[error("Failed to initialize multipart upload for {key}: {reason}")]
    StoreInit { key: String, reason: String },

    /// A single part failed to upload
    #[error("Part {part_number} upload failed: {reason}")]
    PartUpload { part_number: u32, reason: String },

    /// The ingestion stream ended before the last-chunk marker
    #[error("Stream closed without last chunk after {parts_dispatched} parts")]
    IncompleteStream { parts_dispatched: u32 },

    /// Part registry is not 1..K at finalize time
    #[error("Part registry not contiguous: expected parts 1..={expected}, found {found:?}")]
    ContiguityViolation { expected: u32, found: Vec<u32> },

    /// complete-multipart-upload failed after every part succeeded
    #[error("Failed to complete multipart upload for {key}: {reason}")]
    Finalize { key: String, reason: String },

    /// Operation not valid in the session's current state
    #[error("Upload session for {key} is {state}")]
    SessionClosed { key: String, state: String },

    // ========== Protocol Errors ==========

    /// Invalid message format
    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    // ========== Configuration Errors ==========

    /// Configuration rejected by validation or parsing
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // ========== Runtime Errors ==========

    /// Shutdown in progress
    #[error("Shutdown in progress")]
    ShutdownInProgress,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StratusError {
    /// Shorthand for a storage failure with a formatted message
    pub fn storage(message: impl Into<String>) -> Self {
        StratusError::StorageError {
            message: message.into(),
        }
    }

    /// Returns true if this error is retryable by a caller
    ///
    /// The upload engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StratusError::StorageError { .. }
                | StratusError::StoreInit { .. }
                | StratusError::PartUpload { .. }
                | StratusError::Finalize { .. }
        )
    }

    /// Returns true if the error was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StratusError::ObjectNotFound { .. }
                | StratusError::InvalidMessage { .. }
                | StratusError::IncompleteStream { .. }
        )
    }
}

/// Result type alias for Stratus operations
pub type Result<T> = std::result::Result<T, StratusError>;
