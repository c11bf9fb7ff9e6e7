//! Error types for Engram core operations.
//!
//! Library errors use `thiserror`; the CLI wraps them with `anyhow`.
//! Backend-specific failures never leak past this taxonomy: the journal
//! collector and the document store both map into these kinds so callers
//! can pick a recovery action without knowing which backend is in play.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using EngramError
pub type Result<T> = std::result::Result<T, EngramError>;

/// Core error taxonomy.
///
/// Classification drives recovery: `is_transient` errors are retried with
/// bounded backoff, `is_fatal` errors disable the affected component until
/// restart, and everything else is isolated per record.
#[derive(Error, Debug)]
pub enum EngramError {
    /// The caller lacks the privilege needed for journal access.
    /// Fatal for the affected volume task; requires operator action.
    #[error("access denied: {operation} (try running as administrator)")]
    AccessDenied { operation: String },

    /// No change journal exists on the volume.
    #[error("no change journal on volume {volume}")]
    JournalAbsent { volume: String },

    /// The cursor fell behind the journal's lowest valid USN.
    #[error("journal truncated on volume {volume}: cursor {cursor} < lowest valid {lowest_valid}")]
    JournalTruncated {
        volume: String,
        cursor: i64,
        lowest_valid: i64,
    },

    /// The journal rejected the requested read position (invalid
    /// parameter / end of file); the reader re-queries and clamps.
    #[error("journal read out of range on volume {volume}: {reason}")]
    JournalReadOutOfRange { volume: String, reason: String },

    /// A record could not be decoded; the reader advances past it.
    #[error("parse error at offset {offset}: {reason}")]
    Parse { offset: usize, reason: String },

    /// Transient backend failure (network, contention); retried.
    #[error("transient backend error: {0}")]
    BackendTransient(String),

    /// Non-recoverable backend failure (schema, auth).
    #[error("fatal backend error: {0}")]
    BackendFatal(String),

    /// Cooperative cancellation; propagates unchanged through all layers.
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration file parsing or validation failed.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EngramError {
    /// True if retrying the single operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngramError::BackendTransient(_))
    }

    /// True if the component must stop writing until restart.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngramError::AccessDenied { .. } | EngramError::BackendFatal(_)
        )
    }

    /// True if the reader should re-query journal metadata and clamp.
    pub fn requires_requery(&self) -> bool {
        matches!(
            self,
            EngramError::JournalTruncated { .. }
                | EngramError::JournalAbsent { .. }
                | EngramError::JournalReadOutOfRange { .. }
        )
    }

    /// Create a serialization error
    pub fn serialization(reason: impl Into<String>) -> Self {
        EngramError::Serialization(reason.into())
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        EngramError::Config {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for EngramError {
    fn from(err: serde_json::Error) -> Self {
        EngramError::Serialization(err.to_string())
    }
}

/// Maximum retry attempts for transient backend failures.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between retries.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Run `op`, retrying transient failures with exponential backoff.
///
/// Non-transient errors are returned immediately. After
/// [`MAX_RETRY_ATTEMPTS`] transient failures, the last error is returned
/// and the single operation fails; callers do not abort the batch.
pub fn with_retry<T>(op: impl Fn() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < MAX_RETRY_ATTEMPTS => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                tracing::debug!(attempt, error = %err, "Retrying transient backend error");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
