//! Edit management error types

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::EditState;

/// Opaque error produced by the remote publishing client
pub type RemoteError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for edit operations
pub type Result<T> = std::result::Result<T, EditError>;

/// Errors raised while coordinating edit transactions
#[derive(Debug, Error)]
pub enum EditError {
    /// Another live process holds the package lock
    #[error(
        "Edit lock for {package} is held by pid {pid} on {hostname} since {acquired_at} ({context}); \
         remove {} if that process is gone",
        .lock_path.display()
    )]
    LockConflict {
        package: String,
        pid: u32,
        hostname: String,
        acquired_at: DateTime<Utc>,
        context: String,
        lock_path: PathBuf,
    },

    /// Resumed edit is older than the configured maximum age
    #[error(
        "Edit {handle} for {package} expired: created {created_at}, max age {}s",
        .max_age.as_secs()
    )]
    EditExpired {
        package: String,
        handle: String,
        created_at: DateTime<Utc>,
        max_age: Duration,
    },

    /// Another live edit already exists for the package
    #[error(
        "Edit {live_handle} for {package} is still open; finish or delete it before opening {handle}"
    )]
    EditConflict {
        package: String,
        handle: String,
        live_handle: String,
    },

    /// No local record for the handle
    #[error("Edit {handle} for {package} not found")]
    EditNotFound { package: String, handle: String },

    /// Requested state change is not allowed
    #[error("Edit {handle} for {package} cannot move from {from} to {to}")]
    InvalidTransition {
        package: String,
        handle: String,
        from: EditState,
        to: EditState,
    },

    /// Local store read/write failure
    #[error("Storage error at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Local record exists but cannot be decoded
    #[error("Corrupt record at {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// File could not be read while hashing
    #[error("Failed to hash {}: {source}", .path.display())]
    Hash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The publishing client reported a failure
    #[error("Remote operation '{operation}' failed for {package}{}: {source}", fmt_handle(.handle))]
    Remote {
        package: String,
        handle: Option<String>,
        operation: &'static str,
        #[source]
        source: RemoteError,
    },

    /// Caller cancelled the operation
    #[error("Operation on {package}{} was cancelled", fmt_handle(.handle))]
    Cancelled {
        package: String,
        handle: Option<String>,
    },

    /// The operation failed and so did the cleanup that followed it
    #[error("{primary} (cleanup also failed: {cleanup})")]
    CleanupFailed {
        primary: Box<EditError>,
        cleanup: Box<EditError>,
    },
}

fn fmt_handle(handle: &Option<String>) -> String {
    handle
        .as_deref()
        .map(|h| format!(" (edit {})", h))
        .unwrap_or_default()
}

impl EditError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Wrap a publishing client failure
    pub fn remote(
        package: &str,
        handle: Option<&str>,
        operation: &'static str,
        source: RemoteError,
    ) -> Self {
        Self::Remote {
            package: package.to_string(),
            handle: handle.map(str::to_string),
            operation,
            source,
        }
    }

    /// Attach a cleanup failure to this error, if there was one
    pub fn with_cleanup(self, cleanup: Option<EditError>) -> Self {
        match cleanup {
            Some(cleanup) => Self::CleanupFailed {
                primary: Box::new(self),
                cleanup: Box::new(cleanup),
            },
            None => self,
        }
    }

    /// The error that caused the operation to fail, ignoring cleanup noise
    pub fn primary(&self) -> &EditError {
        match self {
            Self::CleanupFailed { primary, .. } => primary.primary(),
            other => other,
        }
    }

    /// True for lock conflicts
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self.primary(), Self::LockConflict { .. })
    }

    /// True for expired edits
    pub fn is_expired(&self) -> bool {
        matches!(self.primary(), Self::EditExpired { .. })
    }
}
