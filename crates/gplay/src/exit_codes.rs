//! Exit codes for the CLI

use gplay_core::ConfigError;
use gplay_edits::EditError;
use gplay_publisher::PublisherError;

/// Success
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// Another process holds the package lock
pub const LOCK_CONFLICT: i32 = 3;

/// Edit is older than the configured maximum age
pub const EDIT_EXPIRED: i32 = 4;

/// Edit not found locally
pub const NOT_FOUND: i32 = 5;

/// Local state could not be read or written
pub const STORAGE_ERROR: i32 = 6;

/// Google Play rejected a request
pub const REMOTE_ERROR: i32 = 7;

/// Another live edit exists for the package
pub const EDIT_CONFLICT: i32 = 8;

/// User cancelled
pub const CANCELLED: i32 = 130;

/// Pick the exit code for a failed command
pub fn for_error(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<EditError>() {
            return for_edit_error(e);
        }
        if let Some(e) = cause.downcast_ref::<PublisherError>() {
            return match e {
                PublisherError::Edit(e) => for_edit_error(e),
                PublisherError::ConfigurationError(_)
                | PublisherError::InvalidCredentials(_)
                | PublisherError::InvalidRollout(_) => CONFIG_ERROR,
                PublisherError::InvalidArtifact(_) | PublisherError::Io(_) => ERROR,
                _ => REMOTE_ERROR,
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return CONFIG_ERROR;
        }
    }
    ERROR
}

fn for_edit_error(err: &EditError) -> i32 {
    match err.primary() {
        EditError::LockConflict { .. } => LOCK_CONFLICT,
        EditError::EditExpired { .. } => EDIT_EXPIRED,
        EditError::EditNotFound { .. } => NOT_FOUND,
        EditError::EditConflict { .. } => EDIT_CONFLICT,
        EditError::Storage { .. } | EditError::Corrupt { .. } => STORAGE_ERROR,
        EditError::Remote { .. } => REMOTE_ERROR,
        EditError::Cancelled { .. } => CANCELLED,
        _ => ERROR,
    }
}
