//! Publisher error types

use thiserror::Error;

use gplay_edits::EditError;

/// Google Play client errors
#[derive(Debug, Error)]
pub enum PublisherError {
    /// Token exchange was rejected
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Service account key is missing fields or malformed
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Non-success response from the Developer API
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// Binary upload was rejected
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// Artifact cannot be uploaded
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    /// Rollout fraction outside (0, 1]
    #[error("Invalid rollout fraction {0}: expected a value in (0, 1]")]
    InvalidRollout(f64),

    /// Client setup error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Edit bookkeeping failed
    #[error(transparent)]
    Edit(#[from] EditError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JWT error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl PublisherError {
    /// HTTP status for API errors
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Convert for the edit layer; client failures become remote errors
    pub fn into_edit_error(self, package: &str, handle: Option<&str>, operation: &'static str) -> EditError {
        match self {
            Self::Edit(e) => e,
            other => EditError::remote(package, handle, operation, Box::new(other)),
        }
    }
}


/// Result type for publisher operations
pub type Result<T> = std::result::Result<T, PublisherError>;
