//! Seam to the remote publishing client

use crate::error::RemoteError;

/// Edit operations the controller needs from the publishing API
///
/// Implementations talk to the store; the controller decides when each call
/// is safe to make.
#[async_trait::async_trait]
pub trait EditsApi: Send + Sync {
    /// Open a new server-side edit, returning its id
    async fn create_edit(&self, package: &str) -> Result<String, RemoteError>;

    /// Ask the server to validate the pending changes
    async fn validate_edit(&self, package: &str, edit_id: &str) -> Result<(), RemoteError>;

    /// Publish the pending changes. Not idempotent.
    async fn commit_edit(&self, package: &str, edit_id: &str) -> Result<(), RemoteError>;

    /// Discard the edit on the server
    async fn delete_edit(&self, package: &str, edit_id: &str) -> Result<(), RemoteError>;
}
