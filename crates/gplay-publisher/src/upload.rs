//! Deduplicated binary uploads
//!
//! Hashes the artifact, then lets the edit layer decide whether the bytes
//! were already uploaded before calling the store.

use std::path::Path;

use tracing::debug;

use gplay_edits::{hash_file_with_progress, Edit, EditError, UploadDeduplicator, UploadOutcome};

use crate::client::{BinaryKind, PlayPublisher};
use crate::error::Result;

/// Anything that can push a binary into an edit
#[async_trait::async_trait]
pub trait BundleUploader: Send + Sync {
    /// Upload `path` into `edit_id`, returning the version code
    async fn upload_bundle(&self, package: &str, edit_id: &str, path: &Path) -> Result<i64>;
}

#[async_trait::async_trait]
impl BundleUploader for PlayPublisher {
    async fn upload_bundle(&self, package: &str, edit_id: &str, path: &Path) -> Result<i64> {
        PlayPublisher::upload_bundle(self, package, edit_id, path).await
    }
}

/// Upload `path` into `edit` unless the same bytes were uploaded before.
///
/// `on_progress` receives `(bytes_hashed, total_bytes)` while the artifact
/// is hashed.
pub async fn upload_with_dedup<U, P>(
    uploads: &UploadDeduplicator,
    uploader: &U,
    edit: &Edit,
    path: &Path,
    on_progress: P,
) -> Result<UploadOutcome>
where
    U: BundleUploader + ?Sized,
    P: FnMut(u64, u64),
{
    BinaryKind::from_path(path)?;
    let digest = hash_file_with_progress(path, on_progress)?;
    debug!(path = %path.display(), %digest, "artifact hashed");

    let package = edit.package_name.as_str();
    let outcome = uploads
        .upload(package, &digest, move || async move {
            uploader
                .upload_bundle(package, &edit.server_id, path)
                .await
                .map_err(|e| EditError::remote(package, Some(edit.handle.as_str()), "upload bundle", Box::new(e)))
        })
        .await?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublisherError;
    use chrono::Utc;
    use gplay_edits::{ArtifactCache, IdempotencyCache, UploadSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingUploader {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl BundleUploader for CountingUploader {
        async fn upload_bundle(&self, _package: &str, _edit_id: &str, _path: &Path) -> Result<i64> {
            Ok(100 + self.calls.fetch_add(1, Ordering::SeqCst) as i64)
        }
    }

    struct RejectingUploader;

    #[async_trait::async_trait]
    impl BundleUploader for RejectingUploader {
        async fn upload_bundle(&self, _package: &str, _edit_id: &str, _path: &Path) -> Result<i64> {
            Err(PublisherError::UploadFailed("APK signature mismatch".to_string()))
        }
    }

    fn uploads(temp: &TempDir) -> UploadDeduplicator {
        UploadDeduplicator::new(
            ArtifactCache::new(temp.path().join("artifacts")),
            IdempotencyCache::new(temp.path().join("idempotency")),
        )
    }

    #[tokio::test]
    async fn test_same_bytes_uploaded_once_across_edits() {
        let temp = TempDir::new().unwrap();
        let uploads = uploads(&temp);
        let uploader = CountingUploader::default();
        let bundle = temp.path().join("app-release.aab");
        std::fs::write(&bundle, b"bundle bytes").unwrap();

        let first_edit = Edit::new("com.example.app", "edit-1", Utc::now());
        let second_edit = Edit::new("com.example.app", "edit-2", Utc::now());

        let mut last_progress = (0, 0);
        let first = upload_with_dedup(&uploads, &uploader, &first_edit, &bundle, |done, total| {
            last_progress = (done, total)
        })
        .await
        .unwrap();
        assert_eq!(first.source, UploadSource::Uploaded);
        assert_eq!(first.version_code, 100);
        assert_eq!(last_progress, (12, 12));

        let second = upload_with_dedup(&uploads, &uploader, &second_edit, &bundle, |_, _| {})
            .await
            .unwrap();
        assert_eq!(second.source, UploadSource::ArtifactCache);
        assert_eq!(second.version_code, 100);
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_upload_is_not_cached() {
        let temp = TempDir::new().unwrap();
        let uploads = uploads(&temp);
        let apk = temp.path().join("app.apk");
        std::fs::write(&apk, b"apk bytes").unwrap();
        let edit = Edit::new("com.example.app", "edit-1", Utc::now());

        let err = upload_with_dedup(&uploads, &RejectingUploader, &edit, &apk, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, PublisherError::Edit(EditError::Remote { .. })));
        assert!(err.to_string().contains("signature mismatch"));

        let uploader = CountingUploader::default();
        let retried = upload_with_dedup(&uploads, &uploader, &edit, &apk, |_, _| {})
            .await
            .unwrap();
        assert_eq!(retried.source, UploadSource::Uploaded);
    }

    #[tokio::test]
    async fn test_unsupported_artifact_rejected_before_hashing() {
        let temp = TempDir::new().unwrap();
        let edit = Edit::new("com.example.app", "edit-1", Utc::now());

        let err = upload_with_dedup(
            &uploads(&temp),
            &CountingUploader::default(),
            &edit,
            &temp.path().join("missing.zip"),
            |_, _| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PublisherError::InvalidArtifact(_)));
    }
}
