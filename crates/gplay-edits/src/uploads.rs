//! Upload deduplication
//!
//! Consults the artifact cache (same bytes seen in any earlier edit), then
//! the idempotency cache (same upload already completed), and only then
//! performs the upload. Successful uploads are recorded in both.

use std::future::Future;

use tracing::info;

use crate::artifacts::ArtifactCache;
use crate::error::Result;
use crate::idempotency::IdempotencyCache;

/// Where a version code came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadSource {
    /// Bytes were uploaded before, possibly in another edit
    ArtifactCache,
    /// This exact upload already completed
    Idempotency,
    /// Freshly uploaded now
    Uploaded,
}

/// Result of a deduplicated upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Version code assigned by the store
    pub version_code: i64,
    /// SHA-256 of the uploaded bytes
    pub digest: String,
    /// Whether the upload actually happened
    pub source: UploadSource,
}

/// Guards binary uploads against duplicate remote calls
#[derive(Debug, Clone)]
pub struct UploadDeduplicator {
    artifacts: ArtifactCache,
    idempotency: IdempotencyCache,
}

impl UploadDeduplicator {
    /// Create a deduplicator over the given caches
    pub fn new(artifacts: ArtifactCache, idempotency: IdempotencyCache) -> Self {
        Self {
            artifacts,
            idempotency,
        }
    }

    /// Upload `digest` for `package` unless an earlier upload can be reused
    pub async fn upload<F, Fut>(&self, package: &str, digest: &str, upload: F) -> Result<UploadOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<i64>>,
    {
        if let Some(cached) = self.artifacts.get_cached_artifact_by_hash(package, digest)? {
            info!(package, digest, version_code = cached.version_code, "reusing cached artifact");
            return Ok(UploadOutcome {
                version_code: cached.version_code,
                digest: digest.to_string(),
                source: UploadSource::ArtifactCache,
            });
        }

        if let Some(version_code) = self.idempotency.check_upload_by_hash(package, digest)? {
            info!(package, digest, version_code, "upload already completed");
            self.artifacts.cache_artifact_by_hash(package, digest, version_code)?;
            return Ok(UploadOutcome {
                version_code,
                digest: digest.to_string(),
                source: UploadSource::Idempotency,
            });
        }

        let version_code = upload().await?;
        self.idempotency.record_upload(package, digest, version_code)?;
        self.artifacts.cache_artifact_by_hash(package, digest, version_code)?;
        info!(package, digest, version_code, "uploaded artifact");

        Ok(UploadOutcome {
            version_code,
            digest: digest.to_string(),
            source: UploadSource::Uploaded,
        })
    }
}
