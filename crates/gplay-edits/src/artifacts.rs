//! Content-addressed cache of uploaded binaries
//!
//! Maps `(package, sha256)` to the version code the store assigned the last
//! time those exact bytes were uploaded, regardless of which edit did it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::hash::hash_file;
use crate::layout::{path_component, read_json, write_json};

/// A previously uploaded binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedArtifact {
    /// Package the binary was uploaded to
    pub package_name: String,
    /// SHA-256 of the binary
    pub digest: String,
    /// Version code assigned by the store
    pub version_code: i64,
    /// When the upload completed
    pub recorded_at: DateTime<Utc>,
}

/// File-backed artifact cache
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    /// Create a cache rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, package: &str, digest: &str) -> PathBuf {
        self.dir
            .join(path_component(package))
            .join(format!("{}.json", path_component(digest)))
    }

    /// Remember an upload by file content
    pub fn cache_artifact(&self, package: &str, path: &Path, version_code: i64) -> Result<CachedArtifact> {
        let digest = hash_file(path)?;
        self.cache_artifact_by_hash(package, &digest, version_code)
    }

    /// Remember an upload by precomputed digest
    pub fn cache_artifact_by_hash(
        &self,
        package: &str,
        digest: &str,
        version_code: i64,
    ) -> Result<CachedArtifact> {
        let artifact = CachedArtifact {
            package_name: package.to_string(),
            digest: digest.to_string(),
            version_code,
            recorded_at: Utc::now(),
        };
        write_json(&self.entry_path(package, digest), &artifact)?;
        debug!(package, digest, version_code, "cached artifact");
        Ok(artifact)
    }

    /// Look up an upload by file content
    pub fn get_cached_artifact(&self, package: &str, path: &Path) -> Result<Option<CachedArtifact>> {
        let digest = hash_file(path)?;
        self.get_cached_artifact_by_hash(package, &digest)
    }

    /// Look up an upload by precomputed digest
    pub fn get_cached_artifact_by_hash(
        &self,
        package: &str,
        digest: &str,
    ) -> Result<Option<CachedArtifact>> {
        read_json(&self.entry_path(package, digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_roundtrip_by_hash() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp.path());

        cache.cache_artifact_by_hash("com.example.app", "aaaa", 101).unwrap();

        let hit = cache.get_cached_artifact_by_hash("com.example.app", "aaaa").unwrap().unwrap();
        assert_eq!(hit.version_code, 101);
        assert!(cache.get_cached_artifact_by_hash("com.example.app", "bbbb").unwrap().is_none());
        assert!(cache.get_cached_artifact_by_hash("com.example.lite", "aaaa").unwrap().is_none());
    }

    #[test]
    fn test_cache_by_file_content() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp.path().join("artifacts"));
        let bundle = temp.path().join("app-release.aab");
        std::fs::write(&bundle, b"bundle bytes").unwrap();

        cache.cache_artifact("com.example.app", &bundle, 7).unwrap();

        // Same bytes under another name still hit
        let copy = temp.path().join("copy.aab");
        std::fs::copy(&bundle, &copy).unwrap();
        let hit = cache.get_cached_artifact("com.example.app", &copy).unwrap().unwrap();
        assert_eq!(hit.version_code, 7);
        assert_eq!(hit.digest, crate::hash::hash_bytes(b"bundle bytes"));

        std::fs::write(&copy, b"rebuilt bundle").unwrap();
        assert!(cache.get_cached_artifact("com.example.app", &copy).unwrap().is_none());
    }
}
