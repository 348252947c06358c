//! Operation-addressed idempotency records
//!
//! A record says "this exact operation already completed, and this is what
//! it returned". Keys are derived from the stable inputs of the operation;
//! the file name is the SHA-256 of the key so any key maps to a safe path.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EditError, Result};
use crate::hash::hash_bytes;
use crate::layout::{read_json, write_json};

/// Deterministic key for a guarded operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey(pub String);

impl OperationKey {
    /// Key for committing a specific edit incarnation
    pub fn commit(package: &str, server_id: &str, token: &str) -> Self {
        Self(format!("commit:{}:{}:{}", package, server_id, token))
    }

    /// Key for uploading specific bytes to a package
    pub fn upload(package: &str, digest: &str) -> Self {
        Self(format!("upload:{}:{}", package, digest))
    }

    fn file_name(&self) -> String {
        format!("{}.json", hash_bytes(self.0.as_bytes()))
    }
}

impl std::fmt::Display for OperationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result recorded for a completed operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum IdempotentResult {
    /// An edit was committed
    Commit { edit_id: String },
    /// A binary was uploaded and assigned a version code
    Upload { version_code: i64, digest: String },
}

/// Stored idempotency record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Key the record was stored under
    pub key: OperationKey,
    /// What the operation produced
    pub result: IdempotentResult,
    /// When the operation completed
    pub recorded_at: DateTime<Utc>,
}

/// File-backed idempotency cache
#[derive(Debug, Clone)]
pub struct IdempotencyCache {
    dir: PathBuf,
}

impl IdempotencyCache {
    /// Create a cache rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Look up a key. An unknown key is `Ok(None)`, not an error.
    pub fn check(&self, key: &OperationKey) -> Result<Option<IdempotencyRecord>> {
        let record: Option<IdempotencyRecord> = read_json(&self.dir.join(key.file_name()))?;
        match &record {
            Some(_) => debug!(%key, "idempotency hit"),
            None => debug!(%key, "idempotency miss"),
        }
        Ok(record)
    }

    /// Record a completed operation. The last write for a key wins.
    pub fn record(&self, key: &OperationKey, result: IdempotentResult) -> Result<IdempotencyRecord> {
        let record = IdempotencyRecord {
            key: key.clone(),
            result,
            recorded_at: Utc::now(),
        };
        write_json(&self.dir.join(key.file_name()), &record)?;
        debug!(%key, "idempotency recorded");
        Ok(record)
    }

    /// Check whether an edit incarnation was already committed
    pub fn check_commit(
        &self,
        package: &str,
        server_id: &str,
        token: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        self.check(&OperationKey::commit(package, server_id, token))
    }

    /// Record a successful commit
    pub fn record_commit(&self, package: &str, server_id: &str, token: &str) -> Result<IdempotencyRecord> {
        self.record(
            &OperationKey::commit(package, server_id, token),
            IdempotentResult::Commit {
                edit_id: server_id.to_string(),
            },
        )
    }

    /// Find the commit record for a server edit id, whatever its token.
    ///
    /// Scans the cache; used when only the id of an edit is known.
    pub fn find_commit(&self, package: &str, server_id: &str) -> Result<Option<IdempotencyRecord>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EditError::storage(&self.dir, e)),
        };

        let prefix = format!("commit:{}:{}:", package, server_id);
        for entry in entries {
            let entry = entry.map_err(|e| EditError::storage(&self.dir, e))?;
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }
            let Some(record) = read_json::<IdempotencyRecord>(&path)? else {
                continue;
            };
            let matches = record.key.0.starts_with(&prefix)
                && matches!(&record.result, IdempotentResult::Commit { edit_id } if edit_id == server_id);
            if matches {
                debug!(package, server_id, "found commit record");
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Check whether these bytes were already uploaded for the package
    pub fn check_upload_by_hash(&self, package: &str, digest: &str) -> Result<Option<i64>> {
        let record = self.check(&OperationKey::upload(package, digest))?;
        Ok(record.and_then(|r| match r.result {
            IdempotentResult::Upload { version_code, .. } => Some(version_code),
            IdempotentResult::Commit { .. } => None,
        }))
    }

    /// Record a successful upload
    pub fn record_upload(&self, package: &str, digest: &str, version_code: i64) -> Result<IdempotencyRecord> {
        self.record(
            &OperationKey::upload(package, digest),
            IdempotentResult::Upload {
                version_code,
                digest: digest.to_string(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unknown_key_is_not_found() {
        let temp = TempDir::new().unwrap();
        let cache = IdempotencyCache::new(temp.path());
        assert!(cache.check(&OperationKey("nothing".into())).unwrap().is_none());
    }

    #[test]
    fn test_record_then_check() {
        let temp = TempDir::new().unwrap();
        let cache = IdempotencyCache::new(temp.path());
        let key = OperationKey::commit("com.example.app", "srv-1", "2026-01-01T00:00:00+00:00");
        let payload = IdempotentResult::Commit {
            edit_id: "srv-1".to_string(),
        };

        cache.record(&key, payload.clone()).unwrap();
        let found = cache.check(&key).unwrap().unwrap();
        assert_eq!(found.result, payload);
        assert_eq!(found.key, key);
    }

    #[test]
    fn test_last_record_wins() {
        let temp = TempDir::new().unwrap();
        let cache = IdempotencyCache::new(temp.path());

        cache.record_upload("com.example.app", "abc", 10).unwrap();
        cache.record_upload("com.example.app", "abc", 11).unwrap();
        assert_eq!(cache.check_upload_by_hash("com.example.app", "abc").unwrap(), Some(11));
    }

    #[test]
    fn test_commit_keys_depend_on_token() {
        let temp = TempDir::new().unwrap();
        let cache = IdempotencyCache::new(temp.path());

        cache.record_commit("com.example.app", "srv-1", "t1").unwrap();
        assert!(cache.check_commit("com.example.app", "srv-1", "t1").unwrap().is_some());
        assert!(cache.check_commit("com.example.app", "srv-1", "t2").unwrap().is_none());
        assert!(cache.check_commit("com.example.other", "srv-1", "t1").unwrap().is_none());
    }

    #[test]
    fn test_find_commit_by_server_id() {
        let temp = TempDir::new().unwrap();
        let cache = IdempotencyCache::new(temp.path());
        assert!(cache.find_commit("com.example.app", "srv-1").unwrap().is_none());

        cache.record_upload("com.example.app", "abc", 10).unwrap();
        cache.record_commit("com.example.app", "srv-1", "2026-01-01T00:00:00+00:00").unwrap();

        let found = cache.find_commit("com.example.app", "srv-1").unwrap().unwrap();
        assert_eq!(
            found.result,
            IdempotentResult::Commit {
                edit_id: "srv-1".to_string()
            }
        );
        assert!(cache.find_commit("com.example.app", "srv-2").unwrap().is_none());
        assert!(cache.find_commit("com.example.other", "srv-1").unwrap().is_none());
    }

    #[test]
    fn test_upload_lookup_is_per_package() {
        let temp = TempDir::new().unwrap();
        let cache = IdempotencyCache::new(temp.path());

        cache.record_upload("com.example.app", "deadbeef", 42).unwrap();
        assert_eq!(cache.check_upload_by_hash("com.example.app", "deadbeef").unwrap(), Some(42));
        assert_eq!(cache.check_upload_by_hash("com.example.lite", "deadbeef").unwrap(), None);
    }

    #[test]
    fn test_payload_is_tagged() {
        let json = serde_json::to_value(IdempotentResult::Upload {
            version_code: 7,
            digest: "ff".to_string(),
        })
        .unwrap();
        assert_eq!(json["operation"], "upload");
        assert_eq!(json["version_code"], 7);
    }
}
