//! On-disk layout of the local edit store
//!
//! ```text
//! <root>/
//! ├─ edits/<package>/<handle>.json
//! ├─ locks/<package>.lock
//! ├─ idempotency/<sha256(key)>.json
//! └─ artifacts/<package>/<digest>.json
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use gplay_core::EditsConfig;

use crate::error::{EditError, Result};

/// Directory layout for one user's local store
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    /// Layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout for the configured state directory
    pub fn from_config(config: &EditsConfig) -> std::result::Result<Self, gplay_core::ConfigError> {
        Ok(Self::new(config.resolve_state_dir()?))
    }

    /// Store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Edit records
    pub fn edits_dir(&self) -> PathBuf {
        self.root.join("edits")
    }

    /// Lock files
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Idempotency records
    pub fn idempotency_dir(&self) -> PathBuf {
        self.root.join("idempotency")
    }

    /// Cached artifacts
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }
}

/// Turn an arbitrary identifier into a single safe path component.
///
/// Package names and server ids pass through unchanged. Any other byte,
/// including `%` and a leading dot, is written as `%XX`, so distinct
/// identifiers never share a file and `.` or `..` can never be produced.
pub fn path_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for (i, byte) in raw.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-') || (byte == b'.' && i > 0);
        if keep {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }

    if out.is_empty() {
        out.push('%');
    }
    out
}

/// Read and decode a JSON record, `None` when the file does not exist
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(EditError::storage(path, e)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| EditError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a JSON record atomically (temp file in the same directory, then rename)
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| EditError::storage(path, std::io::ErrorKind::InvalidInput.into()))?;
    std::fs::create_dir_all(dir).map_err(|e| EditError::storage(dir, e))?;

    let json = serde_json::to_vec_pretty(value).map_err(|source| EditError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(dir)
        .map_err(|e| EditError::storage(dir, e))?;
    tmp.write_all(&json)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| EditError::storage(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| EditError::storage(path, e.error))?;
    Ok(())
}

/// Remove a file; a missing file is not an error
pub(crate) fn remove_file(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(EditError::storage(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_component() {
        assert_eq!(path_component("com.example.app"), "com.example.app");
        assert_eq!(path_component("01234-abc_DEF"), "01234-abc_DEF");
        assert_eq!(path_component("a/b\\c"), "a%2Fb%5Cc");
        assert_eq!(path_component(".."), "%2E.");
        assert_eq!(path_component(""), "%");
        assert_eq!(path_component("é"), "%C3%A9");
    }

    #[test]
    fn test_path_component_is_injective() {
        let names = ["a/b", "a_b", "a%2Fb", "a%b", ".x", "%2Ex", "", "%"];
        let encoded: std::collections::HashSet<String> = names.iter().map(|n| path_component(n)).collect();
        assert_eq!(encoded.len(), names.len());
    }

    #[test]
    fn test_json_roundtrip_and_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("record.json");

        assert!(read_json::<Vec<u32>>(&path).unwrap().is_none());

        write_json(&path, &vec![1u32, 2, 3]).unwrap();
        assert_eq!(read_json::<Vec<u32>>(&path).unwrap(), Some(vec![1, 2, 3]));

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_corrupt_record_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = read_json::<Vec<u32>>(&path).unwrap_err();
        assert!(matches!(err, EditError::Corrupt { .. }));
        assert!(err.to_string().contains("bad.json"));
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        let temp = TempDir::new().unwrap();
        assert!(!remove_file(&temp.path().join("nope")).unwrap());
    }
}
