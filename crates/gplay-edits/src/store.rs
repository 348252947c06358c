//! Durable edit records
//!
//! Records live at `edits/<package>/<handle>.json`. The store does no
//! locking of its own; callers hold the package lock while writing.

use std::path::PathBuf;

use tracing::debug;

use crate::error::{EditError, Result};
use crate::layout::{path_component, read_json, remove_file, write_json};
use crate::types::Edit;

/// File-backed edit record store
#[derive(Debug, Clone)]
pub struct EditStore {
    edits_dir: PathBuf,
}

impl EditStore {
    /// Create a store rooted at `edits_dir`
    pub fn new(edits_dir: impl Into<PathBuf>) -> Self {
        Self {
            edits_dir: edits_dir.into(),
        }
    }

    fn package_dir(&self, package: &str) -> PathBuf {
        self.edits_dir.join(path_component(package))
    }

    /// Path of a single record
    pub fn record_path(&self, package: &str, handle: &str) -> PathBuf {
        self.package_dir(package)
            .join(format!("{}.json", path_component(handle)))
    }

    /// Insert or overwrite a record
    pub fn save(&self, edit: &Edit) -> Result<()> {
        let path = self.record_path(&edit.package_name, &edit.handle);
        write_json(&path, edit)?;
        debug!(package = %edit.package_name, handle = %edit.handle, state = %edit.state, "saved edit");
        Ok(())
    }

    /// Load a record, `None` when absent
    pub fn load(&self, package: &str, handle: &str) -> Result<Option<Edit>> {
        read_json(&self.record_path(package, handle))
    }

    /// Delete a record; deleting a missing record succeeds
    pub fn delete(&self, package: &str, handle: &str) -> Result<()> {
        if remove_file(&self.record_path(package, handle))? {
            debug!(package, handle, "deleted edit");
        }
        Ok(())
    }

    /// All records for a package, in no particular order
    pub fn list(&self, package: &str) -> Result<Vec<Edit>> {
        let dir = self.package_dir(package);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EditError::storage(&dir, e)),
        };

        let mut edits = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| EditError::storage(&dir, e))?;
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }
            if let Some(edit) = read_json::<Edit>(&path)? {
                edits.push(edit);
            }
        }
        Ok(edits)
    }
}
