//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Main configuration for gplay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default application package name (e.g. `com.example.app`)
    pub package_name: Option<String>,

    /// Path to the Google service account JSON key
    pub service_account_key: Option<PathBuf>,

    /// Default release track
    pub default_track: Option<String>,

    /// Edit transaction settings
    pub edits: EditsConfig,
}

impl Config {
    /// Track to use when none is given on the command line
    pub fn track(&self) -> &str {
        self.default_track.as_deref().unwrap_or(super::defaults::DEFAULT_TRACK)
    }
}

/// Edit transaction, lock and local store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditsConfig {
    /// Edits older than this (measured from creation) are never reused
    pub max_age_secs: u64,

    /// Locks older than this are considered abandoned
    pub lock_stale_secs: u64,

    /// How long to wait for a live lock before giving up
    pub lock_wait_ms: u64,

    /// Root of the local edit store; platform data dir when unset
    pub state_dir: Option<PathBuf>,
}

impl Default for EditsConfig {
    fn default() -> Self {
        Self {
            max_age_secs: super::defaults::DEFAULT_EDIT_MAX_AGE_SECS,
            lock_stale_secs: super::defaults::DEFAULT_LOCK_STALE_SECS,
            lock_wait_ms: 0,
            state_dir: None,
        }
    }
}

impl EditsConfig {
    /// Config rooted at an explicit directory, used by tests and `--state-dir`
    pub fn with_state_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: Some(dir.into()),
            ..Default::default()
        }
    }

    /// Maximum edit age
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Lock staleness ceiling
    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_secs)
    }

    /// Lock acquisition wait
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    /// Resolve the state directory, falling back to the platform default
    pub fn resolve_state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => super::defaults::default_state_dir().ok_or(ConfigError::NoStateDir),
        }
    }
}
