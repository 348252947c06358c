//! Cross-process edit locks
//!
//! One lock file per package under `locks/`. The owner record is written to
//! a temp file and published with a no-clobber rename, so the filesystem
//! arbitrates between racing processes and the lock path never exists
//! without its JSON [`LockOwner`]. Operators can read and delete it by hand.
//!
//! A lock is stale when it is older than the configured ceiling, or when it
//! was taken on this host by a process that no longer exists. Stale locks
//! are removed and acquisition is retried.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{EditError, Result};
use crate::layout::{path_component, remove_file};

const MAX_RECLAIM_ATTEMPTS: u32 = 3;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long a lock file with unparseable content is treated as live
pub const UNREADABLE_GRACE: Duration = Duration::from_secs(10);

/// Contents of a lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    /// Process id of the holder
    pub pid: u32,
    /// Host the holder runs on
    pub hostname: String,
    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
    /// Free-form description of what the holder is doing
    pub context: String,
}

impl LockOwner {
    fn current(context: &str) -> Self {
        Self {
            pid: std::process::id(),
            hostname: current_hostname(),
            acquired_at: Utc::now(),
            context: context.to_string(),
        }
    }
}

/// What a lock file on disk says about its holder
#[derive(Debug, Clone, PartialEq, Eq)]
enum Holder {
    Owner(LockOwner),
    /// Content that does not decode, dated by file mtime
    Unreadable { modified: DateTime<Utc>, len: usize },
}

impl Holder {
    fn into_owner(self) -> LockOwner {
        match self {
            Holder::Owner(owner) => owner,
            Holder::Unreadable { modified, .. } => LockOwner {
                pid: 0,
                hostname: String::new(),
                acquired_at: modified,
                context: "unreadable lock file".to_string(),
            },
        }
    }
}

/// Grants per-package mutual exclusion across process invocations
#[derive(Debug, Clone)]
pub struct LockManager {
    locks_dir: PathBuf,
    stale_after: Duration,
    wait: Duration,
}

impl LockManager {
    /// Create a lock manager
    ///
    /// `wait` is how long [`acquire`](Self::acquire) keeps polling a live lock
    /// before failing; zero fails immediately.
    pub fn new(locks_dir: impl Into<PathBuf>, stale_after: Duration, wait: Duration) -> Self {
        Self {
            locks_dir: locks_dir.into(),
            stale_after,
            wait,
        }
    }

    /// Path of the lock file for a package
    pub fn lock_path(&self, package: &str) -> PathBuf {
        self.locks_dir.join(format!("{}.lock", path_component(package)))
    }

    /// Acquire the package lock, polling up to the configured wait
    pub async fn acquire(&self, package: &str, context: &str) -> Result<LockGuard> {
        let deadline = Instant::now() + self.wait;
        loop {
            match self.try_acquire(package, context) {
                Err(e) if e.is_lock_conflict() && Instant::now() < deadline => {
                    debug!(package, "lock busy, waiting");
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
                }
                other => return other,
            }
        }
    }

    /// Acquire the package lock without waiting on a live holder
    pub fn try_acquire(&self, package: &str, context: &str) -> Result<LockGuard> {
        std::fs::create_dir_all(&self.locks_dir)
            .map_err(|e| EditError::storage(&self.locks_dir, e))?;
        let path = self.lock_path(package);

        for attempt in 0..MAX_RECLAIM_ATTEMPTS {
            let owner = LockOwner::current(context);
            if self.publish(&path, &owner)? {
                debug!(package, context, "lock acquired");
                return Ok(LockGuard {
                    package: package.to_string(),
                    path: Some(path),
                    owner,
                });
            }

            let Some(holder) = read_holder(&path)? else {
                // Released between our publish and read
                continue;
            };
            if !self.holder_is_stale(&holder, Utc::now()) {
                return Err(conflict(package, holder.into_owner(), path));
            }

            match &holder {
                Holder::Owner(stale) => warn!(
                    package,
                    pid = stale.pid,
                    hostname = %stale.hostname,
                    acquired_at = %stale.acquired_at,
                    attempt,
                    "reclaiming stale edit lock"
                ),
                Holder::Unreadable { modified, len } => warn!(
                    package,
                    %modified,
                    len,
                    attempt,
                    "reclaiming unreadable edit lock"
                ),
            }
            remove_if_unchanged(&path, &holder)?;
        }

        // Another process keeps winning the reclaim race
        match read_holder(&path)? {
            Some(holder) => Err(conflict(package, holder.into_owner(), path)),
            None => Err(EditError::storage(
                &path,
                std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "lock changed hands repeatedly while acquiring",
                ),
            )),
        }
    }

    /// Release the package lock. Releasing an unheld lock is a no-op.
    pub fn release(&self, package: &str) -> Result<()> {
        if remove_file(&self.lock_path(package))? {
            debug!(package, "lock released");
        }
        Ok(())
    }

    /// Current holder of a package lock, if any
    pub fn inspect(&self, package: &str) -> Result<Option<LockOwner>> {
        Ok(read_holder(&self.lock_path(package))?.map(Holder::into_owner))
    }

    /// Remove a lock regardless of its holder. Operator recovery only.
    pub fn force_release(&self, package: &str) -> Result<Option<LockOwner>> {
        let path = self.lock_path(package);
        let owner = read_holder(&path)?.map(Holder::into_owner);
        if remove_file(&path)? {
            info!(package, "lock forcibly removed");
        }
        Ok(owner)
    }

    /// Whether a lock holder can be considered gone
    pub fn is_stale(&self, owner: &LockOwner) -> bool {
        self.is_stale_at(owner, Utc::now())
    }

    fn is_stale_at(&self, owner: &LockOwner, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(owner.acquired_at);
        if age.to_std().is_ok_and(|age| age > self.stale_after) {
            return true;
        }

        owner.hostname == current_hostname() && !is_process_alive(owner.pid)
    }

    fn holder_is_stale(&self, holder: &Holder, now: DateTime<Utc>) -> bool {
        match holder {
            Holder::Owner(owner) => self.is_stale_at(owner, now),
            Holder::Unreadable { modified, .. } => now
                .signed_duration_since(*modified)
                .to_std()
                .is_ok_and(|age| age > UNREADABLE_GRACE),
        }
    }

    /// Write the owner record and move it into place unless a lock exists.
    /// Returns false when another holder got there first.
    fn publish(&self, path: &Path, owner: &LockOwner) -> Result<bool> {
        let json = serde_json::to_vec_pretty(owner).map_err(|source| EditError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&self.locks_dir)
            .map_err(|e| EditError::storage(&self.locks_dir, e))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| EditError::storage(tmp.path(), e))?;

        match tmp.persist_noclobber(path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(EditError::storage(path, e.error)),
        }
    }
}

/// Read a lock file, `None` when there is none
fn read_holder(path: &Path) -> Result<Option<Holder>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(EditError::storage(path, e)),
    };

    match serde_json::from_slice::<LockOwner>(&bytes) {
        Ok(owner) => Ok(Some(Holder::Owner(owner))),
        Err(_) => {
            let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(EditError::storage(path, e)),
            };
            Ok(Some(Holder::Unreadable {
                modified,
                len: bytes.len(),
            }))
        }
    }
}

/// Remove a lock file only if it still holds what was judged stale
fn remove_if_unchanged(path: &Path, expected: &Holder) -> Result<()> {
    match read_holder(path)? {
        Some(current) if current == *expected => remove_file(path).map(|_| ()),
        _ => Ok(()),
    }
}

fn conflict(package: &str, holder: LockOwner, lock_path: PathBuf) -> EditError {
    EditError::LockConflict {
        package: package.to_string(),
        pid: holder.pid,
        hostname: holder.hostname,
        acquired_at: holder.acquired_at,
        context: holder.context,
        lock_path,
    }
}

/// Held package lock. Dropping the guard releases the lock.
///
/// Release only removes the lock file while it still names this guard's
/// owner; a lock reclaimed by another process is left alone.
#[derive(Debug)]
pub struct LockGuard {
    package: String,
    path: Option<PathBuf>,
    owner: LockOwner,
}

impl LockGuard {
    /// Package this guard protects
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Owner record this guard published
    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    /// Release explicitly, surfacing any error
    pub fn release(mut self) -> Result<()> {
        match self.path.take() {
            Some(path) => self.release_at(&path),
            None => Ok(()),
        }
    }

    fn release_at(&self, path: &Path) -> Result<()> {
        match read_holder(path)? {
            Some(Holder::Owner(current)) if current == self.owner => {
                remove_file(path)?;
                debug!(package = %self.package, "lock released");
            }
            Some(Holder::Owner(current)) => warn!(
                package = %self.package,
                pid = current.pid,
                hostname = %current.hostname,
                acquired_at = %current.acquired_at,
                "lock was taken over by another holder, leaving it in place"
            ),
            Some(Holder::Unreadable { .. }) => {
                warn!(package = %self.package, "lock file no longer names this holder, leaving it in place")
            }
            None => debug!(package = %self.package, "lock already gone"),
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = self.release_at(&path) {
                warn!(package = %self.package, error = %e, "failed to release edit lock");
            }
        }
    }
}

fn current_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Whether a process with the given pid still exists on this host
#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}/stat", pid)).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(true)
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    // No cheap liveness check; rely on the age ceiling
    true
}
