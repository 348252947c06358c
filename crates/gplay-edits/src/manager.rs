//! Edit lifecycle controller
//!
//! Orchestrates one package's edit: take the package lock, load or create
//! the edit, hand it to the caller, then commit or keep it open and release
//! the lock. The lock is held by the manager between [`EditManager::open`]
//! and [`EditManager::finalize`]/[`EditManager::abort`], and dropping the
//! manager releases anything still held.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use gplay_core::{ConfigError, EditsConfig};

use crate::api::EditsApi;
use crate::artifacts::ArtifactCache;
use crate::error::{EditError, Result};
use crate::idempotency::IdempotencyCache;
use crate::layout::StoreLayout;
use crate::lock::{LockGuard, LockManager};
use crate::store::EditStore;
use crate::types::{Edit, EditState};
use crate::uploads::UploadDeduplicator;

/// An edit handed to the caller by [`EditManager::open`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedEdit {
    /// The edit record
    pub edit: Edit,
    /// True when this invocation created the edit on the server
    pub was_created: bool,
}

/// How [`EditManager::finalize`] left the edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Still open; carries the refreshed record
    KeptOpen(Edit),
    /// Committed by this call
    Committed,
    /// An earlier call already committed it; the server was not contacted
    AlreadyCommitted,
}

/// Result of [`EditManager::run`]
#[derive(Debug)]
pub struct RunOutcome<T> {
    /// Whatever the operation returned
    pub value: T,
    /// The edit the operation ran against
    pub edit: Edit,
    /// Whether the edit was created by this run
    pub was_created: bool,
    /// What finalization did
    pub finalized: FinalizeOutcome,
}

/// True when `now - created_at` exceeds `max_age`
pub fn is_expired(edit: &Edit, now: DateTime<Utc>, max_age: Duration) -> bool {
    match chrono::Duration::from_std(max_age) {
        Ok(max_age) => now.signed_duration_since(edit.created_at) > max_age,
        Err(_) => false,
    }
}

/// Coordinates edits, locks and idempotency for one local store
pub struct EditManager {
    layout: StoreLayout,
    store: EditStore,
    locks: LockManager,
    idempotency: IdempotencyCache,
    artifacts: ArtifactCache,
    api: Option<Arc<dyn EditsApi>>,
    max_age: Duration,
    context: String,
    held: HashMap<String, LockGuard>,
}

impl EditManager {
    /// Manager over an explicit store layout
    pub fn new(layout: StoreLayout, config: &EditsConfig) -> Self {
        Self {
            store: EditStore::new(layout.edits_dir()),
            locks: LockManager::new(
                layout.locks_dir(),
                config.lock_stale_after(),
                config.lock_wait(),
            ),
            idempotency: IdempotencyCache::new(layout.idempotency_dir()),
            artifacts: ArtifactCache::new(layout.artifacts_dir()),
            layout,
            api: None,
            max_age: config.max_age(),
            context: "gplay".to_string(),
            held: HashMap::new(),
        }
    }

    /// Manager over the configured state directory
    pub fn from_config(config: &EditsConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(StoreLayout::from_config(config)?, config))
    }

    /// Attach the publishing client used for remote edit calls
    pub fn with_api(mut self, api: Arc<dyn EditsApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Describe this invocation in lock files (e.g. the command line)
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Store layout
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Lock manager
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Idempotency cache
    pub fn idempotency(&self) -> &IdempotencyCache {
        &self.idempotency
    }

    /// Artifact cache
    pub fn artifacts(&self) -> &ArtifactCache {
        &self.artifacts
    }

    /// Upload deduplicator over this manager's caches
    pub fn uploads(&self) -> UploadDeduplicator {
        UploadDeduplicator::new(self.artifacts.clone(), self.idempotency.clone())
    }

    /// Maximum edit age
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Whether an edit is too old to be reused
    pub fn is_expired(&self, edit: &Edit, now: DateTime<Utc>) -> bool {
        is_expired(edit, now, self.max_age)
    }

    /// Open an edit for `package` and take its lock.
    ///
    /// With a handle the local record is resumed; an unknown handle is taken
    /// to be a server edit id created elsewhere. Either way, no other live
    /// edit may exist for the package. Without a handle a live local edit is
    /// resumed if there is one, otherwise a new edit is created.
    pub async fn open(&mut self, package: &str, handle: Option<&str>) -> Result<OpenedEdit> {
        let guard = self.locks.acquire(package, &self.context).await?;

        match self.load_or_create(package, handle).await {
            Ok(opened) => {
                info!(
                    package,
                    handle = %opened.edit.handle,
                    was_created = opened.was_created,
                    "edit opened"
                );
                self.held.insert(package.to_string(), guard);
                Ok(opened)
            }
            Err(e) => finish(Err(e), guard.release().err()),
        }
    }

    /// Run server-side validation, moving the edit through `Validating`
    pub async fn validate(&mut self, edit: &mut Edit) -> Result<()> {
        let (guard, owned) = self.borrow_lock(&edit.package_name).await?;
        let result = self.validate_locked(edit).await;
        let cleanup = self.return_lock(guard, owned);
        finish(result, cleanup)
    }

    /// Commit the edit, or keep it open for a later invocation.
    ///
    /// Commits are guarded by the idempotency cache: a repeat call for an
    /// edit that was already committed succeeds without contacting the
    /// server. The package lock is released on return.
    pub async fn finalize(&mut self, edit: &Edit, commit: bool) -> Result<FinalizeOutcome> {
        let guard = self.take_or_acquire(&edit.package_name).await?;
        let result = self.finalize_locked(edit, commit).await;
        finish(result, guard.release().err())
    }

    /// Discard the edit on the server and locally, then release the lock
    pub async fn abort(&mut self, edit: &Edit) -> Result<()> {
        let guard = self.take_or_acquire(&edit.package_name).await?;
        let result = self.abort_locked(edit).await;
        finish(result, guard.release().err())
    }

    /// Release a lock taken by [`open`](Self::open) without finalizing
    pub fn release(&mut self, package: &str) -> Result<()> {
        match self.held.remove(package) {
            Some(guard) => guard.release(),
            None => Ok(()),
        }
    }

    /// Open, run `op`, and finalize, honouring a cancellation signal.
    ///
    /// When `op` fails, an edit created by this run is aborted while a
    /// resumed edit is left for a later retry. When `cancel` resolves first,
    /// finalization is skipped and an edit created by this run is dropped
    /// locally. The lock is released on every path.
    pub async fn run<F, Fut, T, C>(
        &mut self,
        package: &str,
        handle: Option<&str>,
        commit: bool,
        cancel: C,
        op: F,
    ) -> Result<RunOutcome<T>>
    where
        F: FnOnce(Edit) -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        let opened = tokio::select! {
            biased;
            _ = &mut cancel => {
                return Err(EditError::Cancelled {
                    package: package.to_string(),
                    handle: handle.map(str::to_string),
                });
            }
            opened = self.open(package, handle) => opened?,
        };
        let OpenedEdit { edit, was_created } = opened;

        let op_result = tokio::select! {
            biased;
            _ = &mut cancel => None,
            result = op(edit.clone()) => Some(result),
        };

        let value = match op_result {
            None => return Err(self.cancelled(&edit, was_created)),
            Some(Err(e)) => {
                let cleanup = if was_created {
                    warn!(package, handle = %edit.handle, error = %e, "operation failed, aborting new edit");
                    self.abort(&edit).await.err()
                } else {
                    info!(package, handle = %edit.handle, "operation failed, keeping resumed edit");
                    self.release(package).err()
                };
                return finish(Err(e), cleanup);
            }
            Some(Ok(value)) => value,
        };

        let cancelled = tokio::select! {
            biased;
            _ = &mut cancel => true,
            _ = std::future::ready(()) => false,
        };
        if cancelled {
            return Err(self.cancelled(&edit, was_created));
        }

        let finalized = self.finalize(&edit, commit).await?;
        Ok(RunOutcome {
            value,
            edit,
            was_created,
            finalized,
        })
    }

    /// Local edit records for a package
    pub fn list_edits(&self, package: &str) -> Result<Vec<Edit>> {
        self.store.list(package)
    }

    /// Move a stored edit to `state`; terminal states delete the record
    pub async fn update_state(&mut self, package: &str, handle: &str, state: EditState) -> Result<Edit> {
        let (guard, owned) = self.borrow_lock(package).await?;
        let result = self.load_existing(package, handle).and_then(|mut edit| {
            self.transition(&mut edit, state)?;
            Ok(edit)
        });
        let cleanup = self.return_lock(guard, owned);
        finish(result, cleanup)
    }

    /// Delete a stored edit without contacting the server
    pub async fn delete_edit(&mut self, package: &str, handle: &str) -> Result<Edit> {
        let (guard, owned) = self.borrow_lock(package).await?;
        let result = self.load_existing(package, handle).and_then(|edit| {
            self.store.delete(package, handle)?;
            info!(package, handle, "local edit deleted");
            Ok(edit)
        });
        let cleanup = self.return_lock(guard, owned);
        finish(result, cleanup)
    }

    async fn load_or_create(&self, package: &str, handle: Option<&str>) -> Result<OpenedEdit> {
        let now = Utc::now();
        let edit = match handle {
            Some(handle) => self.resume(package, handle, now)?,
            None => match self.resume_live(package, now)? {
                Some(edit) => edit,
                None => {
                    return Ok(OpenedEdit {
                        edit: self.create(package, now).await?,
                        was_created: true,
                    });
                }
            },
        };
        Ok(OpenedEdit {
            edit,
            was_created: false,
        })
    }

    fn resume(&self, package: &str, handle: &str, now: DateTime<Utc>) -> Result<Edit> {
        let Some(mut edit) = self.store.load(package, handle)? else {
            self.ensure_no_other_live(package, handle, now)?;
            // Not created through this store; trust the handle as a server id
            warn!(package, handle, "no local record, using handle as server edit id");
            let edit = Edit::new(package, handle, now);
            self.store.save(&edit)?;
            return Ok(edit);
        };

        if edit.state.is_terminal() {
            self.store.delete(package, handle)?;
            return Err(EditError::EditNotFound {
                package: package.to_string(),
                handle: handle.to_string(),
            });
        }

        if self.is_expired(&edit, now) {
            return Err(expired(&edit, self.max_age));
        }
        self.ensure_no_other_live(package, handle, now)?;

        self.reset_interrupted_validation(&mut edit)?;
        Ok(edit)
    }

    /// At most one non-terminal, unexpired record per package
    fn ensure_no_other_live(&self, package: &str, handle: &str, now: DateTime<Utc>) -> Result<()> {
        let other = self
            .store
            .list(package)?
            .into_iter()
            .find(|e| e.handle != handle && !e.state.is_terminal() && !self.is_expired(e, now));

        match other {
            Some(live) => Err(EditError::EditConflict {
                package: package.to_string(),
                handle: handle.to_string(),
                live_handle: live.handle,
            }),
            None => Ok(()),
        }
    }

    fn resume_live(&self, package: &str, now: DateTime<Utc>) -> Result<Option<Edit>> {
        let mut live = Vec::new();
        for edit in self.store.list(package)? {
            if edit.state.is_terminal() || self.is_expired(&edit, now) {
                info!(package, handle = %edit.handle, state = %edit.state, "discarding stale local edit");
                self.store.delete(package, &edit.handle)?;
            } else {
                live.push(edit);
            }
        }

        live.sort_by_key(|e| e.last_used_at);
        let Some(mut edit) = live.pop() else {
            return Ok(None);
        };
        for other in &live {
            warn!(package, handle = %other.handle, "ignoring older live edit");
        }

        self.reset_interrupted_validation(&mut edit)?;
        debug!(package, handle = %edit.handle, "resuming live edit");
        Ok(Some(edit))
    }

    async fn create(&self, package: &str, now: DateTime<Utc>) -> Result<Edit> {
        let api = self.api(package, None, "create edit")?;
        let server_id = api
            .create_edit(package)
            .await
            .map_err(|source| EditError::remote(package, None, "create edit", source))?;

        let edit = Edit::new(package, server_id, now);
        if let Err(e) = self.store.save(&edit) {
            // Don't leave an untracked edit behind on the server
            let cleanup = api
                .delete_edit(package, &edit.server_id)
                .await
                .err()
                .map(|source| EditError::remote(package, Some(&edit.handle), "delete edit", source));
            return Err(e.with_cleanup(cleanup));
        }
        Ok(edit)
    }

    fn reset_interrupted_validation(&self, edit: &mut Edit) -> Result<()> {
        if edit.state == EditState::Validating {
            warn!(package = %edit.package_name, handle = %edit.handle, "validation was interrupted, back to draft");
            edit.state = EditState::Draft;
            self.store.save(edit)?;
        }
        Ok(())
    }

    async fn validate_locked(&self, edit: &mut Edit) -> Result<()> {
        if self.is_expired(edit, Utc::now()) {
            return Err(expired(edit, self.max_age));
        }
        let api = self.api(&edit.package_name, Some(&edit.handle), "validate edit")?;

        self.transition(edit, EditState::Validating)?;
        let remote = api.validate_edit(&edit.package_name, &edit.server_id).await;
        let restore = self.transition(edit, EditState::Draft);

        match remote {
            Ok(()) => {
                restore?;
                info!(package = %edit.package_name, handle = %edit.handle, "edit validated");
                Ok(())
            }
            Err(source) => {
                let err = EditError::remote(&edit.package_name, Some(&edit.handle), "validate edit", source);
                Err(err.with_cleanup(restore.err()))
            }
        }
    }

    async fn finalize_locked(&self, edit: &Edit, commit: bool) -> Result<FinalizeOutcome> {
        let package = edit.package_name.as_str();
        let now = Utc::now();

        if !commit {
            if self.store.load(package, &edit.handle)?.is_none() {
                return Err(EditError::EditNotFound {
                    package: package.to_string(),
                    handle: edit.handle.clone(),
                });
            }
            if self.is_expired(edit, now) {
                return Err(expired(edit, self.max_age));
            }
            let mut kept = edit.clone();
            kept.last_used_at = now;
            self.store.save(&kept)?;
            debug!(package, handle = %kept.handle, "edit kept open");
            return Ok(FinalizeOutcome::KeptOpen(kept));
        }

        let token = edit.commit_token();
        if self
            .idempotency
            .check_commit(package, &edit.server_id, &token)?
            .is_some()
        {
            info!(package, handle = %edit.handle, "edit already committed, skipping remote commit");
            self.store.delete(package, &edit.handle)?;
            return Ok(FinalizeOutcome::AlreadyCommitted);
        }

        if self.is_expired(edit, now) {
            return Err(expired(edit, self.max_age));
        }
        if !edit.state.can_transition_to(EditState::Committed) {
            return Err(invalid_transition(edit, EditState::Committed));
        }

        let api = self.api(package, Some(&edit.handle), "commit edit")?;
        api.commit_edit(package, &edit.server_id)
            .await
            .map_err(|source| EditError::remote(package, Some(&edit.handle), "commit edit", source))?;

        self.idempotency
            .record_commit(package, &edit.server_id, &token)?;
        self.store.delete(package, &edit.handle)?;
        info!(package, handle = %edit.handle, "edit committed");
        Ok(FinalizeOutcome::Committed)
    }

    async fn abort_locked(&self, edit: &Edit) -> Result<()> {
        let package = edit.package_name.as_str();
        if edit.state == EditState::Committed {
            return Err(invalid_transition(edit, EditState::Aborted));
        }

        let remote = match self.api(package, Some(&edit.handle), "delete edit") {
            Ok(api) => api
                .delete_edit(package, &edit.server_id)
                .await
                .map_err(|source| EditError::remote(package, Some(&edit.handle), "delete edit", source)),
            Err(e) => Err(e),
        };
        let local = self.store.delete(package, &edit.handle);

        match (remote, local) {
            (Ok(()), Ok(())) => {
                info!(package, handle = %edit.handle, "edit aborted");
                Ok(())
            }
            (Err(remote), local) => {
                warn!(package, handle = %edit.handle, error = %remote, "server edit not deleted, dropped locally");
                Err(remote.with_cleanup(local.err()))
            }
            (Ok(()), Err(local)) => Err(local),
        }
    }

    /// Cleanup for the cancellation path; returns the error to report
    fn cancelled(&mut self, edit: &Edit, was_created: bool) -> EditError {
        let package = edit.package_name.as_str();
        warn!(package, handle = %edit.handle, "cancelled, skipping finalize");

        let discard = if was_created {
            self.store.delete(package, &edit.handle).err()
        } else {
            None
        };
        let release = self.release(package).err();

        EditError::Cancelled {
            package: package.to_string(),
            handle: Some(edit.handle.clone()),
        }
        .with_cleanup(merge(discard, release))
    }

    fn transition(&self, edit: &mut Edit, next: EditState) -> Result<()> {
        if !edit.state.can_transition_to(next) {
            return Err(invalid_transition(edit, next));
        }
        debug!(package = %edit.package_name, handle = %edit.handle, from = %edit.state, to = %next, "edit transition");
        edit.state = next;

        if next.is_terminal() {
            self.store.delete(&edit.package_name, &edit.handle)
        } else {
            self.store.save(edit)
        }
    }

    fn load_existing(&self, package: &str, handle: &str) -> Result<Edit> {
        self.store
            .load(package, handle)?
            .ok_or_else(|| EditError::EditNotFound {
                package: package.to_string(),
                handle: handle.to_string(),
            })
    }

    fn api(&self, package: &str, handle: Option<&str>, operation: &'static str) -> Result<Arc<dyn EditsApi>> {
        self.api.clone().ok_or_else(|| {
            EditError::remote(package, handle, operation, "no publishing client configured".into())
        })
    }

    async fn take_or_acquire(&mut self, package: &str) -> Result<LockGuard> {
        match self.held.remove(package) {
            Some(guard) => Ok(guard),
            None => self.locks.acquire(package, &self.context).await,
        }
    }

    /// Lock for a single call; `owned` means it was not already held
    async fn borrow_lock(&mut self, package: &str) -> Result<(LockGuard, bool)> {
        match self.held.remove(package) {
            Some(guard) => Ok((guard, false)),
            None => Ok((self.locks.acquire(package, &self.context).await?, true)),
        }
    }

    fn return_lock(&mut self, guard: LockGuard, owned: bool) -> Option<EditError> {
        if owned {
            guard.release().err()
        } else {
            self.held.insert(guard.package().to_string(), guard);
            None
        }
    }
}

impl std::fmt::Debug for EditManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditManager")
            .field("root", &self.layout.root())
            .field("max_age", &self.max_age)
            .field("has_api", &self.api.is_some())
            .field("held", &self.held.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn finish<T>(result: Result<T>, cleanup: Option<EditError>) -> Result<T> {
    if let Some(cleanup) = &cleanup {
        warn!(error = %cleanup, "cleanup failed");
    }
    match result {
        Ok(value) => Ok(value),
        Err(e) => Err(e.with_cleanup(cleanup)),
    }
}

fn merge(first: Option<EditError>, second: Option<EditError>) -> Option<EditError> {
    match (first, second) {
        (Some(first), second) => Some(first.with_cleanup(second)),
        (None, second) => second,
    }
}

fn expired(edit: &Edit, max_age: Duration) -> EditError {
    EditError::EditExpired {
        package: edit.package_name.clone(),
        handle: edit.handle.clone(),
        created_at: edit.created_at,
        max_age,
    }
}

fn invalid_transition(edit: &Edit, to: EditState) -> EditError {
    EditError::InvalidTransition {
        package: edit.package_name.clone(),
        handle: edit.handle.clone(),
        from: edit.state,
        to,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    const APP: &str = "com.example.app";

    #[derive(Default)]
    struct FakeApi {
        created: AtomicUsize,
        validated: AtomicUsize,
        committed: AtomicUsize,
        deleted: AtomicUsize,
        fail_commit: AtomicBool,
        fail_validate: AtomicBool,
    }

    #[async_trait::async_trait]
    impl EditsApi for FakeApi {
        async fn create_edit(&self, _package: &str) -> std::result::Result<String, RemoteError> {
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("srv-{}", n))
        }

        async fn validate_edit(&self, _package: &str, _edit_id: &str) -> std::result::Result<(), RemoteError> {
            self.validated.fetch_add(1, Ordering::SeqCst);
            if self.fail_validate.load(Ordering::SeqCst) {
                return Err("listing is incomplete".into());
            }
            Ok(())
        }

        async fn commit_edit(&self, _package: &str, _edit_id: &str) -> std::result::Result<(), RemoteError> {
            if self.fail_commit.load(Ordering::SeqCst) {
                return Err("503 backend unavailable".into());
            }
            self.committed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn delete_edit(&self, _package: &str, _edit_id: &str) -> std::result::Result<(), RemoteError> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(temp: &TempDir, api: &Arc<FakeApi>) -> EditManager {
        EditManager::new(StoreLayout::new(temp.path()), &EditsConfig::default())
            .with_api(api.clone())
            .with_context("test")
    }

    fn old_edit(handle: &str, age: chrono::Duration) -> Edit {
        let created = Utc::now() - age;
        Edit::new(APP, handle, created)
    }

    #[test]
    fn test_is_expired_boundary() {
        let max_age = Duration::from_secs(3600);
        let edit = Edit::new(APP, "e1", Utc::now());
        let at = |secs: i64| edit.created_at + chrono::Duration::seconds(secs);

        assert!(!is_expired(&edit, at(3599), max_age));
        assert!(!is_expired(&edit, at(3600), max_age));
        assert!(is_expired(&edit, at(3601), max_age));
    }

    #[tokio::test]
    async fn test_open_keep_open_resume_commit() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);

        let opened = edits.open(APP, None).await.unwrap();
        assert!(opened.was_created);
        let handle = opened.edit.handle.clone();

        let kept = match edits.finalize(&opened.edit, false).await.unwrap() {
            FinalizeOutcome::KeptOpen(edit) => edit,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert!(kept.last_used_at >= opened.edit.last_used_at);
        let stored = edits.list_edits(APP).unwrap();
        assert_eq!(stored, vec![kept.clone()]);

        let resumed = edits.open(APP, Some(&handle)).await.unwrap();
        assert!(!resumed.was_created);
        assert_eq!(resumed.edit.server_id, opened.edit.server_id);

        let outcome = edits.finalize(&resumed.edit, true).await.unwrap();
        assert_eq!(outcome, FinalizeOutcome::Committed);
        assert!(edits.list_edits(APP).unwrap().is_empty());
        assert!(edits
            .idempotency()
            .check_commit(APP, &resumed.edit.server_id, &resumed.edit.commit_token())
            .unwrap()
            .is_some());
        assert!(edits
            .idempotency()
            .find_commit(APP, &resumed.edit.server_id)
            .unwrap()
            .is_some());
        assert!(edits.locks().inspect(APP).unwrap().is_none());
        assert_eq!(api.created.load(Ordering::SeqCst), 1);
        assert_eq!(api.committed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_commit_twice_contacts_server_once() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);

        let opened = edits.open(APP, None).await.unwrap();
        assert_eq!(edits.finalize(&opened.edit, true).await.unwrap(), FinalizeOutcome::Committed);
        assert_eq!(
            edits.finalize(&opened.edit, true).await.unwrap(),
            FinalizeOutcome::AlreadyCommitted
        );
        assert_eq!(api.committed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_conflicts_while_lock_held() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut first = manager(&temp, &api);
        let mut second = manager(&temp, &api);

        let opened = first.open(APP, None).await.unwrap();
        let err = second.open(APP, None).await.unwrap_err();
        assert!(err.is_lock_conflict());
        assert!(first.open(APP, None).await.unwrap_err().is_lock_conflict());

        first.finalize(&opened.edit, false).await.unwrap();
        let again = second.open(APP, None).await.unwrap();
        assert_eq!(again.edit.handle, opened.edit.handle);
        assert!(!again.was_created);
    }

    #[tokio::test]
    async fn test_other_packages_do_not_contend() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);

        edits.open(APP, None).await.unwrap();
        edits.open("com.example.other", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_handle_is_rejected() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);
        let stale = old_edit("srv-old", chrono::Duration::hours(25));
        EditStore::new(edits.layout().edits_dir()).save(&stale).unwrap();

        let err = edits.open(APP, Some("srv-old")).await.unwrap_err();
        assert!(err.is_expired());
        assert!(err.to_string().contains("srv-old"));
        // Lock was released on the failure path
        assert!(edits.locks().inspect(APP).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_without_handle_replaces_expired_edit() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);
        let store = EditStore::new(edits.layout().edits_dir());
        store.save(&old_edit("srv-old", chrono::Duration::hours(25))).unwrap();

        let opened = edits.open(APP, None).await.unwrap();
        assert!(opened.was_created);
        let handles: Vec<String> = edits.list_edits(APP).unwrap().into_iter().map(|e| e.handle).collect();
        assert_eq!(handles, vec![opened.edit.handle]);
    }

    #[tokio::test]
    async fn test_open_without_handle_resumes_live_edit() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);
        let store = EditStore::new(edits.layout().edits_dir());
        let mut interrupted = old_edit("srv-live", chrono::Duration::minutes(5));
        interrupted.state = EditState::Validating;
        store.save(&interrupted).unwrap();

        let opened = edits.open(APP, None).await.unwrap();
        assert!(!opened.was_created);
        assert_eq!(opened.edit.handle, "srv-live");
        assert_eq!(opened.edit.state, EditState::Draft);
        assert_eq!(api.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_handle_is_used_as_server_id() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);

        let opened = edits.open(APP, Some("0987654321")).await.unwrap();
        assert!(!opened.was_created);
        assert_eq!(opened.edit.server_id, "0987654321");
        assert_eq!(edits.list_edits(APP).unwrap().len(), 1);
        assert_eq!(api.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_handle_refused_while_another_edit_is_live() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);

        let opened = edits.open(APP, None).await.unwrap();
        edits.finalize(&opened.edit, false).await.unwrap();

        let err = edits.open(APP, Some("foreign-edit")).await.unwrap_err();
        match err.primary() {
            EditError::EditConflict { handle, live_handle, .. } => {
                assert_eq!(handle, "foreign-edit");
                assert_eq!(live_handle, &opened.edit.handle);
            }
            other => panic!("unexpected error: {other}"),
        }

        let handles: Vec<String> = edits.list_edits(APP).unwrap().into_iter().map(|e| e.handle).collect();
        assert_eq!(handles, vec![opened.edit.handle.clone()]);
        assert!(edits.locks().inspect(APP).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_named_handle_refused_while_another_edit_is_live() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);
        let store = EditStore::new(edits.layout().edits_dir());
        store.save(&old_edit("srv-a", chrono::Duration::minutes(10))).unwrap();
        store.save(&old_edit("srv-b", chrono::Duration::minutes(5))).unwrap();

        let err = edits.open(APP, Some("srv-a")).await.unwrap_err();
        assert!(matches!(
            err.primary(),
            EditError::EditConflict { live_handle, .. } if live_handle == "srv-b"
        ));

        // Expired or finished records do not count as live
        store.delete(APP, "srv-b").unwrap();
        store.save(&old_edit("srv-old", chrono::Duration::hours(25))).unwrap();
        let resumed = edits.open(APP, Some("srv-a")).await.unwrap();
        assert_eq!(resumed.edit.handle, "srv-a");
        edits.finalize(&resumed.edit, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_edit_and_releases_lock() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);

        let opened = edits.open(APP, None).await.unwrap();
        api.fail_commit.store(true, Ordering::SeqCst);

        let err = edits.finalize(&opened.edit, true).await.unwrap_err();
        assert!(matches!(err, EditError::Remote { operation: "commit edit", .. }));
        assert_eq!(edits.list_edits(APP).unwrap().len(), 1);
        assert!(edits.locks().inspect(APP).unwrap().is_none());

        // Retry succeeds and commits exactly once
        api.fail_commit.store(false, Ordering::SeqCst);
        let resumed = edits.open(APP, Some(&opened.edit.handle)).await.unwrap();
        assert_eq!(edits.finalize(&resumed.edit, true).await.unwrap(), FinalizeOutcome::Committed);
        assert_eq!(api.committed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_commits() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);

        let outcome = edits
            .run(APP, None, true, std::future::pending(), |edit| async move {
                Ok(edit.server_id.len())
            })
            .await
            .unwrap();

        assert!(outcome.was_created);
        assert_eq!(outcome.value, "srv-1".len());
        assert_eq!(outcome.finalized, FinalizeOutcome::Committed);
        assert!(edits.locks().inspect(APP).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_aborts_created_edit_on_error() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);

        let err = edits
            .run(APP, None, true, std::future::pending(), |edit| async move {
                Err::<(), _>(EditError::remote(APP, Some(&edit.handle), "upload", "413 too large".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EditError::Remote { operation: "upload", .. }));
        assert_eq!(api.deleted.load(Ordering::SeqCst), 1);
        assert!(edits.list_edits(APP).unwrap().is_empty());
        assert!(edits.locks().inspect(APP).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_keeps_resumed_edit_on_error() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);
        let opened = edits.open(APP, None).await.unwrap();
        edits.finalize(&opened.edit, false).await.unwrap();

        let err = edits
            .run(APP, Some(&opened.edit.handle), true, std::future::pending(), |_| async {
                Err::<(), _>(EditError::remote(APP, None, "upload", "timeout".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EditError::Remote { .. }));
        assert_eq!(api.deleted.load(Ordering::SeqCst), 0);
        assert_eq!(edits.list_edits(APP).unwrap().len(), 1);
        assert!(edits.locks().inspect(APP).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_cancelled_skips_finalize_and_releases_lock() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);
        let opened = edits.open(APP, None).await.unwrap();
        edits.finalize(&opened.edit, false).await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let cancel = async move {
            let _ = rx.await;
        };

        let err = edits
            .run(APP, Some(&opened.edit.handle), true, cancel, |_| async move {
                let _ = tx.send(());
                std::future::pending::<Result<()>>().await
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EditError::Cancelled { .. }));
        assert_eq!(api.committed.load(Ordering::SeqCst), 0);
        assert_eq!(edits.list_edits(APP).unwrap().len(), 1);
        assert!(edits.locks().inspect(APP).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validate_returns_to_draft() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);
        let mut edit = edits.open(APP, None).await.unwrap().edit;

        edits.validate(&mut edit).await.unwrap();
        assert_eq!(edit.state, EditState::Draft);

        api.fail_validate.store(true, Ordering::SeqCst);
        let err = edits.validate(&mut edit).await.unwrap_err();
        assert!(matches!(err, EditError::Remote { operation: "validate edit", .. }));
        assert_eq!(edit.state, EditState::Draft);
        assert_eq!(api.validated.load(Ordering::SeqCst), 2);

        // Lock is still held by the open session
        assert!(edits.locks().inspect(APP).unwrap().is_some());
        edits.finalize(&edit, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_deletes_everywhere() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut edits = manager(&temp, &api);
        let opened = edits.open(APP, None).await.unwrap();

        edits.abort(&opened.edit).await.unwrap();
        assert_eq!(api.deleted.load(Ordering::SeqCst), 1);
        assert!(edits.list_edits(APP).unwrap().is_empty());
        assert!(edits.locks().inspect(APP).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_state_enforces_transitions() {
        let temp = TempDir::new().unwrap();
        let mut edits = EditManager::new(StoreLayout::new(temp.path()), &EditsConfig::default());
        EditStore::new(edits.layout().edits_dir())
            .save(&Edit::new(APP, "e1", Utc::now()))
            .unwrap();

        let edit = edits.update_state(APP, "e1", EditState::Validating).await.unwrap();
        assert_eq!(edit.state, EditState::Validating);

        let err = edits.update_state(APP, "e1", EditState::Committed).await.unwrap_err();
        assert!(matches!(err, EditError::InvalidTransition { .. }));

        edits.update_state(APP, "e1", EditState::Aborted).await.unwrap();
        assert!(edits.list_edits(APP).unwrap().is_empty());
        assert!(edits.locks().inspect(APP).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_edit_is_not_found() {
        let temp = TempDir::new().unwrap();
        let mut edits = EditManager::new(StoreLayout::new(temp.path()), &EditsConfig::default());

        let err = edits.delete_edit(APP, "nope").await.unwrap_err();
        assert!(matches!(err, EditError::EditNotFound { .. }));
    }

    #[tokio::test]
    async fn test_open_without_client_fails_cleanly() {
        let temp = TempDir::new().unwrap();
        let mut edits = EditManager::new(StoreLayout::new(temp.path()), &EditsConfig::default());

        let err = edits.open(APP, None).await.unwrap_err();
        assert!(matches!(err, EditError::Remote { operation: "create edit", .. }));
        assert!(edits.locks().inspect(APP).unwrap().is_none());
    }
}
