//! Edit transactions and idempotency for gplay
//!
//! Publishing to Google Play goes through server-side "edits": open one,
//! stage uploads and track changes, then commit. This crate keeps those
//! edits safe across process boundaries:
//!
//! - **Locks**: one process per package at a time, with stale-lock reclaim
//! - **Edit store**: durable records so an edit can be resumed later
//! - **Idempotency cache**: a retried commit or upload is not repeated
//! - **Artifact cache**: identical binaries are never uploaded twice
//! - **Lifecycle**: [`EditManager`] ties it together
//!
//! ## Usage
//!
//! ```ignore
//! use gplay_edits::{EditManager, StoreLayout};
//!
//! let mut edits = EditManager::from_config(&config.edits)?.with_api(client);
//! let outcome = edits
//!     .run(package, None, true, tokio::signal::ctrl_c().map(|_| ()), |edit| async move {
//!         // stage changes against edit.server_id
//!         Ok(())
//!     })
//!     .await?;
//! ```

pub mod api;
pub mod artifacts;
pub mod error;
pub mod hash;
pub mod idempotency;
pub mod layout;
pub mod lock;
pub mod manager;
pub mod store;
pub mod types;
pub mod uploads;

pub use api::EditsApi;
pub use artifacts::{ArtifactCache, CachedArtifact};
pub use error::{EditError, RemoteError, Result};
pub use hash::{hash_bytes, hash_file, hash_file_with_progress};
pub use idempotency::{IdempotencyCache, IdempotencyRecord, IdempotentResult, OperationKey};
pub use layout::StoreLayout;
pub use lock::{LockGuard, LockManager, LockOwner};
pub use manager::{is_expired, EditManager, FinalizeOutcome, OpenedEdit, RunOutcome};
pub use store::EditStore;
pub use types::{Edit, EditState};
pub use uploads::{UploadDeduplicator, UploadOutcome, UploadSource};
