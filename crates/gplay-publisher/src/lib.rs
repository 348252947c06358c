//! Google Play Developer API client for gplay
//!
//! [`PlayPublisher`] authenticates with a service account and implements
//! [`gplay_edits::EditsApi`], so the edit manager can create, validate,
//! commit and delete edits through it. Binary uploads go through
//! [`upload_with_dedup`], which never sends the same bytes twice.
//!
//! ## Usage
//!
//! ```ignore
//! use gplay_publisher::PlayPublisher;
//!
//! let publisher = Arc::new(PlayPublisher::new(&key_path)?);
//! let mut edits = EditManager::from_config(&config.edits)?.with_api(publisher.clone());
//! ```

pub mod client;
pub mod error;
pub mod upload;

pub use client::{track_update, BinaryKind, PlayPublisher};
pub use error::{PublisherError, Result};
pub use upload::{upload_with_dedup, BundleUploader};
