//! Content hashing for artifacts
//!
//! SHA-256 over the file bytes, rendered as lowercase hex. Both entry points
//! share one streaming loop, so the progress variant cannot change the digest.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{EditError, Result};

const BUFFER_SIZE: usize = 64 * 1024;

/// Minimum spacing between progress callbacks
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// SHA-256 of a file as lowercase hex
pub fn hash_file(path: &Path) -> Result<String> {
    hash_stream(path, None::<fn(u64, u64)>)
}

/// Same digest as [`hash_file`], reporting `(bytes_processed, total_bytes)`.
///
/// The callback fires at most once per [`PROGRESS_INTERVAL`] and once more
/// when the whole file has been read.
pub fn hash_file_with_progress<F>(path: &Path, on_progress: F) -> Result<String>
where
    F: FnMut(u64, u64),
{
    hash_stream(path, Some(on_progress))
}

/// SHA-256 of an in-memory buffer as lowercase hex
pub fn hash_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn hash_stream<F>(path: &Path, on_progress: Option<F>) -> Result<String>
where
    F: FnMut(u64, u64),
{
    let hash_err = |source| EditError::Hash {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(hash_err)?;
    let total = file.metadata().map_err(hash_err)?.len();

    let (digest, processed) =
        hash_reader(file, total, PROGRESS_INTERVAL, on_progress).map_err(hash_err)?;
    debug!(path = %path.display(), bytes = processed, %digest, "hashed file");
    Ok(digest)
}

/// Stream `reader` through SHA-256, reporting progress at most once per
/// `interval` plus once at the end. Returns the digest and bytes read.
fn hash_reader<R, F>(
    mut reader: R,
    total: u64,
    interval: Duration,
    mut on_progress: Option<F>,
) -> std::io::Result<(String, u64)>
where
    R: Read,
    F: FnMut(u64, u64),
{
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut processed = 0u64;
    let mut last_report: Option<Instant> = None;

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
        processed += read as u64;

        if let Some(callback) = on_progress.as_mut() {
            let due = last_report.map_or(true, |at| at.elapsed() >= interval);
            if due {
                callback(processed, total);
                last_report = Some(Instant::now());
            }
        }
    }

    if let Some(callback) = on_progress.as_mut() {
        callback(processed, total.max(processed));
    }

    Ok((format!("{:x}", hasher.finalize()), processed))
}
