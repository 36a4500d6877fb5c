//! SHA-256 verification of files on disk.

use std::fs;
use std::io::{self, Read};

use camino::Utf8Path;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use weightsync_common::Sha256Digest;

const READ_CHUNK: usize = 8192;

/// Compute the SHA-256 digest of the file at `path`.
///
/// Reads the file in fixed-size chunks so multi-gigabyte checkpoints never
/// sit in memory.
///
/// # Errors
///
/// Returns the underlying I/O error when the file cannot be opened or read.
pub fn hash_file(path: &Utf8Path) -> io::Result<Sha256Digest> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; READ_CHUNK];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(buffer.get(..bytes_read).unwrap_or_default());
    }
    let hex = format!("{:x}", hasher.finalize());
    Sha256Digest::try_from(hex).map_err(io::Error::other)
}

/// Check `path` against an optional expected digest.
///
/// A missing or blank expectation always verifies. Comparison ignores case.
/// Any read failure counts as a mismatch rather than an error.
///
/// # Examples
///
/// ```
/// use camino::Utf8PathBuf;
/// use weightsync_fetcher::verify::verify_file;
///
/// let dir = tempfile::tempdir().expect("tempdir");
/// let path = Utf8PathBuf::from_path_buf(dir.path().join("empty.bin")).expect("utf8");
/// std::fs::write(&path, b"").expect("write");
/// let empty = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
/// assert!(verify_file(&path, Some(empty)));
/// assert!(verify_file(&path, None));
/// assert!(!verify_file(&path, Some(&"0".repeat(64))));
/// ```
#[must_use]
pub fn verify_file(path: &Utf8Path, expected: Option<&str>) -> bool {
    let Some(expected) = expected.map(str::trim).filter(|e| !e.is_empty()) else {
        return true;
    };
    match hash_file(path) {
        Ok(actual) if actual.matches(expected) => {
            debug!("hash verified for {path}");
            true
        }
        Ok(actual) => {
            warn!("hash mismatch for {path}: expected {expected}, got {actual}");
            false
        }
        Err(err) => {
            warn!("could not hash {path}: {err}");
            false
        }
    }
}
