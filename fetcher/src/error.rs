//! Error type for single-artifact fetches.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;
use weightsync_common::InvalidPathError;

use crate::transfer::TransferError;

/// Why a fetch did not produce a verified file.
///
/// Only [`FetchError::TransferExhausted`] and [`FetchError::HashMismatch`]
/// arise after retries; every other variant is fatal on first occurrence.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No URL was supplied.
    #[error("URL is empty")]
    EmptyUrl,
    /// The URL belongs to no supported provider.
    #[error("unsupported URL {url}; only Hugging Face and CivitAI are supported")]
    UnsupportedSource {
        /// Rejected URL.
        url: String,
    },
    /// The URL names a remote directory, which must be mirrored instead.
    #[error("{url} is a directory; mirror it instead")]
    DirectorySource {
        /// Rejected URL.
        url: String,
    },
    /// The destination subdirectory or filename was rejected.
    #[error(transparent)]
    InvalidPath(#[from] InvalidPathError),
    /// Every attempt failed at the transfer stage.
    #[error("download failed after {attempts} attempts - {source}")]
    TransferExhausted {
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        #[source]
        source: TransferError,
    },
    /// The final attempt produced a file with the wrong digest.
    #[error("hash verification failed after {attempts} attempts (expected {expected}, got {actual})")]
    HashMismatch {
        /// Attempts made.
        attempts: u32,
        /// Digest the caller expected.
        expected: String,
        /// Digest of the last downloaded file, or why it could not be read.
        actual: String,
    },
    /// An existing file failed verification and could not be removed.
    #[error("failed to remove unverified file {path}: {source}")]
    RemoveStale {
        /// File that could not be removed.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The caller cancelled the fetch.
    #[error("download of {url} was cancelled")]
    Cancelled {
        /// Requested URL.
        url: String,
    },
}

impl FetchError {
    /// Whether the failure came from cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
