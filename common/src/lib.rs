//! Shared primitives for weightsync: destination path validation, source
//! provider classification, and SHA-256 digest handling.
//!
//! Nothing in this crate performs network or filesystem I/O; the fetcher
//! crate builds its effects on top of these pure helpers.

pub mod digest;
pub mod path;
pub mod provider;

pub use digest::{DigestError, Sha256Digest};
pub use path::{
    DEFAULT_SUBDIRECTORY, InvalidPathError, InvalidPathReason, RelativeSubpath, ResolvedTarget,
    validate_filename,
};
pub use provider::{DEFAULT_FILENAME, Provider, TreeLocation, content_disposition_filename};
