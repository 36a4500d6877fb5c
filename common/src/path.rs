//! Destination path normalisation and validation.
//!
//! User-supplied destination subdirectories and filenames are untrusted. This
//! module turns them into paths that are guaranteed to sit beneath a trusted
//! models root, rejecting absolute paths, drive letters, parent-directory
//! references, and empty segments. Validation is purely lexical: nothing here
//! touches the filesystem or resolves symlinks.

use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use thiserror::Error;

/// Subdirectory used when the caller leaves the destination blank.
pub const DEFAULT_SUBDIRECTORY: &str = "checkpoints";

/// Why a user-supplied path was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPathReason {
    /// The path is absolute (POSIX root, rooted backslash, or drive letter).
    Absolute,
    /// The path contains a `..` sequence before or after normalisation.
    ParentReference,
    /// Normalisation produced an empty segment.
    EmptySegment,
    /// A filename contained a path separator.
    Separator,
    /// The value contained a NUL byte.
    Nul,
    /// A filename was empty or a bare `.`.
    EmptyName,
}

impl fmt::Display for InvalidPathReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Absolute => {
                "absolute paths (including drive letters) are not allowed; use relative paths only"
            }
            Self::ParentReference => {
                "parent directory references (..) are not allowed for security reasons"
            }
            Self::EmptySegment => "empty path components are not allowed",
            Self::Separator => "filenames must not contain path separators",
            Self::Nul => "NUL bytes are not allowed",
            Self::EmptyName => "filenames must not be empty",
        };
        f.write_str(text)
    }
}

/// An untrusted path was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid path '{value}': {reason}")]
pub struct InvalidPathError {
    /// The rejected input, verbatim.
    pub value: String,
    /// The rule the input broke.
    pub reason: InvalidPathReason,
}

impl InvalidPathError {
    fn new(value: &str, reason: InvalidPathReason) -> Self {
        Self {
            value: value.to_owned(),
            reason,
        }
    }
}

/// A validated, `/`-separated relative subdirectory.
///
/// # Examples
///
/// ```
/// use weightsync_common::path::RelativeSubpath;
///
/// let subpath = RelativeSubpath::parse("loras\\SDXL/").expect("valid subpath");
/// assert_eq!(subpath.as_str(), "loras/SDXL");
///
/// assert!(RelativeSubpath::parse("../outside").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelativeSubpath(String);

impl RelativeSubpath {
    /// Normalise and validate an untrusted subdirectory.
    ///
    /// Blank input resolves to [`DEFAULT_SUBDIRECTORY`].
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPathError`] when the input is absolute, references a
    /// parent directory, or normalises to a path with an empty segment.
    pub fn parse(raw: &str) -> Result<Self, InvalidPathError> {
        if raw.trim().is_empty() {
            return Ok(Self(DEFAULT_SUBDIRECTORY.to_owned()));
        }
        if raw.contains('\0') {
            return Err(InvalidPathError::new(raw, InvalidPathReason::Nul));
        }
        if is_absolute(raw) {
            return Err(InvalidPathError::new(raw, InvalidPathReason::Absolute));
        }
        if raw.contains("..") {
            return Err(InvalidPathError::new(raw, InvalidPathReason::ParentReference));
        }

        let normalised = normalise_separators(raw);
        if normalised.is_empty() {
            return Ok(Self(DEFAULT_SUBDIRECTORY.to_owned()));
        }
        // Re-check: some inputs only spell `..` once separators are folded.
        if normalised.contains("..") {
            return Err(InvalidPathError::new(raw, InvalidPathReason::ParentReference));
        }
        if normalised.split('/').any(str::is_empty) {
            return Err(InvalidPathError::new(raw, InvalidPathReason::EmptySegment));
        }
        Ok(Self(normalised))
    }

    /// Return the normalised subpath.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append a further validated subpath.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        Self(format!("{}/{}", self.0, other.0))
    }
}

impl fmt::Display for RelativeSubpath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a single filename that will be joined onto a resolved directory.
///
/// # Errors
///
/// Returns [`InvalidPathError`] when the name is empty, contains a separator
/// or NUL byte, or is a `.`/`..` reference.
///
/// # Examples
///
/// ```
/// use weightsync_common::path::validate_filename;
///
/// assert!(validate_filename("model.safetensors").is_ok());
/// assert!(validate_filename("../model.safetensors").is_err());
/// ```
pub fn validate_filename(name: &str) -> Result<&str, InvalidPathError> {
    if name.trim().is_empty() || name == "." {
        return Err(InvalidPathError::new(name, InvalidPathReason::EmptyName));
    }
    if name.contains('\0') {
        return Err(InvalidPathError::new(name, InvalidPathReason::Nul));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(InvalidPathError::new(name, InvalidPathReason::Separator));
    }
    if name == ".." {
        return Err(InvalidPathError::new(name, InvalidPathReason::ParentReference));
    }
    if is_absolute(name) {
        return Err(InvalidPathError::new(name, InvalidPathReason::Absolute));
    }
    Ok(name)
}

/// A destination directory and file path rooted under a trusted directory.
///
/// Constructed only from validated parts, so the file path is always a strict
/// descendant of the root it was resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    subpath: RelativeSubpath,
    directory: Utf8PathBuf,
    file_path: Utf8PathBuf,
}

impl ResolvedTarget {
    /// Resolve an untrusted subdirectory and filename against `root`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPathError`] if either part fails validation.
    ///
    /// # Examples
    ///
    /// ```
    /// use camino::Utf8Path;
    /// use weightsync_common::path::ResolvedTarget;
    ///
    /// let target = ResolvedTarget::resolve(Utf8Path::new("/models"), "loras/SDXL", "a.bin")
    ///     .expect("valid target");
    /// assert_eq!(target.file_path(), "/models/loras/SDXL/a.bin");
    /// ```
    pub fn resolve(
        root: &Utf8Path,
        subdirectory: &str,
        filename: &str,
    ) -> Result<Self, InvalidPathError> {
        let subpath = RelativeSubpath::parse(subdirectory)?;
        Self::from_subpath(root, subpath, filename)
    }

    /// Resolve an already-validated subpath and an untrusted filename.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPathError`] if the filename fails validation.
    pub fn from_subpath(
        root: &Utf8Path,
        subpath: RelativeSubpath,
        filename: &str,
    ) -> Result<Self, InvalidPathError> {
        let name = validate_filename(filename)?;
        let directory = root.join(subpath.as_str());
        let file_path = directory.join(name);
        Ok(Self {
            subpath,
            directory,
            file_path,
        })
    }

    /// Replace the final path component, keeping the directory.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPathError`] if the new filename fails validation.
    pub fn with_filename(&self, filename: &str) -> Result<Self, InvalidPathError> {
        let name = validate_filename(filename)?;
        Ok(Self {
            subpath: self.subpath.clone(),
            directory: self.directory.clone(),
            file_path: self.directory.join(name),
        })
    }

    /// The normalised subpath relative to the root.
    #[must_use]
    pub fn subpath(&self) -> &RelativeSubpath {
        &self.subpath
    }

    /// The absolute destination directory.
    #[must_use]
    pub fn directory(&self) -> &Utf8Path {
        &self.directory
    }

    /// The absolute destination file path.
    #[must_use]
    pub fn file_path(&self) -> &Utf8Path {
        &self.file_path
    }

    /// The final path component.
    #[must_use]
    pub fn filename(&self) -> &str {
        self.file_path.file_name().unwrap_or_default()
    }
}

fn is_absolute(raw: &str) -> bool {
    if raw.starts_with('/') || raw.starts_with('\\') {
        return true;
    }
    let mut chars = raw.chars();
    matches!((chars.next(), chars.next()), (Some(_), Some(':')))
}

/// Fold `\` into `/`, drop empty and `.` segments, and trim separators.
fn normalise_separators(raw: &str) -> String {
    raw.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}
