//! Recursive mirroring of a remote repository directory.
//!
//! A mirror enumerates every file beneath a remote path, drops excluded base
//! names, and fetches the rest into a local destination that reproduces the
//! remote layout. Per-file failures are collected rather than aborting the
//! run; only a listing failure or cancellation stops it.

use std::collections::BTreeSet;

use camino::Utf8Path;
use log::{debug, info, warn};
use thiserror::Error;
use weightsync_common::{InvalidPathError, Provider, RelativeSubpath, ResolvedTarget};

use crate::cancel::CancelToken;
use crate::ledger::{DirectoryRecord, Ledger, LedgerEntry, LedgerRecord, RemoteTreeRecord};
use crate::listing::{ListingError, RemoteTreeNode, TreeLister, list_tree};
use crate::report::MirrorReport;
use crate::retry::{DEFAULT_MAX_ATTEMPTS, FetchRequest, Fetcher};
use crate::transfer::Transport;

/// Errors that stop a mirror before or during the file loop.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The remote tree could not be enumerated.
    #[error("failed to list remote tree: {0}")]
    Listing(#[from] ListingError),
    /// The local destination was rejected.
    #[error(transparent)]
    InvalidDestination(#[from] InvalidPathError),
    /// The caller cancelled the mirror.
    #[error("mirror of {repo_id} was cancelled")]
    Cancelled {
        /// Repository being mirrored.
        repo_id: String,
    },
}

/// How the mirrored directory should be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOrigin {
    /// Requested by repository id; recorded as `huggingface_directory`.
    Repository,
    /// Requested by a `/tree/` URL; recorded as `directory`.
    TreeUrl(String),
}

/// Inputs for one mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRequest {
    /// `owner/name` repository identifier.
    pub repo_id: String,
    /// Branch, tag, or commit.
    pub revision: String,
    /// Remote directory to mirror; empty for the repository root.
    pub subpath: String,
    /// Untrusted destination subdirectory under the models root.
    pub destination: String,
    /// Base filenames to skip.
    pub exclude: Vec<String>,
    /// Attempt bound for each file.
    pub max_attempts: u32,
    /// Whether to upsert a directory-level ledger entry.
    pub record: bool,
    /// Ledger shape for the directory-level entry.
    pub origin: MirrorOrigin,
}

impl MirrorRequest {
    /// Mirror the root of `repo_id` at `main` into `destination`.
    #[must_use]
    pub fn new(repo_id: &str, destination: &str) -> Self {
        Self {
            repo_id: repo_id.to_owned(),
            revision: "main".to_owned(),
            subpath: String::new(),
            destination: destination.to_owned(),
            exclude: Vec::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            record: true,
            origin: MirrorOrigin::Repository,
        }
    }

    /// Use `revision` instead of `main`.
    #[must_use]
    pub fn with_revision(mut self, revision: &str) -> Self {
        self.revision = revision.to_owned();
        self
    }

    /// Mirror only the remote directory `subpath`.
    #[must_use]
    pub fn with_subpath(mut self, subpath: &str) -> Self {
        self.subpath = subpath.trim_matches('/').to_owned();
        self
    }

    /// Skip files whose base name is in `names`.
    #[must_use]
    pub fn with_exclusions(mut self, names: Vec<String>) -> Self {
        self.exclude = names;
        self
    }

    /// Set the per-file attempt bound.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Whether to upsert a directory-level ledger entry.
    #[must_use]
    pub const fn recording(mut self, record: bool) -> Self {
        self.record = record;
        self
    }

    /// Record the mirror under `origin`.
    #[must_use]
    pub fn with_origin(mut self, origin: MirrorOrigin) -> Self {
        self.origin = origin;
        self
    }

    fn revision(&self) -> &str {
        let trimmed = self.revision.trim();
        if trimmed.is_empty() { "main" } else { trimmed }
    }

    fn exclusion_set(&self) -> BTreeSet<&str> {
        self.exclude
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

/// Mirrors remote directories beneath a models root.
pub struct DirectoryMirror<'a> {
    lister: &'a dyn TreeLister,
    transport: &'a dyn Transport,
    models_root: &'a Utf8Path,
    ledger: Option<&'a Ledger>,
    cancel: CancelToken,
}

impl<'a> DirectoryMirror<'a> {
    /// A mirror writing beneath `models_root` without a ledger.
    #[must_use]
    pub fn new(
        lister: &'a dyn TreeLister,
        transport: &'a dyn Transport,
        models_root: &'a Utf8Path,
    ) -> Self {
        Self {
            lister,
            transport,
            models_root,
            ledger: None,
            cancel: CancelToken::new(),
        }
    }

    /// Record directory-level provenance in `ledger`.
    #[must_use]
    pub const fn with_ledger(mut self, ledger: &'a Ledger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Stop between files once `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Enumerate every file beneath the requested remote path.
    ///
    /// # Errors
    ///
    /// Returns [`ListingError`] when any directory listing fails.
    pub fn list(&self, request: &MirrorRequest) -> Result<Vec<RemoteTreeNode>, ListingError> {
        list_tree(
            self.lister,
            &request.repo_id,
            request.revision(),
            &request.subpath,
        )
    }

    /// Mirror the requested remote directory.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError`] when the destination is invalid, the listing
    /// fails, or the run is cancelled. Individual file failures are reported
    /// in [`MirrorReport::failed`].
    pub fn mirror(&self, request: &MirrorRequest) -> Result<MirrorReport, MirrorError> {
        let destination = RelativeSubpath::parse(&request.destination)?;
        let files = self.list(request)?;
        let excluded_names = request.exclusion_set();
        let mut report = MirrorReport {
            total: files.len(),
            ..MirrorReport::default()
        };
        info!(
            "mirroring {} file(s) from {}@{} into {destination}",
            files.len(),
            request.repo_id,
            request.revision()
        );

        let fetcher = Fetcher::new(self.transport, self.models_root).with_cancel(self.cancel.clone());
        for node in &files {
            if self.cancel.is_cancelled() {
                return Err(MirrorError::Cancelled {
                    repo_id: request.repo_id.clone(),
                });
            }
            if excluded_names.contains(node.name()) {
                debug!("excluding {}", node.path);
                report.excluded += 1;
                continue;
            }
            match self.mirror_file(&fetcher, request, &destination, node) {
                Ok(FileOutcome::Skipped) => report.skipped += 1,
                Ok(FileOutcome::Downloaded) => report.downloaded += 1,
                Err(FileFailure::Cancelled) => {
                    return Err(MirrorError::Cancelled {
                        repo_id: request.repo_id.clone(),
                    });
                }
                Err(FileFailure::Failed(reason)) => {
                    warn!("failed to mirror {}: {reason}", node.path);
                    report.failed.push(node.path.clone());
                }
            }
        }

        if request.record {
            self.record(request, &destination, report.selected(), &mut report);
        }
        Ok(report)
    }

    fn mirror_file(
        &self,
        fetcher: &Fetcher<'_>,
        request: &MirrorRequest,
        destination: &RelativeSubpath,
        node: &RemoteTreeNode,
    ) -> Result<FileOutcome, FileFailure> {
        let (subdirectory, filename) = local_placement(destination, &request.subpath, &node.path);
        let target = ResolvedTarget::resolve(self.models_root, &subdirectory, filename)
            .map_err(|err| FileFailure::Failed(err.to_string()))?;
        if target.file_path().exists() {
            debug!("{} already present; skipping", target.file_path());
            return Ok(FileOutcome::Skipped);
        }
        let url = self
            .lister
            .file_url(&request.repo_id, request.revision(), &node.path);
        let fetch = FetchRequest::new(&url, &subdirectory)
            .with_filename(filename)
            .with_max_attempts(request.max_attempts)
            .with_provider(Provider::HuggingFaceFile);
        match fetcher.fetch(&fetch) {
            Ok(_) => Ok(FileOutcome::Downloaded),
            Err(err) if err.is_cancelled() => Err(FileFailure::Cancelled),
            Err(err) => Err(FileFailure::Failed(err.to_string())),
        }
    }

    fn record(
        &self,
        request: &MirrorRequest,
        destination: &RelativeSubpath,
        file_count: usize,
        report: &mut MirrorReport,
    ) {
        let Some(ledger) = self.ledger else {
            return;
        };
        let record = match &request.origin {
            MirrorOrigin::Repository => LedgerRecord::RemoteTree(RemoteTreeRecord {
                model_id: request.repo_id.clone(),
                save_folder: destination.as_str().to_owned(),
                revision: request.revision().to_owned(),
                exclude_files: request.exclusion_set().into_iter().map(str::to_owned).collect(),
                file_count,
            }),
            MirrorOrigin::TreeUrl(url) => LedgerRecord::Directory(DirectoryRecord {
                url: url.clone(),
                subdirectory: destination.as_str().to_owned(),
                repo_id: request.repo_id.clone(),
                revision: request.revision().to_owned(),
                directory_path: request.subpath.clone(),
                file_count,
            }),
        };
        let existing = match ledger.find_by_source(record.kind(), record.source_key()) {
            Ok(found) => found,
            Err(err) => {
                warn!("could not read ledger before recording {}: {err}", request.repo_id);
                report.ledger_warning = Some(err.to_string());
                return;
            }
        };
        if let Some((name, entry)) = &existing {
            if !structure_changed(&entry.record, &record) {
                debug!("ledger section [{name}] is current");
                report.ledger_section = Some(name.clone());
                return;
            }
        }
        match ledger.upsert(&LedgerEntry::new(record)) {
            Ok(name) => {
                report.ledger_section = Some(name);
                report.ledger_updated = true;
            }
            Err(err) => {
                warn!("could not record {} in ledger: {err}", request.repo_id);
                report.ledger_warning = Some(err.to_string());
            }
        }
    }
}

enum FileOutcome {
    Skipped,
    Downloaded,
}

enum FileFailure {
    Cancelled,
    Failed(String),
}

/// Split a remote file path into a local subdirectory and filename.
///
/// The part of `remote_path` below `remote_root` is reproduced beneath
/// `destination`.
fn local_placement<'p>(
    destination: &RelativeSubpath,
    remote_root: &str,
    remote_path: &'p str,
) -> (String, &'p str) {
    let root = remote_root.trim_matches('/');
    let relative = if root.is_empty() {
        remote_path
    } else {
        remote_path
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(remote_path)
    };
    match relative.rsplit_once('/') {
        Some((parent, name)) => (format!("{destination}/{parent}"), name),
        None => (destination.as_str().to_owned(), relative),
    }
}

/// Whether a recorded directory entry no longer describes the mirror.
///
/// Timestamps are ignored; everything that determines which files land
/// where is compared.
#[must_use]
pub fn structure_changed(recorded: &LedgerRecord, current: &LedgerRecord) -> bool {
    match (recorded, current) {
        (LedgerRecord::RemoteTree(old), LedgerRecord::RemoteTree(new)) => {
            old.file_count != new.file_count
                || !same_subpath(&old.save_folder, &new.save_folder)
                || old.revision != new.revision
                || sorted(&old.exclude_files) != sorted(&new.exclude_files)
        }
        (LedgerRecord::Directory(old), LedgerRecord::Directory(new)) => {
            old.file_count != new.file_count
                || !same_subpath(&old.subdirectory, &new.subdirectory)
                || old.revision != new.revision
                || old.directory_path.trim_matches('/') != new.directory_path.trim_matches('/')
        }
        _ => true,
    }
}

fn same_subpath(a: &str, b: &str) -> bool {
    match (RelativeSubpath::parse(a), RelativeSubpath::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn sorted(names: &[String]) -> Vec<&str> {
    let mut out: Vec<&str> = names.iter().map(String::as_str).collect();
    out.sort_unstable();
    out.dedup();
    out
}

#[cfg(test)]
#[path = "mirror_tests.rs"]
mod tests;
