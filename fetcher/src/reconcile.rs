//! Bring the models root back in line with every ledger section.

use camino::{Utf8Path, Utf8PathBuf};
use log::{info, warn};
use thiserror::Error;
use weightsync_common::{DEFAULT_SUBDIRECTORY, ResolvedTarget};

use crate::cancel::CancelToken;
use crate::ledger::{
    DirectoryRecord, FileRecord, Ledger, LedgerError, LedgerRecord, LedgerSection,
    RemoteTreeRecord,
};
use crate::listing::TreeLister;
use crate::mirror::{DirectoryMirror, MirrorError, MirrorOrigin, MirrorRequest};
use crate::report::{ReconcileReport, status_pair};
use crate::retry::{DEFAULT_MAX_ATTEMPTS, FetchRequest, Fetcher};
use crate::transfer::Transport;

/// Errors that prevent a reconciliation run from starting or finishing.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The ledger file does not exist.
    #[error("ledger not found: {path}")]
    NotFound {
        /// Ledger path.
        path: Utf8PathBuf,
    },
    /// The ledger file could not be loaded.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The ledger holds no sections.
    #[error("no models found in ledger: {path}")]
    Empty {
        /// Ledger path.
        path: Utf8PathBuf,
    },
    /// The caller cancelled the run.
    #[error("reconciliation cancelled after {completed} of {total} section(s)")]
    Cancelled {
        /// Sections finished before cancellation.
        completed: usize,
        /// Sections in the ledger.
        total: usize,
    },
}

/// Knobs for a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Attempt bound for each file.
    pub max_attempts: u32,
    /// Skip file sections whose named target already exists, without
    /// verifying it.
    pub skip_existing: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            skip_existing: true,
        }
    }
}

/// Result of reconciling one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionOutcome {
    /// The section's artifacts are present and verified.
    Succeeded(String),
    /// Nothing needed doing.
    Skipped(String),
    /// The section could not be reconciled.
    Failed(String),
}

struct Interrupted;

/// Replays every ledger section against the models root.
pub struct ReconciliationRunner<'a> {
    transport: &'a dyn Transport,
    lister: &'a dyn TreeLister,
    models_root: &'a Utf8Path,
    ledger: &'a Ledger,
    cancel: CancelToken,
}

impl<'a> ReconciliationRunner<'a> {
    /// A runner over `ledger` writing beneath `models_root`.
    #[must_use]
    pub fn new(
        transport: &'a dyn Transport,
        lister: &'a dyn TreeLister,
        models_root: &'a Utf8Path,
        ledger: &'a Ledger,
    ) -> Self {
        Self {
            transport,
            lister,
            models_root,
            ledger,
            cancel: CancelToken::new(),
        }
    }

    /// Stop between sections and files once `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Reconcile every section.
    ///
    /// # Errors
    ///
    /// See [`ReconciliationRunner::run_with`].
    pub fn run(&self, options: ReconcileOptions) -> Result<ReconcileReport, ReconcileError> {
        self.run_with(options, &mut |_, _| {})
    }

    /// Reconcile every section, reporting each outcome to `on_section`.
    ///
    /// Sections are processed in ledger order. A failing section is counted
    /// and the run continues.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the ledger is missing, unreadable, or
    /// empty, or when the run is cancelled.
    pub fn run_with(
        &self,
        options: ReconcileOptions,
        on_section: &mut dyn FnMut(&str, &SectionOutcome),
    ) -> Result<ReconcileReport, ReconcileError> {
        if !self.ledger.exists() {
            return Err(ReconcileError::NotFound {
                path: self.ledger.path().to_owned(),
            });
        }
        let sections = self.ledger.all()?;
        if sections.is_empty() {
            return Err(ReconcileError::Empty {
                path: self.ledger.path().to_owned(),
            });
        }
        info!(
            "reconciling {} section(s) from {}",
            sections.len(),
            self.ledger.path()
        );

        let mut report = ReconcileReport {
            total: sections.len(),
            ..ReconcileReport::default()
        };
        for (completed, section) in sections.iter().enumerate() {
            let cancelled = || ReconcileError::Cancelled {
                completed,
                total: sections.len(),
            };
            if self.cancel.is_cancelled() {
                return Err(cancelled());
            }
            let outcome = self
                .reconcile_section(section, options)
                .map_err(|Interrupted| cancelled())?;
            match &outcome {
                SectionOutcome::Succeeded(_) => report.record_success(),
                SectionOutcome::Skipped(_) => report.record_skip(),
                SectionOutcome::Failed(reason) => {
                    warn!("section [{}] failed: {reason}", section.name);
                    report.record_failure(&section.name);
                }
            }
            on_section(&section.name, &outcome);
        }
        Ok(report)
    }

    fn reconcile_section(
        &self,
        section: &LedgerSection,
        options: ReconcileOptions,
    ) -> Result<SectionOutcome, Interrupted> {
        let entry = match &section.entry {
            Ok(entry) => entry,
            Err(err) => return Ok(SectionOutcome::Failed(err.to_string())),
        };
        match &entry.record {
            LedgerRecord::File(record) => self.reconcile_file(record, options),
            LedgerRecord::Directory(record) => {
                self.reconcile_mirror(&directory_request(record, options), options)
            }
            LedgerRecord::RemoteTree(record) => {
                self.reconcile_mirror(&remote_tree_request(record, options), options)
            }
        }
    }

    fn reconcile_file(
        &self,
        record: &FileRecord,
        options: ReconcileOptions,
    ) -> Result<SectionOutcome, Interrupted> {
        let subdirectory = if record.subdirectory.trim().is_empty() {
            DEFAULT_SUBDIRECTORY
        } else {
            record.subdirectory.as_str()
        };
        let filename = record.filename.trim();
        if options.skip_existing && !filename.is_empty() {
            match ResolvedTarget::resolve(self.models_root, subdirectory, filename) {
                Ok(target) if target.file_path().exists() => {
                    return Ok(SectionOutcome::Skipped(format!(
                        "{} already exists",
                        target.file_path()
                    )));
                }
                Ok(_) => {}
                Err(err) => return Ok(SectionOutcome::Failed(format!("Error: {err}"))),
            }
        }

        let mut request =
            FetchRequest::new(&record.url, subdirectory).with_max_attempts(options.max_attempts);
        if !filename.is_empty() {
            request = request.with_filename(filename);
        }
        if let Some(hash) = &record.hash {
            request = request.with_expected_hash(hash);
        }
        let fetcher = Fetcher::new(self.transport, self.models_root)
            .with_ledger(self.ledger)
            .with_cancel(self.cancel.clone());
        let result = fetcher.fetch(&request);
        if result.as_ref().is_err_and(|err| err.is_cancelled()) {
            return Err(Interrupted);
        }
        let (status, _) = status_pair(&result);
        Ok(if result.is_ok() {
            SectionOutcome::Succeeded(status)
        } else {
            SectionOutcome::Failed(status)
        })
    }

    fn reconcile_mirror(
        &self,
        request: &MirrorRequest,
        options: ReconcileOptions,
    ) -> Result<SectionOutcome, Interrupted> {
        let mirror = DirectoryMirror::new(self.lister, self.transport, self.models_root)
            .with_ledger(self.ledger)
            .with_cancel(self.cancel.clone());
        let report = match mirror.mirror(request) {
            Ok(report) => report,
            Err(MirrorError::Cancelled { .. }) => return Err(Interrupted),
            Err(err) => return Ok(SectionOutcome::Failed(format!("Error: {err}"))),
        };
        let status = report.status_line(&request.repo_id);
        Ok(if !report.is_success() {
            SectionOutcome::Failed(status)
        } else if report.downloaded == 0 && options.skip_existing {
            SectionOutcome::Skipped(status)
        } else {
            SectionOutcome::Succeeded(status)
        })
    }
}

fn directory_request(record: &DirectoryRecord, options: ReconcileOptions) -> MirrorRequest {
    MirrorRequest::new(&record.repo_id, &record.subdirectory)
        .with_revision(&record.revision)
        .with_subpath(&record.directory_path)
        .with_max_attempts(options.max_attempts)
        .with_origin(MirrorOrigin::TreeUrl(record.url.clone()))
}

fn remote_tree_request(record: &RemoteTreeRecord, options: ReconcileOptions) -> MirrorRequest {
    MirrorRequest::new(&record.model_id, &record.save_folder)
        .with_revision(&record.revision)
        .with_exclusions(record.exclude_files.clone())
        .with_max_attempts(options.max_attempts)
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
