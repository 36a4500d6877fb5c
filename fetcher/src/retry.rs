//! Bounded-retry fetch of a single artifact.
//!
//! [`Fetcher::fetch`] drives a small state machine:
//!
//! ```text
//! CheckExisting ─┬─> Finish (existing file verifies)
//!                └─> Download ──> Verify ─┬─> Finish
//!                       ▲                 └─> Retry
//!                       └──── Retry <── (transfer failure)
//! ```
//!
//! One attempt counter spans every pass through `Download`, so an artifact
//! is never transferred more than `max_attempts` times whatever the cause of
//! each retry. Removing a stale pre-existing file does not consume an
//! attempt.

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use weightsync_common::{DEFAULT_FILENAME, Provider, RelativeSubpath, ResolvedTarget};

use crate::cancel::CancelToken;
use crate::error::FetchError;
use crate::ledger::{EntryKind, FileRecord, Ledger, LedgerEntry, LedgerRecord};
use crate::transfer::{TransferRequest, TransferResult, Transport};
use crate::verify::hash_file;

/// Attempts made when the caller does not say otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Inputs for one artifact fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Source URL.
    pub url: String,
    /// Untrusted destination subdirectory under the models root.
    pub subdirectory: String,
    /// Desired filename; derived from the URL or the response when absent.
    pub filename: Option<String>,
    /// Expected SHA-256 digest; verification is skipped when absent.
    pub expected_hash: Option<String>,
    /// Upper bound on transfer attempts. Zero is treated as one.
    pub max_attempts: u32,
    /// Provider override; classified from the URL when absent.
    pub provider: Option<Provider>,
}

impl FetchRequest {
    /// A request with default attempts and no filename or hash.
    #[must_use]
    pub fn new(url: &str, subdirectory: &str) -> Self {
        Self {
            url: url.to_owned(),
            subdirectory: subdirectory.to_owned(),
            filename: None,
            expected_hash: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            provider: None,
        }
    }

    /// Set the desired filename.
    #[must_use]
    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_owned());
        self
    }

    /// Set the expected SHA-256 digest.
    #[must_use]
    pub fn with_expected_hash(mut self, hash: &str) -> Self {
        self.expected_hash = Some(hash.to_owned());
        self
    }

    /// Set the attempt bound.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Skip URL classification and treat the source as `provider`.
    #[must_use]
    pub const fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    fn requested_filename(&self) -> Option<&str> {
        non_blank(self.filename.as_deref())
    }

    fn expected_hash(&self) -> Option<&str> {
        non_blank(self.expected_hash.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// How a successful fetch was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// A file already at the target verified; nothing was transferred.
    AlreadyPresent,
    /// The file was transferred.
    Downloaded {
        /// Attempts used, including the successful one.
        attempts: u32,
        /// Bytes written by the successful attempt.
        bytes: u64,
    },
}

/// A verified artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Final path of the artifact.
    pub path: Utf8PathBuf,
    /// Whether a transfer took place.
    pub status: FetchStatus,
    /// Ledger section written, when a ledger is attached.
    pub ledger_section: Option<String>,
    /// Why the ledger could not be updated. The artifact is still valid.
    pub ledger_warning: Option<String>,
}

impl FetchOutcome {
    /// The artifact's filename.
    #[must_use]
    pub fn filename(&self) -> &str {
        self.path.file_name().unwrap_or(self.path.as_str())
    }
}

enum Step {
    CheckExisting,
    Download,
    Verify(TransferResult),
    Retry(FetchError),
    Finish {
        path: Utf8PathBuf,
        status: FetchStatus,
    },
}

/// Fetches artifacts beneath a models root, optionally recording them.
pub struct Fetcher<'a> {
    transport: &'a dyn Transport,
    models_root: &'a Utf8Path,
    ledger: Option<&'a Ledger>,
    cancel: CancelToken,
}

impl<'a> Fetcher<'a> {
    /// A fetcher that writes beneath `models_root` and records nothing.
    #[must_use]
    pub fn new(transport: &'a dyn Transport, models_root: &'a Utf8Path) -> Self {
        Self {
            transport,
            models_root,
            ledger: None,
            cancel: CancelToken::new(),
        }
    }

    /// Record every verified artifact in `ledger`.
    #[must_use]
    pub const fn with_ledger(mut self, ledger: &'a Ledger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Stop between attempts once `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Fetch and verify one artifact.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when the request is invalid, when every
    /// attempt fails, or when the fetch is cancelled. Ledger failures are
    /// not errors; see [`FetchOutcome::ledger_warning`].
    pub fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, FetchError> {
        let url = request.url.trim();
        if url.is_empty() {
            return Err(FetchError::EmptyUrl);
        }
        let provider = request.provider.unwrap_or_else(|| Provider::classify(url));
        match provider {
            Provider::Unsupported => {
                return Err(FetchError::UnsupportedSource {
                    url: url.to_owned(),
                });
            }
            Provider::HuggingFaceTree => {
                return Err(FetchError::DirectorySource {
                    url: url.to_owned(),
                });
            }
            Provider::HuggingFaceFile | Provider::CivitAi => {}
        }

        let transfer = TransferRequest {
            url: url.to_owned(),
            provider,
            target: self.plan_target(url, provider, request)?,
            filename_requested: request.requested_filename().is_some(),
        };
        let expected = request.expected_hash();
        let max_attempts = request.max_attempts.max(1);
        let mut attempts = 0u32;
        let mut step = Step::CheckExisting;

        loop {
            step = match step {
                Step::CheckExisting => check_existing(transfer.target.file_path(), expected)?,
                Step::Download => {
                    if self.cancel.is_cancelled() {
                        return Err(FetchError::Cancelled {
                            url: url.to_owned(),
                        });
                    }
                    attempts += 1;
                    info!("downloading {url} (attempt {attempts}/{max_attempts})");
                    match self.transport.fetch(&transfer) {
                        Ok(result) => Step::Verify(result),
                        Err(err) if err.is_cancelled() => {
                            return Err(FetchError::Cancelled {
                                url: url.to_owned(),
                            });
                        }
                        Err(err) => {
                            warn!("attempt {attempts}/{max_attempts} for {url} failed: {err}");
                            Step::Retry(FetchError::TransferExhausted {
                                attempts,
                                source: err,
                            })
                        }
                    }
                }
                Step::Verify(result) => verify_download(result, expected, attempts),
                Step::Retry(err) if attempts >= max_attempts => return Err(err),
                Step::Retry(_) => Step::Download,
                Step::Finish { path, status } => {
                    let (ledger_section, ledger_warning) =
                        self.record(url, &transfer.target, &path, expected);
                    return Ok(FetchOutcome {
                        path,
                        status,
                        ledger_section,
                        ledger_warning,
                    });
                }
            };
        }
    }

    fn plan_target(
        &self,
        url: &str,
        provider: Provider,
        request: &FetchRequest,
    ) -> Result<ResolvedTarget, FetchError> {
        let subpath = RelativeSubpath::parse(&request.subdirectory)?;
        let filename = match request.requested_filename() {
            Some(name) => name.to_owned(),
            None => self
                .recorded_filename(url, provider, &subpath)
                .or_else(|| provider.filename_from_url(url))
                .unwrap_or_else(|| DEFAULT_FILENAME.to_owned()),
        };
        Ok(ResolvedTarget::from_subpath(
            self.models_root,
            subpath,
            &filename,
        )?)
    }

    /// The filename a header-naming provider chose last time, if the ledger
    /// remembers fetching `url` into the same subdirectory.
    fn recorded_filename(
        &self,
        url: &str,
        provider: Provider,
        subpath: &RelativeSubpath,
    ) -> Option<String> {
        if !provider.supplies_filename_header() {
            return None;
        }
        let (_, entry) = match self.ledger?.find_by_source(EntryKind::File, url) {
            Ok(found) => found?,
            Err(err) => {
                debug!("ledger lookup for {url} failed: {err}");
                return None;
            }
        };
        let LedgerRecord::File(record) = entry.record else {
            return None;
        };
        let same_dir = RelativeSubpath::parse(&record.subdirectory).is_ok_and(|s| &s == subpath);
        (same_dir && !record.filename.trim().is_empty()).then_some(record.filename)
    }

    fn record(
        &self,
        url: &str,
        target: &ResolvedTarget,
        path: &Utf8Path,
        expected: Option<&str>,
    ) -> (Option<String>, Option<String>) {
        let Some(ledger) = self.ledger else {
            return (None, None);
        };
        let filepath = path
            .strip_prefix(self.models_root)
            .map_or_else(|_| path.to_string(), ToString::to_string);
        let record = FileRecord {
            url: url.to_owned(),
            subdirectory: target.subpath().as_str().to_owned(),
            filename: path.file_name().unwrap_or_default().to_owned(),
            filepath,
            hash: expected.map(str::to_owned),
        };
        match ledger.upsert(&LedgerEntry::new(LedgerRecord::File(record))) {
            Ok(section) => (Some(section), None),
            Err(err) => {
                warn!("could not record {url} in ledger: {err}");
                (None, Some(err.to_string()))
            }
        }
    }
}

fn check_existing(path: &Utf8Path, expected: Option<&str>) -> Result<Step, FetchError> {
    if !path.is_file() {
        return Ok(Step::Download);
    }
    let Some(expected) = expected else {
        info!("{path} already exists; no hash to check");
        return Ok(finish_existing(path));
    };
    match hash_file(path) {
        Ok(actual) if actual.matches(expected) => {
            info!("{path} already exists and verified");
            return Ok(finish_existing(path));
        }
        Ok(actual) => warn!("existing {path} has digest {actual}, expected {expected}; removing"),
        Err(err) => warn!("existing {path} could not be hashed ({err}); removing"),
    }
    std::fs::remove_file(path).map_err(|source| FetchError::RemoveStale {
        path: path.to_owned(),
        source,
    })?;
    Ok(Step::Download)
}

fn finish_existing(path: &Utf8Path) -> Step {
    Step::Finish {
        path: path.to_owned(),
        status: FetchStatus::AlreadyPresent,
    }
}

fn verify_download(result: TransferResult, expected: Option<&str>, attempts: u32) -> Step {
    let finished = |result: TransferResult| Step::Finish {
        path: result.path,
        status: FetchStatus::Downloaded {
            attempts,
            bytes: result.bytes,
        },
    };
    let Some(expected) = expected else {
        return finished(result);
    };
    let actual = match hash_file(&result.path) {
        Ok(actual) if actual.matches(expected) => {
            debug!("hash verified for {}", result.path);
            return finished(result);
        }
        Ok(actual) => actual.into_inner(),
        Err(err) => format!("unreadable ({err})"),
    };
    warn!(
        "hash mismatch for {} on attempt {attempts}: expected {expected}, got {actual}",
        result.path
    );
    if let Err(err) = std::fs::remove_file(&result.path) {
        warn!("could not remove {}: {err}", result.path);
    }
    Step::Retry(FetchError::HashMismatch {
        attempts,
        expected: expected.to_owned(),
        actual,
    })
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
