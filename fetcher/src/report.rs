//! User-facing status lines and aggregate reports.

use crate::error::FetchError;
use crate::retry::{FetchOutcome, FetchStatus};

/// Render a fetch result as `(status message, final path or empty)`.
///
/// # Examples
///
/// ```
/// use weightsync_fetcher::error::FetchError;
/// use weightsync_fetcher::report::status_pair;
///
/// let (status, path) = status_pair(&Err(FetchError::EmptyUrl));
/// assert_eq!(status, "Error: URL is empty");
/// assert!(path.is_empty());
/// ```
#[must_use]
pub fn status_pair(result: &Result<FetchOutcome, FetchError>) -> (String, String) {
    match result {
        Ok(outcome) => {
            let status = match outcome.status {
                FetchStatus::AlreadyPresent => {
                    format!("✓ File already exists and verified: {}", outcome.filename())
                }
                FetchStatus::Downloaded { .. } => {
                    format!("✓ Successfully downloaded: {}", outcome.filename())
                }
            };
            (status, outcome.path.to_string())
        }
        Err(err) => (format!("Error: {}", sentence_case(&err.to_string())), String::new()),
    }
}

fn sentence_case(message: &str) -> String {
    let mut chars = message.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Counts from one directory mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorReport {
    /// Files found remotely, before exclusion.
    pub total: usize,
    /// Files transferred in this run.
    pub downloaded: usize,
    /// Files already present locally.
    pub skipped: usize,
    /// Files dropped by the exclusion list.
    pub excluded: usize,
    /// Remote paths that could not be fetched.
    pub failed: Vec<String>,
    /// Directory-level ledger section, when recorded.
    pub ledger_section: Option<String>,
    /// Whether the ledger section was written during this run.
    pub ledger_updated: bool,
    /// Why the ledger could not be updated.
    pub ledger_warning: Option<String>,
}

impl MirrorReport {
    /// Files considered after exclusion.
    #[must_use]
    pub const fn selected(&self) -> usize {
        self.total.saturating_sub(self.excluded)
    }

    /// Whether every selected file is now present.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// One-line status for the mirror of `name`.
    #[must_use]
    pub fn status_line(&self, name: &str) -> String {
        let mark = if self.is_success() { '✓' } else { '⚠' };
        format!(
            "{mark} Mirrored {name}: {} downloaded, {} skipped, {} excluded, {} failed",
            self.downloaded,
            self.skipped,
            self.excluded,
            self.failed.len()
        )
    }
}

/// Counts from one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Sections in the ledger.
    pub total: usize,
    /// Sections fetched or mirrored successfully.
    pub success: usize,
    /// Sections whose targets were already present.
    pub skipped: usize,
    /// Sections that failed.
    pub failed: usize,
    /// Names of the failed sections, in ledger order.
    pub failed_sections: Vec<String>,
}

impl ReconcileReport {
    pub(crate) fn record_success(&mut self) {
        self.success += 1;
    }

    pub(crate) fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub(crate) fn record_failure(&mut self, section: &str) {
        self.failed += 1;
        self.failed_sections.push(section.to_owned());
    }

    /// Whether no section failed.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// `✓ Completed: …` when clean, `⚠ Completed: …` otherwise.
    ///
    /// # Examples
    ///
    /// ```
    /// use weightsync_fetcher::report::ReconcileReport;
    ///
    /// let report = ReconcileReport { total: 3, success: 2, skipped: 1, ..Default::default() };
    /// assert_eq!(report.status_line(), "✓ Completed: 2 success, 1 skipped, 0 failed");
    /// ```
    #[must_use]
    pub fn status_line(&self) -> String {
        let mark = if self.is_clean() { '✓' } else { '⚠' };
        format!(
            "{mark} Completed: {} success, {} skipped, {} failed",
            self.success, self.skipped, self.failed
        )
    }

    /// Multi-line totals block.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Total: {}\nSuccess: {}\nSkipped: {}\nFailed: {}",
            self.total, self.success, self.skipped, self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use rstest::rstest;

    fn outcome(status: FetchStatus) -> FetchOutcome {
        FetchOutcome {
            path: Utf8PathBuf::from("/models/loras/a.safetensors"),
            status,
            ledger_section: None,
            ledger_warning: None,
        }
    }

    #[rstest]
    #[case::fresh(
        FetchStatus::Downloaded { attempts: 1, bytes: 4 },
        "✓ Successfully downloaded: a.safetensors"
    )]
    #[case::present(FetchStatus::AlreadyPresent, "✓ File already exists and verified: a.safetensors")]
    fn success_messages_name_the_file(#[case] status: FetchStatus, #[case] expected: &str) {
        let (message, path) = status_pair(&Ok(outcome(status)));
        assert_eq!(message, expected);
        assert_eq!(path, "/models/loras/a.safetensors");
    }

    #[test]
    fn failures_are_capitalised_with_empty_path() {
        let err = FetchError::HashMismatch {
            attempts: 3,
            expected: "aa".to_owned(),
            actual: "bb".to_owned(),
        };
        let (message, path) = status_pair(&Err(err));
        assert!(message.starts_with("Error: Hash verification failed after 3 attempts"));
        assert!(path.is_empty());
    }

    #[test]
    fn reconcile_report_lists_totals() {
        let mut report = ReconcileReport {
            total: 3,
            ..ReconcileReport::default()
        };
        report.record_success();
        report.record_skip();
        report.record_failure("broken_bin");

        assert_eq!(report.summary(), "Total: 3\nSuccess: 1\nSkipped: 1\nFailed: 1");
        assert_eq!(report.status_line(), "⚠ Completed: 1 success, 1 skipped, 1 failed");
        assert_eq!(report.failed_sections, ["broken_bin"]);
    }

    #[test]
    fn mirror_status_counts_failures() {
        let report = MirrorReport {
            total: 4,
            downloaded: 1,
            skipped: 1,
            excluded: 1,
            failed: vec!["unet/x.bin".to_owned()],
            ..MirrorReport::default()
        };
        assert_eq!(report.selected(), 3);
        assert_eq!(
            report.status_line("org/repo"),
            "⚠ Mirrored org/repo: 1 downloaded, 1 skipped, 1 excluded, 1 failed"
        );
    }
}
