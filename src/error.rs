//! Error type for the command-line front end.

use camino::Utf8PathBuf;
use thiserror::Error;
use weightsync_fetcher::ledger::LedgerError;
use weightsync_fetcher::mirror::MirrorError;
use weightsync_fetcher::reconcile::ReconcileError;

use crate::config::ConfigError;

/// Errors that end a `weightsync` invocation with a non-zero exit code.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A mirror could not run.
    #[error(transparent)]
    Mirror(#[from] MirrorError),
    /// A reconciliation run could not start or finish.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    /// The ledger could not be read.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// `list` was pointed at a ledger that does not exist.
    #[error("ledger not found: {path}")]
    LedgerMissing {
        /// Ledger path.
        path: Utf8PathBuf,
    },
    /// The command ran but some work failed; details were already printed.
    #[error("{failed} item(s) failed")]
    Incomplete {
        /// Number of failed files or sections.
        failed: usize,
    },
}

impl CliError {
    /// Whether the failure has already been shown to the user.
    #[must_use]
    pub const fn already_reported(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }
}

/// Result alias for the front end.
pub type Result<T> = std::result::Result<T, CliError>;
