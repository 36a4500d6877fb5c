//! Download, verify, and reconcile model weights.
//!
//! The engine is layered leaf-first:
//!
//! - [`transfer`] performs one streaming HTTP download into a staging file
//!   and renames it into place.
//! - [`verify`] hashes files on disk and compares digests.
//! - [`retry`] drives bounded attempts of check-existing, transfer, and
//!   verify for one artifact, recording provenance in the [`ledger`].
//! - [`listing`] and [`mirror`] enumerate and replicate remote directories.
//! - [`reconcile`] replays every ledger section against the models root.
//!
//! Network access sits behind the [`transfer::Transport`] and
//! [`listing::TreeLister`] traits so every layer above them can be exercised
//! without a server.

pub mod auth;
pub mod cancel;
pub mod error;
pub mod ledger;
pub mod listing;
pub mod mirror;
pub mod progress;
pub mod reconcile;
pub mod report;
pub mod retry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
pub mod transfer;
pub mod verify;

pub use auth::Credentials;
pub use cancel::CancelToken;
pub use error::FetchError;
pub use ledger::{EntryKind, Ledger, LedgerEntry, LedgerError, LedgerRecord};
pub use listing::{HubTreeLister, ListingError, RemoteTreeNode, TreeLister};
pub use mirror::{DirectoryMirror, MirrorError, MirrorOrigin, MirrorRequest};
pub use progress::{Progress, ProgressObserver};
pub use reconcile::{ReconcileError, ReconcileOptions, ReconciliationRunner, SectionOutcome};
pub use report::{MirrorReport, ReconcileReport, status_pair};
pub use retry::{DEFAULT_MAX_ATTEMPTS, FetchOutcome, FetchRequest, FetchStatus, Fetcher};
pub use transfer::{HttpTransport, TransferError, Transport};
