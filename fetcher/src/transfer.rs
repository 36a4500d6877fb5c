//! HTTP transfer of a single remote file into a resolved destination.
//!
//! Bytes stream into a hidden `.part` file created beside the destination
//! and are renamed into place only once the body has been read completely.
//! A failed or cancelled transfer therefore never leaves a partial file at
//! the final path.

use std::io::{self, Read, Write};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, warn};
use thiserror::Error;
use weightsync_common::{Provider, ResolvedTarget, content_disposition_filename};

use crate::auth::Credentials;
use crate::cancel::CancelToken;
use crate::progress::{Progress, ProgressObserver, SharedObserver, silent};

/// Size of each body read while streaming to disk.
pub const CHUNK_SIZE: usize = 8192;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const STAGING_PREFIX: &str = ".weightsync-";
const STAGING_SUFFIX: &str = ".part";

/// Errors raised by a single transfer attempt.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// The request could not be completed.
    #[error("request to {url} failed: {reason}")]
    Http {
        /// Requested URL.
        url: String,
        /// Transport-level failure description.
        reason: String,
    },
    /// The connection failed while the body was being read.
    #[error("reading response body from {url} failed: {source}")]
    Body {
        /// Requested URL.
        url: String,
        /// Underlying read error.
        #[source]
        source: io::Error,
    },
    /// Writing the staging file or renaming it into place failed.
    #[error("failed to write {path}: {source}")]
    Io {
        /// Path being written.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The caller cancelled the transfer.
    #[error("transfer of {url} was cancelled")]
    Cancelled {
        /// Requested URL.
        url: String,
    },
}

impl TransferError {
    /// Whether the failure came from cancellation rather than the network.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// One file to transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Source URL.
    pub url: String,
    /// Host family, used to pick credentials and filename discovery.
    pub provider: Provider,
    /// Destination computed before the request is sent.
    pub target: ResolvedTarget,
    /// Whether the caller named the file explicitly. When `false`, a
    /// provider-supplied `Content-Disposition` name replaces the target's.
    pub filename_requested: bool,
}

/// A completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    /// Final path of the written file.
    pub path: Utf8PathBuf,
    /// Number of body bytes written.
    pub bytes: u64,
}

/// Performs one transfer attempt. Retrying is the caller's concern.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Fetch `request.url` into its destination.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] if the request, body read, or file write
    /// fails, or if the transfer is cancelled.
    fn fetch(&self, request: &TransferRequest) -> Result<TransferResult, TransferError>;
}

/// [`Transport`] backed by a blocking `ureq` agent.
pub struct HttpTransport {
    agent: ureq::Agent,
    credentials: Credentials,
    progress: SharedObserver,
    cancel: CancelToken,
}

impl HttpTransport {
    /// Build a transport with the given credentials.
    ///
    /// Only the connection phase is time-limited; model bodies can take
    /// arbitrarily long.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            credentials,
            progress: silent(),
            cancel: CancelToken::new(),
        }
    }

    /// Report progress to `observer`.
    #[must_use]
    pub fn with_progress(mut self, observer: SharedObserver) -> Self {
        self.progress = observer;
        self
    }

    /// Abort transfers when `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, request: &TransferRequest) -> Result<TransferResult, TransferError> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled {
                url: request.url.clone(),
            });
        }

        let mut builder = self.agent.get(&request.url);
        if let Some(value) = self.credentials.authorization(request.provider) {
            builder = builder.header("Authorization", value.as_str());
        }
        let response = builder
            .call()
            .map_err(|err| map_ureq_error(&request.url, &err))?;

        let target = realized_target(request, header_str(&response, "content-disposition"));
        let total = header_str(&response, "content-length").and_then(|v| v.trim().parse().ok());
        debug!(
            "downloading {} to {} ({} bytes expected)",
            request.url,
            target.file_path(),
            total.map_or_else(|| "unknown".to_owned(), |t: u64| t.to_string()),
        );
        self.progress
            .on_start(&request.url, target.file_path().as_str());

        let mut body = response.into_body();
        let mut reader = body.as_reader();
        let sink = TransferSink {
            url: &request.url,
            observer: self.progress.as_ref(),
            cancel: &self.cancel,
        };
        let bytes = write_atomically(&target, &mut reader, total, &sink)?;
        Ok(TransferResult {
            path: target.file_path().to_owned(),
            bytes,
        })
    }
}

fn header_str<'r>(response: &'r ureq::http::Response<ureq::Body>, name: &str) -> Option<&'r str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Map a `ureq` error to a [`TransferError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> TransferError {
    match err {
        ureq::Error::StatusCode(status) => TransferError::Status {
            url: url.to_owned(),
            status: *status,
        },
        other => TransferError::Http {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}

/// Pick the destination for a response.
///
/// A `Content-Disposition` filename replaces the planned one only for
/// providers that name files that way and only when the caller did not name
/// the file. Names that fail validation are ignored with a warning.
pub(crate) fn realized_target(
    request: &TransferRequest,
    content_disposition: Option<&str>,
) -> ResolvedTarget {
    if request.filename_requested || !request.provider.supplies_filename_header() {
        return request.target.clone();
    }
    let Some(name) = content_disposition.and_then(content_disposition_filename) else {
        return request.target.clone();
    };
    match request.target.with_filename(&name) {
        Ok(target) => target,
        Err(err) => {
            warn!("ignoring server-supplied filename for {}: {err}", request.url);
            request.target.clone()
        }
    }
}

/// Progress and cancellation hooks for one body copy.
pub(crate) struct TransferSink<'a> {
    pub(crate) url: &'a str,
    pub(crate) observer: &'a dyn ProgressObserver,
    pub(crate) cancel: &'a CancelToken,
}

impl TransferSink<'_> {
    fn check_cancelled(&self) -> Result<(), TransferError> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled {
                url: self.url.to_owned(),
            });
        }
        Ok(())
    }

    fn report(&self, transferred: u64, total: Option<u64>) {
        self.observer
            .on_progress(self.url, Progress { transferred, total });
    }
}

/// Stream `reader` into `target` through a staging file and rename it into
/// place.
///
/// A known, non-zero `total` streams in [`CHUNK_SIZE`] pieces with progress
/// after each one. Otherwise the body is read in one operation. The observer
/// hears `on_finish` whether or not the copy succeeds.
pub(crate) fn write_atomically<R: Read + ?Sized>(
    target: &ResolvedTarget,
    reader: &mut R,
    total: Option<u64>,
    sink: &TransferSink<'_>,
) -> Result<u64, TransferError> {
    let result = stage_and_persist(target, reader, total, sink);
    sink.observer.on_finish(sink.url);
    result
}

fn stage_and_persist<R: Read + ?Sized>(
    target: &ResolvedTarget,
    reader: &mut R,
    total: Option<u64>,
    sink: &TransferSink<'_>,
) -> Result<u64, TransferError> {
    let directory = target.directory();
    std::fs::create_dir_all(directory).map_err(|source| io_error(directory, source))?;
    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(STAGING_SUFFIX)
        .tempfile_in(directory)
        .map_err(|source| io_error(directory, source))?;
    let staged_path = Utf8PathBuf::from_path_buf(staged.path().to_path_buf())
        .unwrap_or_else(|_| directory.join(STAGING_SUFFIX));

    let bytes = match total {
        Some(len) if len > 0 => copy_chunked(reader, staged.as_file_mut(), Some(len), sink, &staged_path)?,
        _ => copy_whole(reader, staged.as_file_mut(), sink, &staged_path)?,
    };

    staged
        .as_file()
        .sync_all()
        .map_err(|source| io_error(&staged_path, source))?;
    sink.check_cancelled()?;
    staged
        .persist(target.file_path())
        .map_err(|err| io_error(target.file_path(), err.error))?;
    Ok(bytes)
}

fn copy_chunked<R: Read + ?Sized, W: Write>(
    reader: &mut R,
    writer: &mut W,
    total: Option<u64>,
    sink: &TransferSink<'_>,
    staged_path: &Utf8Path,
) -> Result<u64, TransferError> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut transferred = 0u64;
    loop {
        sink.check_cancelled()?;
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(TransferError::Body {
                    url: sink.url.to_owned(),
                    source,
                });
            }
        };
        let chunk = buffer.get(..read).unwrap_or_default();
        writer
            .write_all(chunk)
            .map_err(|source| io_error(staged_path, source))?;
        transferred += read as u64;
        sink.report(transferred, total);
    }
    Ok(transferred)
}

fn copy_whole<R: Read + ?Sized, W: Write>(
    reader: &mut R,
    writer: &mut W,
    sink: &TransferSink<'_>,
    staged_path: &Utf8Path,
) -> Result<u64, TransferError> {
    sink.check_cancelled()?;
    let mut body = Vec::new();
    reader
        .read_to_end(&mut body)
        .map_err(|source| TransferError::Body {
            url: sink.url.to_owned(),
            source,
        })?;
    sink.check_cancelled()?;
    writer
        .write_all(&body)
        .map_err(|source| io_error(staged_path, source))?;
    let len = body.len() as u64;
    sink.report(len, Some(len));
    Ok(len)
}

fn io_error(path: &Utf8Path, source: io::Error) -> TransferError {
    TransferError::Io {
        path: path.to_owned(),
        source,
    }
}

#[cfg(test)]
#[path = "transfer_tests.rs"]
mod tests;
