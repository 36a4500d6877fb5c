//! Deterministic stand-ins for the network seams.
//!
//! Available to this crate's unit tests and, through the `test-support`
//! feature, to integration tests and downstream crates.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::cancel::CancelToken;
use crate::listing::{ListingError, RemoteTreeNode, TreeLister};
use crate::progress::SilentProgress;
use crate::transfer::{
    TransferError, TransferRequest, TransferResult, TransferSink, Transport, realized_target,
    write_atomically,
};

/// A canned transport response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubResponse {
    /// Write these bytes to the planned target.
    Body(Vec<u8>),
    /// Write these bytes, announcing `filename` via `Content-Disposition`.
    Named {
        /// Server-supplied filename.
        filename: String,
        /// Body bytes.
        body: Vec<u8>,
    },
    /// Fail with this HTTP status.
    Status(u16),
}

/// A [`Transport`] that replays canned responses and records requests.
///
/// Responses are chosen by exact URL route first, then from the queue, then
/// from the fallback. With none available the request fails with HTTP 404.
#[derive(Debug, Default)]
pub struct StubTransport {
    routes: HashMap<String, StubResponse>,
    queue: RefCell<VecDeque<StubResponse>>,
    fallback: Option<StubResponse>,
    requests: RefCell<Vec<TransferRequest>>,
}

impl StubTransport {
    /// Serve `responses` in order.
    #[must_use]
    pub fn new(responses: Vec<StubResponse>) -> Self {
        Self {
            queue: RefCell::new(responses.into()),
            ..Self::default()
        }
    }

    /// Serve `response` for every request.
    #[must_use]
    pub fn always(response: StubResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::default()
        }
    }

    /// Serve `response` whenever `url` is requested.
    #[must_use]
    pub fn with_route(mut self, url: &str, response: StubResponse) -> Self {
        self.routes.insert(url.to_owned(), response);
        self
    }

    /// Number of transfer attempts made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    /// URLs requested, in order.
    #[must_use]
    pub fn requested_urls(&self) -> Vec<String> {
        self.requests.borrow().iter().map(|r| r.url.clone()).collect()
    }

    /// Full requests received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.borrow().clone()
    }

    fn next_response(&self, url: &str) -> Option<StubResponse> {
        self.routes
            .get(url)
            .cloned()
            .or_else(|| self.queue.borrow_mut().pop_front())
            .or_else(|| self.fallback.clone())
    }
}

impl Transport for StubTransport {
    fn fetch(&self, request: &TransferRequest) -> Result<TransferResult, TransferError> {
        self.requests.borrow_mut().push(request.clone());
        let response = self.next_response(&request.url).unwrap_or(StubResponse::Status(404));
        let (target, body) = match response {
            StubResponse::Status(status) => {
                return Err(TransferError::Status {
                    url: request.url.clone(),
                    status,
                });
            }
            StubResponse::Body(body) => (request.target.clone(), body),
            StubResponse::Named { filename, body } => {
                let header = format!("attachment; filename=\"{filename}\"");
                (realized_target(request, Some(&header)), body)
            }
        };
        let cancel = CancelToken::new();
        let sink = TransferSink {
            url: &request.url,
            observer: &SilentProgress,
            cancel: &cancel,
        };
        let total = Some(body.len() as u64);
        let bytes = write_atomically(&target, &mut body.as_slice(), total, &sink)?;
        Ok(TransferResult {
            path: target.file_path().to_owned(),
            bytes,
        })
    }
}

/// A [`TreeLister`] serving fixed directory listings.
#[derive(Debug, Default)]
pub struct StubTreeLister {
    listings: BTreeMap<String, Vec<RemoteTreeNode>>,
    calls: Cell<usize>,
}

impl StubTreeLister {
    /// Build listings for a repository containing exactly `files`.
    ///
    /// Intermediate directories are synthesized so a recursive walk from
    /// the root, or from any directory, reaches every file.
    ///
    /// # Examples
    ///
    /// ```
    /// use weightsync_fetcher::listing::{RemoteTreeNode, TreeLister};
    /// use weightsync_fetcher::test_utils::StubTreeLister;
    ///
    /// let lister = StubTreeLister::from_files(&["a.bin", "unet/b.bin"]);
    /// let root = lister.list_directory("o/r", "main", "").expect("root listing");
    /// assert_eq!(root, vec![RemoteTreeNode::file("a.bin"), RemoteTreeNode::directory("unet")]);
    /// ```
    #[must_use]
    pub fn from_files(files: &[&str]) -> Self {
        let mut listings: BTreeMap<String, Vec<RemoteTreeNode>> = BTreeMap::new();
        listings.entry(String::new()).or_default();
        for file in files {
            let file = file.trim_matches('/');
            let mut parent = String::new();
            let segments: Vec<&str> = file.split('/').collect();
            let (dirs, _) = segments.split_at(segments.len().saturating_sub(1));
            for dir in dirs {
                let child = if parent.is_empty() {
                    (*dir).to_owned()
                } else {
                    format!("{parent}/{dir}")
                };
                let siblings = listings.entry(parent.clone()).or_default();
                let node = RemoteTreeNode::directory(&child);
                if !siblings.contains(&node) {
                    siblings.push(node);
                }
                listings.entry(child.clone()).or_default();
                parent = child;
            }
            listings
                .entry(parent)
                .or_default()
                .push(RemoteTreeNode::file(file));
        }
        Self {
            listings,
            calls: Cell::new(0),
        }
    }

    /// Replace the listing served for `path`.
    #[must_use]
    pub fn with_directory(mut self, path: &str, nodes: Vec<RemoteTreeNode>) -> Self {
        self.listings.insert(path.trim_matches('/').to_owned(), nodes);
        self
    }

    /// Number of directory listings served or refused.
    #[must_use]
    pub fn listing_calls(&self) -> usize {
        self.calls.get()
    }
}

impl TreeLister for StubTreeLister {
    fn list_directory(
        &self,
        repo_id: &str,
        revision: &str,
        path: &str,
    ) -> Result<Vec<RemoteTreeNode>, ListingError> {
        self.calls.set(self.calls.get() + 1);
        self.listings
            .get(path.trim_matches('/'))
            .cloned()
            .ok_or_else(|| ListingError::Status {
                url: format!("stub://{repo_id}/tree/{revision}/{path}"),
                status: 404,
            })
    }

    fn file_url(&self, repo_id: &str, revision: &str, path: &str) -> String {
        format!("https://huggingface.co/{repo_id}/resolve/{revision}/{path}")
    }
}
