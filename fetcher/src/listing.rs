//! Remote directory listing for Hugging Face repositories.
//!
//! [`TreeLister`] lists one directory level; [`list_tree`] walks it
//! recursively and returns every file beneath a starting path.

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, trace};
use serde::Deserialize;
use thiserror::Error;

/// Default Hub endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Errors raised while listing a remote directory.
#[derive(Debug, Error)]
pub enum ListingError {
    /// The listing endpoint answered with a non-success status.
    #[error("HTTP {status} listing {url}")]
    Status {
        /// Listing URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// The listing request could not be completed.
    #[error("listing {url} failed: {reason}")]
    Http {
        /// Listing URL.
        url: String,
        /// Transport-level failure description.
        reason: String,
    },
    /// The response body was not the expected JSON array.
    #[error("unexpected listing response from {url}: {reason}")]
    Decode {
        /// Listing URL.
        url: String,
        /// Parse failure description.
        reason: String,
    },
}

/// Node type reported by the tree API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A regular file.
    File,
    /// A directory that can be listed further.
    Directory,
    /// Anything else the API may report; skipped during traversal.
    #[serde(other)]
    Other,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteTreeNode {
    /// Path relative to the repository root.
    pub path: String,
    /// Whether the node is a file or a directory.
    #[serde(rename = "type")]
    pub kind: NodeKind,
}

impl RemoteTreeNode {
    /// Construct a file node.
    #[must_use]
    pub fn file(path: &str) -> Self {
        Self {
            path: path.to_owned(),
            kind: NodeKind::File,
        }
    }

    /// Construct a directory node.
    #[must_use]
    pub fn directory(path: &str) -> Self {
        Self {
            path: path.to_owned(),
            kind: NodeKind::Directory,
        }
    }

    /// The final path component.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(self.path.as_str())
    }
}

/// Lists remote repository directories and builds file URLs.
#[cfg_attr(test, mockall::automock)]
pub trait TreeLister {
    /// List the immediate children of `path` at `revision`. An empty path
    /// names the repository root.
    ///
    /// # Errors
    ///
    /// Returns [`ListingError`] when the request fails or the response does
    /// not parse.
    fn list_directory(
        &self,
        repo_id: &str,
        revision: &str,
        path: &str,
    ) -> Result<Vec<RemoteTreeNode>, ListingError>;

    /// The download URL for a file in the repository.
    fn file_url(&self, repo_id: &str, revision: &str, path: &str) -> String;
}

/// [`TreeLister`] backed by the Hub's `api/models/<repo>/tree` endpoint.
pub struct HubTreeLister {
    agent: ureq::Agent,
    endpoint: String,
    token: Option<String>,
}

impl HubTreeLister {
    /// Build a lister for `endpoint` with a bounded request timeout.
    #[must_use]
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    fn listing_url(&self, repo_id: &str, revision: &str, path: &str) -> String {
        let mut url = format!(
            "{}/api/models/{}/tree/{}",
            self.endpoint,
            encode_path(repo_id),
            encode_component(revision),
        );
        let path = path.trim_matches('/');
        if !path.is_empty() {
            url.push('/');
            url.push_str(&encode_path(path));
        }
        url
    }

    fn get_page(&self, url: &str) -> Result<(Vec<RemoteTreeNode>, Option<String>), ListingError> {
        let mut builder = self.agent.get(url);
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Bearer {}", token.trim()).as_str());
        }
        let mut response = builder.call().map_err(|err| match err {
            ureq::Error::StatusCode(status) => ListingError::Status {
                url: url.to_owned(),
                status,
            },
            other => ListingError::Http {
                url: url.to_owned(),
                reason: other.to_string(),
            },
        })?;
        let next = response
            .headers()
            .get("link")
            .and_then(|v| v.to_str().ok())
            .and_then(next_page_link);
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|err| ListingError::Http {
                url: url.to_owned(),
                reason: err.to_string(),
            })?;
        let nodes = parse_listing(url, &body)?;
        Ok((nodes, next))
    }
}

impl TreeLister for HubTreeLister {
    fn list_directory(
        &self,
        repo_id: &str,
        revision: &str,
        path: &str,
    ) -> Result<Vec<RemoteTreeNode>, ListingError> {
        let mut next = Some(self.listing_url(repo_id, revision, path));
        let mut nodes = Vec::new();
        while let Some(url) = next.take() {
            debug!("listing {url}");
            let (page, following) = self.get_page(&url)?;
            nodes.extend(page);
            next = following;
        }
        Ok(nodes)
    }

    fn file_url(&self, repo_id: &str, revision: &str, path: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint,
            encode_path(repo_id),
            encode_component(revision),
            encode_path(path.trim_matches('/')),
        )
    }
}

/// Parse a tree API response body.
pub(crate) fn parse_listing(url: &str, body: &str) -> Result<Vec<RemoteTreeNode>, ListingError> {
    serde_json::from_str(body).map_err(|err| ListingError::Decode {
        url: url.to_owned(),
        reason: err.to_string(),
    })
}

/// Extract the `rel="next"` target from an RFC 8288 `Link` header.
fn next_page_link(header: &str) -> Option<String> {
    header.split(',').find_map(|link| {
        let (target, params) = link.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim().replace(' ', "") == "rel=\"next\"" || p.trim() == "rel=next");
        is_next.then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_owned())
    })
}

/// Percent-encode one path component, including `/`.
fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Percent-encode each segment of a `/`-separated path.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(encode_component)
        .collect::<Vec<_>>()
        .join("/")
}

/// Recursively list every file beneath `path`.
///
/// Directories are visited at most once, so a listing that reports a cycle
/// cannot loop forever. Only file nodes are returned, in listing order.
///
/// # Errors
///
/// Returns the first [`ListingError`] encountered.
pub fn list_tree(
    lister: &dyn TreeLister,
    repo_id: &str,
    revision: &str,
    path: &str,
) -> Result<Vec<RemoteTreeNode>, ListingError> {
    let mut files = Vec::new();
    let mut visited = HashSet::new();
    walk(lister, repo_id, revision, path.trim_matches('/'), &mut visited, &mut files)?;
    Ok(files)
}

fn walk(
    lister: &dyn TreeLister,
    repo_id: &str,
    revision: &str,
    path: &str,
    visited: &mut HashSet<String>,
    files: &mut Vec<RemoteTreeNode>,
) -> Result<(), ListingError> {
    if !visited.insert(path.to_owned()) {
        debug!("skipping already visited directory '{path}'");
        return Ok(());
    }
    for node in lister.list_directory(repo_id, revision, path)? {
        match node.kind {
            NodeKind::File => {
                trace!("found {}", node.path);
                files.push(node);
            }
            NodeKind::Directory => walk(lister, repo_id, revision, &node.path, visited, files)?,
            NodeKind::Other => debug!("ignoring non-file node {}", node.path),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use rstest::rstest;

    fn lister() -> HubTreeLister {
        HubTreeLister::new("https://hub.example/", None, Duration::from_secs(5))
    }

    #[test]
    fn parses_tree_api_response() {
        let body = r#"[
            {"type": "file", "oid": "abc", "size": 12, "path": "unet/config.json"},
            {"type": "directory", "oid": "def", "size": 0, "path": "unet/fp16"},
            {"type": "submodule", "path": "vendored"}
        ]"#;
        let nodes = parse_listing("u", body).expect("parse");
        assert_eq!(
            nodes,
            vec![
                RemoteTreeNode::file("unet/config.json"),
                RemoteTreeNode::directory("unet/fp16"),
                RemoteTreeNode {
                    path: "vendored".to_owned(),
                    kind: NodeKind::Other
                },
            ]
        );
    }

    #[test]
    fn rejects_non_array_bodies() {
        let err = parse_listing("u", r#"{"error": "Repository not found"}"#).expect_err("decode");
        assert!(matches!(err, ListingError::Decode { .. }));
    }

    #[rstest]
    #[case::root("", "https://hub.example/api/models/org/repo/tree/main")]
    #[case::nested("unet/fp16/", "https://hub.example/api/models/org/repo/tree/main/unet/fp16")]
    fn builds_listing_urls(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(lister().listing_url("org/repo", "main", path), expected);
    }

    #[test]
    fn encodes_revisions_containing_slashes() {
        assert_eq!(
            lister().listing_url("org/repo", "refs/pr/1", ""),
            "https://hub.example/api/models/org/repo/tree/refs%2Fpr%2F1"
        );
    }

    #[test]
    fn builds_resolve_urls() {
        assert_eq!(
            lister().file_url("org/repo", "main", "text encoder/model.bin"),
            "https://hub.example/org/repo/resolve/main/text%20encoder/model.bin"
        );
    }

    #[rstest]
    #[case::next(
        "<https://hub.example/api/models/o/r/tree/main?cursor=x>; rel=\"next\"",
        Some("https://hub.example/api/models/o/r/tree/main?cursor=x")
    )]
    #[case::prev_only("<https://a>; rel=\"prev\"", None)]
    #[case::second("<https://a>; rel=\"prev\", <https://b>; rel=\"next\"", Some("https://b"))]
    fn reads_next_page_links(#[case] header: &str, #[case] expected: Option<&str>) {
        assert_eq!(next_page_link(header).as_deref(), expected);
    }

    #[test]
    fn list_tree_recurses_and_returns_only_files() {
        let mut mock = MockTreeLister::new();
        mock.expect_list_directory()
            .with(eq("org/repo"), eq("main"), eq("unet"))
            .times(1)
            .returning(|_, _, _| {
                Ok(vec![
                    RemoteTreeNode::file("unet/config.json"),
                    RemoteTreeNode::directory("unet/fp16"),
                ])
            });
        mock.expect_list_directory()
            .with(eq("org/repo"), eq("main"), eq("unet/fp16"))
            .times(1)
            .returning(|_, _, _| Ok(vec![RemoteTreeNode::file("unet/fp16/model.bin")]));

        let files = list_tree(&mock, "org/repo", "main", "/unet/").expect("listing");

        let paths: Vec<&str> = files.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, ["unet/config.json", "unet/fp16/model.bin"]);
    }

    #[test]
    fn list_tree_visits_each_directory_once() {
        let mut mock = MockTreeLister::new();
        mock.expect_list_directory()
            .with(eq("o/r"), eq("main"), eq(""))
            .times(1)
            .returning(|_, _, _| Ok(vec![RemoteTreeNode::directory("loop")]));
        mock.expect_list_directory()
            .with(eq("o/r"), eq("main"), eq("loop"))
            .times(1)
            .returning(|_, _, _| {
                Ok(vec![
                    RemoteTreeNode::directory("loop"),
                    RemoteTreeNode::file("loop/a.bin"),
                ])
            });

        let files = list_tree(&mock, "o/r", "main", "").expect("listing");
        assert_eq!(files, vec![RemoteTreeNode::file("loop/a.bin")]);
    }

    #[test]
    fn list_tree_propagates_listing_failures() {
        let mut mock = MockTreeLister::new();
        mock.expect_list_directory().returning(|_, _, _| {
            Err(ListingError::Status {
                url: "u".to_owned(),
                status: 404,
            })
        });
        let err = list_tree(&mock, "o/r", "main", "").expect_err("failure");
        assert!(matches!(err, ListingError::Status { status: 404, .. }));
    }
}
