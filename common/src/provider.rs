//! Source classification and filename discovery for remote model hosts.
//!
//! Every URL handed to the fetcher is classified exactly once into a
//! [`Provider`]; downstream code matches on the variant instead of probing
//! URL substrings again.

use std::fmt;

/// Filename used when neither the caller nor the URL supplies one.
pub const DEFAULT_FILENAME: &str = "downloaded_model.safetensors";

const HUGGINGFACE_HOST: &str = "huggingface.co";
const CIVITAI_HOST: &str = "civitai.com";

/// The remote host family a URL belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// A single file on the Hugging Face Hub (`/resolve/` or `/blob/` URL).
    HuggingFaceFile,
    /// A directory view on the Hugging Face Hub (`/tree/` URL).
    HuggingFaceTree,
    /// A CivitAI download endpoint.
    CivitAi,
    /// Anything else.
    Unsupported,
}

impl Provider {
    /// Classify a source URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use weightsync_common::provider::Provider;
    ///
    /// assert_eq!(
    ///     Provider::classify("https://huggingface.co/org/repo/resolve/main/model.safetensors"),
    ///     Provider::HuggingFaceFile,
    /// );
    /// assert_eq!(
    ///     Provider::classify("https://civitai.com/api/download/models/12345"),
    ///     Provider::CivitAi,
    /// );
    /// assert_eq!(Provider::classify("https://example.com/x.bin"), Provider::Unsupported);
    /// ```
    #[must_use]
    pub fn classify(url: &str) -> Self {
        let Some(host) = host_of(url) else {
            return Self::Unsupported;
        };
        if host_matches(host, HUGGINGFACE_HOST) {
            if TreeLocation::parse(url).is_some() {
                Self::HuggingFaceTree
            } else {
                Self::HuggingFaceFile
            }
        } else if host_matches(host, CIVITAI_HOST) {
            Self::CivitAi
        } else {
            Self::Unsupported
        }
    }

    /// Whether the provider names the file via `Content-Disposition`.
    #[must_use]
    pub const fn supplies_filename_header(self) -> bool {
        matches!(self, Self::CivitAi)
    }

    /// Derive a filename from the URL alone.
    ///
    /// Hugging Face URLs yield the last segment of the path after
    /// `/resolve/<revision>/`; CivitAI URLs yield nothing because the name
    /// arrives in a response header. Other URLs fall back to the last path
    /// segment.
    #[must_use]
    pub fn filename_from_url(self, url: &str) -> Option<String> {
        match self {
            Self::CivitAi => None,
            Self::HuggingFaceFile => resolve_filename(url).or_else(|| last_segment(url)),
            Self::HuggingFaceTree | Self::Unsupported => last_segment(url),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::HuggingFaceFile | Self::HuggingFaceTree => "huggingface",
            Self::CivitAi => "civitai",
            Self::Unsupported => "unknown",
        };
        f.write_str(label)
    }
}

/// Repository coordinates parsed from a Hugging Face `/tree/` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeLocation {
    /// `owner/name` repository identifier.
    pub repo_id: String,
    /// Branch, tag, or commit.
    pub revision: String,
    /// Directory path inside the repository; empty for the root.
    pub path: String,
}

impl TreeLocation {
    /// Parse `https://huggingface.co/<owner>/<name>/tree/<revision>[/<path>]`.
    ///
    /// # Examples
    ///
    /// ```
    /// use weightsync_common::provider::TreeLocation;
    ///
    /// let loc = TreeLocation::parse("https://huggingface.co/org/repo/tree/main/unet")
    ///     .expect("tree url");
    /// assert_eq!(loc.repo_id, "org/repo");
    /// assert_eq!(loc.revision, "main");
    /// assert_eq!(loc.path, "unet");
    /// ```
    #[must_use]
    pub fn parse(url: &str) -> Option<Self> {
        let host = host_of(url)?;
        if !host_matches(host, HUGGINGFACE_HOST) {
            return None;
        }
        let path = path_of(url);
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let owner = segments.next()?;
        let name = segments.next()?;
        if segments.next()? != "tree" {
            return None;
        }
        let revision = segments.next()?;
        let rest: Vec<&str> = segments.collect();
        Some(Self {
            repo_id: format!("{owner}/{name}"),
            revision: revision.to_owned(),
            path: rest.join("/"),
        })
    }

    /// The final directory name, falling back to the repository name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.path
            .rsplit('/')
            .find(|s| !s.is_empty())
            .or_else(|| self.repo_id.rsplit('/').next())
            .unwrap_or(self.repo_id.as_str())
    }
}

/// Extract the filename from a `Content-Disposition` header value.
///
/// Prefers the RFC 5987 `filename*=` form when present and percent-decodes
/// it; otherwise reads the plain `filename=` parameter, quoted or not.
///
/// # Examples
///
/// ```
/// use weightsync_common::provider::content_disposition_filename;
///
/// assert_eq!(
///     content_disposition_filename("attachment; filename=\"model.safetensors\""),
///     Some("model.safetensors".to_owned()),
/// );
/// ```
#[must_use]
pub fn content_disposition_filename(header: &str) -> Option<String> {
    let mut plain = None;
    for param in header.split(';').map(str::trim) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key == "filename*" {
            let encoded = value.rsplit("''").next().unwrap_or(value);
            if let Some(decoded) = percent_decode(encoded.trim_matches('"')) {
                if !decoded.is_empty() {
                    return Some(decoded);
                }
            }
        } else if key == "filename" {
            let unquoted = value.trim_matches('"');
            if !unquoted.is_empty() {
                plain = Some(unquoted.to_owned());
            }
        }
    }
    plain
}

fn resolve_filename(url: &str) -> Option<String> {
    let path = path_of(url);
    let (_, after) = path.split_once("/resolve/")?;
    let (_, file_path) = after.split_once('/')?;
    file_path
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn last_segment(url: &str) -> Option<String> {
    path_of(url)
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn strip_scheme(url: &str) -> Option<&str> {
    url.split_once("://").map(|(_, rest)| rest)
}

fn host_of(url: &str) -> Option<&str> {
    let rest = strip_scheme(url.trim())?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;
    let host = host_port.split(':').next()?;
    (!host.is_empty()).then_some(host)
}

fn host_matches(host: &str, expected: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == expected || host.ends_with(&format!(".{expected}"))
}

/// The path portion of a URL, without query or fragment.
fn path_of(url: &str) -> &str {
    let Some(rest) = strip_scheme(url.trim()) else {
        return "";
    };
    let without_query = rest.split(['?', '#']).next().unwrap_or_default();
    without_query
        .find('/')
        .map_or("", |idx| without_query.get(idx..).unwrap_or_default())
}

fn percent_decode(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while let Some(&byte) = bytes.get(idx) {
        if byte == b'%' {
            let hex = value.get(idx + 1..idx + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            idx += 3;
        } else {
            out.push(byte);
            idx += 1;
        }
    }
    String::from_utf8(out).ok()
}
