//! Typed ledger records and their section encoding.

use std::fmt;

use super::LedgerError;
use super::ini::IniSection;

/// `strftime` format of the `timestamp` key.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const TYPE_DIRECTORY: &str = "directory";
const TYPE_REMOTE_TREE: &str = "huggingface_directory";

/// Which provenance shape a section holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A single downloaded file. Sections carry no `type` key.
    File,
    /// A mirrored `/tree/` URL (`type = directory`).
    Directory,
    /// A mirrored repository (`type = huggingface_directory`).
    RemoteTree,
}

impl EntryKind {
    /// Decode the optional `type` key.
    fn from_type_key(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim) {
            None | Some("" | "file") => Some(Self::File),
            Some(TYPE_DIRECTORY) => Some(Self::Directory),
            Some(TYPE_REMOTE_TREE) => Some(Self::RemoteTree),
            Some(_) => None,
        }
    }

    /// The key holding this kind's source identity.
    #[must_use]
    pub const fn source_field(self) -> &'static str {
        match self {
            Self::File | Self::Directory => "url",
            Self::RemoteTree => "model_id",
        }
    }

    /// Kind and source key of a raw section, without validating the rest.
    pub(crate) fn identify(section: &IniSection) -> Option<(Self, &str)> {
        let kind = Self::from_type_key(section.get("type"))?;
        let source = section.get(kind.source_field())?;
        Some((kind, source))
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::File => "file",
            Self::Directory => TYPE_DIRECTORY,
            Self::RemoteTree => TYPE_REMOTE_TREE,
        })
    }
}

/// Provenance of one downloaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Source URL.
    pub url: String,
    /// Destination subdirectory under the models root.
    pub subdirectory: String,
    /// Realized filename.
    pub filename: String,
    /// Path of the file relative to the models root.
    pub filepath: String,
    /// Expected SHA-256, when one was supplied.
    pub hash: Option<String>,
}

/// Provenance of a mirrored `/tree/` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    /// The `/tree/` URL that was mirrored.
    pub url: String,
    /// Destination subdirectory under the models root.
    pub subdirectory: String,
    /// `owner/name` repository identifier.
    pub repo_id: String,
    /// Branch, tag, or commit.
    pub revision: String,
    /// Directory path inside the repository.
    pub directory_path: String,
    /// Number of files selected at the last mirror.
    pub file_count: usize,
}

/// Provenance of a mirrored repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTreeRecord {
    /// `owner/name` repository identifier.
    pub model_id: String,
    /// Destination subdirectory under the models root.
    pub save_folder: String,
    /// Branch, tag, or commit.
    pub revision: String,
    /// Base filenames skipped while mirroring.
    pub exclude_files: Vec<String>,
    /// Number of files selected at the last mirror.
    pub file_count: usize,
}

/// The kind-specific payload of a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerRecord {
    /// A single file.
    File(FileRecord),
    /// A mirrored `/tree/` URL.
    Directory(DirectoryRecord),
    /// A mirrored repository.
    RemoteTree(RemoteTreeRecord),
}

impl LedgerRecord {
    /// The record's kind.
    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        match self {
            Self::File(_) => EntryKind::File,
            Self::Directory(_) => EntryKind::Directory,
            Self::RemoteTree(_) => EntryKind::RemoteTree,
        }
    }

    /// The source identity: URL for files and directories, repository id
    /// for remote trees.
    #[must_use]
    pub fn source_key(&self) -> &str {
        match self {
            Self::File(r) => &r.url,
            Self::Directory(r) => &r.url,
            Self::RemoteTree(r) => &r.model_id,
        }
    }

    /// The name section identifiers are derived from.
    #[must_use]
    pub fn natural_name(&self) -> &str {
        match self {
            Self::File(r) => &r.filename,
            Self::Directory(r) => last_component(&r.directory_path)
                .or_else(|| last_component(&r.repo_id))
                .unwrap_or(r.url.as_str()),
            Self::RemoteTree(r) => last_component(&r.model_id).unwrap_or(r.model_id.as_str()),
        }
    }
}

/// A record plus the time it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Kind-specific fields.
    pub record: LedgerRecord,
    /// Local time of the last write, in [`TIMESTAMP_FORMAT`].
    pub timestamp: Option<String>,
}

impl LedgerEntry {
    /// Wrap `record`, stamping it with the current local time.
    #[must_use]
    pub fn new(record: LedgerRecord) -> Self {
        Self {
            record,
            timestamp: Some(chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()),
        }
    }

    /// The record's kind.
    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        self.record.kind()
    }

    /// See [`LedgerRecord::source_key`].
    #[must_use]
    pub fn source_key(&self) -> &str {
        self.record.source_key()
    }

    pub(crate) fn to_section(&self, name: &str) -> IniSection {
        let mut fields: Vec<(String, String)> = Vec::new();
        let mut put = |key: &str, value: &str| fields.push((key.to_owned(), value.to_owned()));
        match &self.record {
            LedgerRecord::File(r) => {
                put("url", &r.url);
                put("subdirectory", &r.subdirectory);
                put("filename", &r.filename);
                put("filepath", &r.filepath);
                if let Some(hash) = r.hash.as_deref().filter(|h| !h.trim().is_empty()) {
                    put("hash", hash);
                }
            }
            LedgerRecord::Directory(r) => {
                put("type", TYPE_DIRECTORY);
                put("url", &r.url);
                put("subdirectory", &r.subdirectory);
                put("repo_id", &r.repo_id);
                put("revision", &r.revision);
                put("directory_path", &r.directory_path);
                put("file_count", &r.file_count.to_string());
            }
            LedgerRecord::RemoteTree(r) => {
                put("type", TYPE_REMOTE_TREE);
                put("model_id", &r.model_id);
                put("save_folder", &r.save_folder);
                put("revision", &r.revision);
                put("exclude_files", &r.exclude_files.join(","));
                put("file_count", &r.file_count.to_string());
            }
        }
        if let Some(timestamp) = &self.timestamp {
            put("timestamp", timestamp);
        }
        IniSection::new(name, fields)
    }

    pub(crate) fn from_section(section: &IniSection) -> Result<Self, LedgerError> {
        let reader = SectionReader(section);
        let kind = EntryKind::from_type_key(section.get("type")).ok_or_else(|| {
            LedgerError::UnknownKind {
                section: section.name().to_owned(),
                value: section.get("type").unwrap_or_default().to_owned(),
            }
        })?;
        let record = match kind {
            EntryKind::File => LedgerRecord::File(FileRecord {
                url: reader.required("url")?,
                subdirectory: reader.optional("subdirectory"),
                filename: reader.optional("filename"),
                filepath: reader.optional("filepath"),
                hash: Some(reader.optional("hash")).filter(|h| !h.is_empty()),
            }),
            EntryKind::Directory => LedgerRecord::Directory(DirectoryRecord {
                url: reader.optional("url"),
                subdirectory: reader.optional("subdirectory"),
                repo_id: reader.required("repo_id")?,
                revision: reader.revision(),
                directory_path: reader.optional("directory_path"),
                file_count: reader.count("file_count")?,
            }),
            EntryKind::RemoteTree => LedgerRecord::RemoteTree(RemoteTreeRecord {
                model_id: reader.required("model_id")?,
                save_folder: reader.optional("save_folder"),
                revision: reader.revision(),
                exclude_files: split_list(&reader.optional("exclude_files")),
                file_count: reader.count("file_count")?,
            }),
        };
        Ok(Self {
            record,
            timestamp: section.get("timestamp").map(str::to_owned),
        })
    }
}

struct SectionReader<'a>(&'a IniSection);

impl SectionReader<'_> {
    fn required(&self, key: &'static str) -> Result<String, LedgerError> {
        self.0
            .get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| LedgerError::MissingKey {
                section: self.0.name().to_owned(),
                key,
            })
    }

    fn optional(&self, key: &str) -> String {
        self.0.get(key).map(str::trim).unwrap_or_default().to_owned()
    }

    fn revision(&self) -> String {
        let value = self.optional("revision");
        if value.is_empty() {
            "main".to_owned()
        } else {
            value
        }
    }

    fn count(&self, key: &'static str) -> Result<usize, LedgerError> {
        let raw = self.optional(key);
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse().map_err(|_| LedgerError::InvalidValue {
            section: self.0.name().to_owned(),
            key,
            value: raw,
        })
    }
}

/// Split a comma- or newline-separated list, dropping blanks.
fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn last_component(value: &str) -> Option<&str> {
    value.trim_matches('/').rsplit('/').next().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn file_record() -> LedgerRecord {
        LedgerRecord::File(FileRecord {
            url: "https://huggingface.co/o/r/resolve/main/model.safetensors".to_owned(),
            subdirectory: "loras/SDXL".to_owned(),
            filename: "model.safetensors".to_owned(),
            filepath: "loras/SDXL/model.safetensors".to_owned(),
            hash: None,
        })
    }

    fn tree_record() -> LedgerRecord {
        LedgerRecord::RemoteTree(RemoteTreeRecord {
            model_id: "org/sdxl-vae".to_owned(),
            save_folder: "vae/sdxl".to_owned(),
            revision: "main".to_owned(),
            exclude_files: vec!["README.md".to_owned(), ".gitattributes".to_owned()],
            file_count: 4,
        })
    }

    #[test]
    fn file_sections_have_no_type_key_and_omit_blank_hash() {
        let section = LedgerEntry::new(file_record()).to_section("model_safetensors");
        assert_eq!(section.get("type"), None);
        assert_eq!(section.get("hash"), None);
        assert_eq!(section.get("filepath"), Some("loras/SDXL/model.safetensors"));
        assert!(section.get("timestamp").is_some());
    }

    #[rstest]
    #[case::file(file_record())]
    #[case::tree(tree_record())]
    #[case::directory(LedgerRecord::Directory(DirectoryRecord {
        url: "https://huggingface.co/o/r/tree/main/unet".to_owned(),
        subdirectory: "diffusers/unet".to_owned(),
        repo_id: "o/r".to_owned(),
        revision: "main".to_owned(),
        directory_path: "unet".to_owned(),
        file_count: 2,
    }))]
    fn sections_decode_to_the_same_record(#[case] record: LedgerRecord) {
        let entry = LedgerEntry::new(record);
        let decoded = LedgerEntry::from_section(&entry.to_section("s")).expect("decode");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn timestamp_uses_local_seconds_format() {
        let entry = LedgerEntry::new(file_record());
        let stamp = entry.timestamp.expect("timestamp");
        assert!(chrono::NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT).is_ok());
    }

    #[rstest]
    #[case::file(file_record(), "model.safetensors")]
    #[case::tree(tree_record(), "sdxl-vae")]
    fn natural_names(#[case] record: LedgerRecord, #[case] expected: &str) {
        assert_eq!(record.natural_name(), expected);
    }

    #[test]
    fn missing_url_is_reported() {
        let section = IniSection::new("x", vec![("filename".to_owned(), "a.bin".to_owned())]);
        let err = LedgerEntry::from_section(&section).expect_err("missing url");
        assert!(matches!(err, LedgerError::MissingKey { key: "url", .. }));
    }

    #[test]
    fn unknown_type_is_reported() {
        let section = IniSection::new(
            "x",
            vec![
                ("type".to_owned(), "torrent".to_owned()),
                ("url".to_owned(), "u".to_owned()),
            ],
        );
        let err = LedgerEntry::from_section(&section).expect_err("unknown type");
        assert!(matches!(err, LedgerError::UnknownKind { .. }));
    }

    #[test]
    fn bad_file_count_is_reported() {
        let section = IniSection::new(
            "x",
            vec![
                ("type".to_owned(), "huggingface_directory".to_owned()),
                ("model_id".to_owned(), "o/r".to_owned()),
                ("file_count".to_owned(), "many".to_owned()),
            ],
        );
        let err = LedgerEntry::from_section(&section).expect_err("bad count");
        assert!(matches!(err, LedgerError::InvalidValue { key: "file_count", .. }));
    }

    #[test]
    fn exclusion_lists_ignore_blanks() {
        assert_eq!(split_list(" a.md , ,b.txt\nc "), ["a.md", "b.txt", "c"]);
    }
}
