//! Durable provenance ledger stored as an INI file.
//!
//! Every operation re-reads the backing file; nothing is cached between
//! calls. Writes rewrite the whole file through a temporary sibling that is
//! renamed over the original, so readers never observe a half-written
//! ledger. Concurrent writers from several processes are not supported.

mod entry;
mod ini;

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info};
use thiserror::Error;

pub use entry::{
    DirectoryRecord, EntryKind, FileRecord, LedgerEntry, LedgerRecord, RemoteTreeRecord,
    TIMESTAMP_FORMAT,
};
use ini::{IniDocument, IniSection};

/// Conventional ledger filename inside the models root.
pub const DEFAULT_LEDGER_FILENAME: &str = "models.ini";

/// Errors raised while reading or writing the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger file could not be read.
    #[error("failed to read ledger {path}: {source}")]
    Read {
        /// Ledger path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The ledger file could not be written.
    #[error("failed to write ledger {path}: {source}")]
    Write {
        /// Ledger path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The ledger text is not valid INI.
    #[error("malformed ledger {path} at line {line}: {reason}")]
    Malformed {
        /// Ledger path.
        path: Utf8PathBuf,
        /// 1-based line number.
        line: usize,
        /// Parser message.
        reason: String,
    },
    /// A section lacks a key its kind requires.
    #[error("section [{section}] is missing required key '{key}'")]
    MissingKey {
        /// Section name.
        section: String,
        /// Missing key.
        key: &'static str,
    },
    /// A section has an unrecognised `type`.
    #[error("section [{section}] has unknown type '{value}'")]
    UnknownKind {
        /// Section name.
        section: String,
        /// The `type` value found.
        value: String,
    },
    /// A section value failed to parse.
    #[error("section [{section}] has invalid {key} '{value}'")]
    InvalidValue {
        /// Section name.
        section: String,
        /// Offending key.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}

/// One section as read from disk. Sections that fail to decode are still
/// returned so callers can report them individually.
#[derive(Debug)]
pub struct LedgerSection {
    /// Section identifier.
    pub name: String,
    /// Decoded entry or the reason it could not be decoded.
    pub entry: Result<LedgerEntry, LedgerError>,
}

/// Handle to a ledger file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    path: Utf8PathBuf,
}

impl Ledger {
    /// Open a handle; the file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Whether the backing file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// All sections in file order. A missing file yields no sections.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Read`] or [`LedgerError::Malformed`] when the
    /// file as a whole cannot be loaded. Per-section problems are reported
    /// inside each [`LedgerSection`].
    pub fn all(&self) -> Result<Vec<LedgerSection>, LedgerError> {
        let doc = self.load()?;
        Ok(doc
            .sections()
            .iter()
            .map(|section| LedgerSection {
                name: section.name().to_owned(),
                entry: LedgerEntry::from_section(section),
            })
            .collect())
    }

    /// Find the section recording `source_key` with the given kind.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be loaded or the matching
    /// section does not decode.
    pub fn find_by_source(
        &self,
        kind: EntryKind,
        source_key: &str,
    ) -> Result<Option<(String, LedgerEntry)>, LedgerError> {
        let doc = self.load()?;
        let Some(section) = find_section(&doc, kind, source_key) else {
            return Ok(None);
        };
        let entry = LedgerEntry::from_section(section)?;
        Ok(Some((section.name().to_owned(), entry)))
    }

    /// Insert or update `entry` and return the section identifier used.
    ///
    /// A section already holding the same kind and source key is rewritten
    /// in place. Otherwise a new section is named after the entry's
    /// sanitized natural name, with `_1`, `_2`, … appended until the name is
    /// free.
    ///
    /// # Errors
    ///
    /// Returns an error when the existing file cannot be loaded or the
    /// updated file cannot be written. A malformed ledger is never
    /// overwritten.
    pub fn upsert(&self, entry: &LedgerEntry) -> Result<String, LedgerError> {
        let mut doc = self.load()?;
        let name = match find_section(&doc, entry.kind(), entry.source_key()) {
            Some(existing) => existing.name().to_owned(),
            None => free_section_name(&doc, &section_base_name(entry.record.natural_name())),
        };
        doc.put_section(entry.to_section(&name));
        self.store(&doc)?;
        info!("recorded {} [{name}] in {}", entry.kind(), self.path);
        Ok(name)
    }

    fn load(&self) -> Result<IniDocument, LedgerError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("ledger {} does not exist yet", self.path);
                return Ok(IniDocument::default());
            }
            Err(source) => {
                return Err(LedgerError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        IniDocument::parse(&text).map_err(|err| LedgerError::Malformed {
            path: self.path.clone(),
            line: err.line,
            reason: err.reason,
        })
    }

    fn store(&self, doc: &IniDocument) -> Result<(), LedgerError> {
        let write_err = |source: io::Error| LedgerError::Write {
            path: self.path.clone(),
            source,
        };
        let parent = match self.path.parent() {
            Some(dir) if !dir.as_str().is_empty() => dir.to_owned(),
            _ => Utf8PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(write_err)?;
        let mut staged = tempfile::Builder::new()
            .prefix(".models-ini-")
            .tempfile_in(&parent)
            .map_err(write_err)?;
        staged
            .write_all(doc.render().as_bytes())
            .map_err(write_err)?;
        staged.as_file().sync_all().map_err(write_err)?;
        staged
            .persist(&self.path)
            .map_err(|err| write_err(err.error))?;
        Ok(())
    }
}

fn find_section<'d>(doc: &'d IniDocument, kind: EntryKind, source_key: &str) -> Option<&'d IniSection> {
    doc.sections().iter().find(|section| {
        EntryKind::identify(section).is_some_and(|(k, source)| k == kind && source.trim() == source_key.trim())
    })
}

/// Derive a section identifier from a natural name.
///
/// Dots become underscores, as do characters that would break the INI
/// syntax.
fn section_base_name(natural: &str) -> String {
    let cleaned: String = natural
        .trim()
        .chars()
        .map(|c| match c {
            '.' | '[' | ']' | '=' | ':' | ';' | '#' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "entry".to_owned()
    } else {
        cleaned
    }
}

fn free_section_name(doc: &IniDocument, base: &str) -> String {
    if doc.section(base).is_none() {
        return base.to_owned();
    }
    (1usize..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| doc.section(candidate).is_none())
        .unwrap_or_else(|| base.to_owned())
}

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;
