//! Minimal ordered INI codec.
//!
//! Reads the dialect written by common INI libraries: `[section]` headers,
//! `key = value` or `key: value` pairs, `#` and `;` comment lines, and
//! indented continuation lines. Keys are case-insensitive and stored
//! lowercased. Section order and key order survive a parse/render round
//! trip; comments do not.

/// A parse failure with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IniError {
    pub(crate) line: usize,
    pub(crate) reason: String,
}

impl IniError {
    fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// One `[name]` block and its key/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IniSection {
    name: String,
    entries: Vec<(String, String)>,
}

impl IniSection {
    pub(crate) fn new(name: &str, entries: Vec<(String, String)>) -> Self {
        Self {
            name: name.to_owned(),
            entries,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Look up a key case-insensitively.
    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    #[cfg(test)]
    pub(crate) fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

/// An ordered collection of sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct IniDocument {
    sections: Vec<IniSection>,
}

impl IniDocument {
    /// Parse INI text.
    pub(crate) fn parse(text: &str) -> Result<Self, IniError> {
        let mut sections: Vec<IniSection> = Vec::new();
        let mut last_key: Option<usize> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                last_key = None;
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }
            let indented = raw.starts_with([' ', '\t']);
            if indented {
                if let (Some(section), Some(key_idx)) = (sections.last_mut(), last_key) {
                    if let Some((_, value)) = section.entries.get_mut(key_idx) {
                        if !value.is_empty() {
                            value.push('\n');
                        }
                        value.push_str(trimmed);
                        continue;
                    }
                }
            }
            if let Some(header) = trimmed.strip_prefix('[') {
                let name = header
                    .strip_suffix(']')
                    .ok_or_else(|| IniError::new(line_no, "unterminated section header"))?
                    .trim();
                if name.is_empty() {
                    return Err(IniError::new(line_no, "empty section name"));
                }
                if sections.iter().any(|s| s.name == name) {
                    return Err(IniError::new(line_no, format!("duplicate section [{name}]")));
                }
                sections.push(IniSection::new(name, Vec::new()));
                last_key = None;
                continue;
            }
            let Some(section) = sections.last_mut() else {
                return Err(IniError::new(line_no, "key outside of any section"));
            };
            let (key, value) = split_pair(trimmed)
                .ok_or_else(|| IniError::new(line_no, format!("expected 'key = value', got '{trimmed}'")))?;
            if section.entries.iter().any(|(k, _)| *k == key) {
                return Err(IniError::new(
                    line_no,
                    format!("duplicate key '{key}' in [{}]", section.name),
                ));
            }
            section.entries.push((key, value.to_owned()));
            last_key = Some(section.entries.len() - 1);
        }

        Ok(Self { sections })
    }

    /// Render sections in order, separated by blank lines.
    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for (key, value) in &section.entries {
                let mut lines = value.split('\n');
                let first = lines.next().unwrap_or_default();
                out.push_str(&format!("{key} = {first}\n"));
                // A blank continuation would read back as the end of the value.
                for continuation in lines.filter(|line| !line.trim().is_empty()) {
                    out.push('\t');
                    out.push_str(continuation);
                    out.push('\n');
                }
            }
            out.push('\n');
        }
        out
    }

    pub(crate) fn sections(&self) -> &[IniSection] {
        &self.sections
    }

    pub(crate) fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Replace the named section in place, or append it.
    pub(crate) fn put_section(&mut self, section: IniSection) {
        match self.sections.iter_mut().find(|s| s.name == section.name) {
            Some(existing) => *existing = section,
            None => self.sections.push(section),
        }
    }
}

fn split_pair(line: &str) -> Option<(String, &str)> {
    let split_at = line.find(['=', ':'])?;
    let key = line.get(..split_at)?.trim();
    if key.is_empty() {
        return None;
    }
    let value = line.get(split_at + 1..)?.trim();
    Some((key.to_ascii_lowercase(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SAMPLE: &str = "\
# provenance
[model_safetensors]
url = https://huggingface.co/o/r/resolve/main/model.safetensors
Subdirectory: checkpoints

; second entry
[other]
notes = first line
\tsecond line
empty =
";

    #[test]
    fn parses_sections_in_order_with_lowercased_keys() {
        let doc = IniDocument::parse(SAMPLE).expect("parse");
        let names: Vec<&str> = doc.sections().iter().map(IniSection::name).collect();
        assert_eq!(names, ["model_safetensors", "other"]);

        let first = doc.section("model_safetensors").expect("section");
        assert_eq!(first.get("SUBDIRECTORY"), Some("checkpoints"));
        assert_eq!(
            first.get("url"),
            Some("https://huggingface.co/o/r/resolve/main/model.safetensors")
        );
    }

    #[test]
    fn joins_continuation_lines() {
        let doc = IniDocument::parse(SAMPLE).expect("parse");
        let other = doc.section("other").expect("section");
        assert_eq!(other.get("notes"), Some("first line\nsecond line"));
        assert_eq!(other.get("empty"), Some(""));
    }

    #[test]
    fn render_then_parse_preserves_content() {
        let doc = IniDocument::parse(SAMPLE).expect("parse");
        let reparsed = IniDocument::parse(&doc.render()).expect("reparse");
        assert_eq!(doc, reparsed);
    }

    #[test]
    fn blank_inner_lines_do_not_truncate_the_value() {
        let doc = IniDocument {
            sections: vec![IniSection::new(
                "notes",
                vec![
                    ("body".to_owned(), "first\n\n  \nlast".to_owned()),
                    ("after".to_owned(), "kept".to_owned()),
                ],
            )],
        };

        let rendered = doc.render();
        let reparsed = IniDocument::parse(&rendered).expect("reparse");
        let section = reparsed.section("notes").expect("section");

        assert_eq!(section.get("body"), Some("first\nlast"), "{rendered}");
        assert_eq!(section.get("after"), Some("kept"));
    }

    #[test]
    fn values_keep_colons_after_the_first_separator() {
        let doc = IniDocument::parse("[s]\ntimestamp = 2025-01-02 03:04:05\n").expect("parse");
        let section = doc.section("s").expect("section");
        assert_eq!(section.get("timestamp"), Some("2025-01-02 03:04:05"));
        assert_eq!(section.entries().len(), 1);
    }

    #[rstest]
    #[case::orphan_key("url = x\n", 1)]
    #[case::duplicate_section("[a]\nk = 1\n[a]\n", 3)]
    #[case::duplicate_key("[a]\nk = 1\nK = 2\n", 3)]
    #[case::unterminated("[a\n", 1)]
    #[case::bare_word("[a]\njunk\n", 2)]
    fn reports_malformed_lines(#[case] text: &str, #[case] line: usize) {
        let err = IniDocument::parse(text).expect_err("malformed");
        assert_eq!(err.line, line);
    }

    #[test]
    fn put_section_replaces_in_place() {
        let mut doc = IniDocument::parse("[a]\nk = 1\n[b]\nk = 2\n").expect("parse");
        doc.put_section(IniSection::new("a", vec![("z".to_owned(), "9".to_owned())]));
        let names: Vec<&str> = doc.sections().iter().map(IniSection::name).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(doc.section("a").and_then(|s| s.get("k")), None);
        assert_eq!(doc.section("a").and_then(|s| s.get("z")), Some("9"));
    }
}
