// Document model - ordered INI sections of ordered key/value pairs

mod parser;

pub use parser::{include_targets, INCLUDE_DIRECTIVE};

use crate::error::Result;
use indexmap::IndexMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A named block of key/value pairs. Keys are case-sensitive and unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    name: String,
    entries: IndexMap<String, String>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Section {
            name: name.into(),
            entries: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Set a key, replacing any previous value in place (position is kept).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of this section under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Section {
        Section {
            name: name.into(),
            entries: self.entries.clone(),
        }
    }

    /// Merge the keys of `other` into this section; later keys win.
    fn merge(&mut self, other: Section) {
        for (key, value) in other.entries {
            self.entries.insert(key, value);
        }
    }
}

/// An in-memory INI document: an optional verbatim header followed by
/// uniquely named sections, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    header: Option<String>,
    sections: IndexMap<String, Section>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document from text. `#include` lines are treated as comments.
    pub fn parse(text: &str) -> Result<Self> {
        parser::parse(text)
    }

    /// Read a document from disk, expanding `#include <path>` directives
    /// relative to the including file.
    pub fn read_file(path: &Path) -> Result<Self> {
        let text = parser::expand_includes(path)?;
        parser::parse(&text)
    }

    /// Write the document atomically: the content goes to a temporary file in
    /// the target directory which is then renamed over `path`. An existing
    /// file keeps its permissions.
    pub fn write_file(&self, path: &Path) -> Result<()> {
        use std::io::Write;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(self.to_string().as_bytes())?;
        match std::fs::metadata(path) {
            Ok(existing) => tmp.as_file().set_permissions(existing.permissions())?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => set_new_file_mode(tmp.as_file())?,
            Err(e) => return Err(e.into()),
        }
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    /// Free-form text written verbatim before the first section.
    pub fn set_header(&mut self, header: Option<String>) {
        self.header = header;
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.get_mut(name)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Get the named section, creating an empty one at the end if needed.
    pub fn add_section(&mut self, name: &str) -> &mut Section {
        self.sections
            .entry(name.to_string())
            .or_insert_with(|| Section::new(name))
    }

    /// Insert a section. A section with the same name is merged into,
    /// with the keys of `section` overriding existing ones.
    pub fn insert_section(&mut self, section: Section) {
        match self.sections.get_mut(section.name()) {
            Some(existing) => existing.merge(section),
            None => {
                self.sections.insert(section.name.clone(), section);
            }
        }
    }

    pub fn remove_section(&mut self, name: &str) -> Option<Section> {
        self.sections.shift_remove(name)
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.values()
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Append all sections of `other`, merging same-named sections.
    pub fn extend(&mut self, other: Document) {
        for section in other.sections.into_values() {
            self.insert_section(section);
        }
    }

    /// A new document holding copies of the sections accepted by `select`.
    pub fn filtered(&self, select: &dyn Fn(&str) -> bool) -> Document {
        let mut out = Document::new();
        for section in self.sections.values().filter(|s| select(s.name())) {
            out.insert_section(section.clone());
        }
        out
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        parser::write(self, f)
    }
}

impl FromStr for Document {
    type Err = crate::error::InsistError;

    fn from_str(s: &str) -> Result<Self> {
        Document::parse(s)
    }
}

/// Temporary files are private to the owner; a new document is not.
#[cfg(unix)]
fn set_new_file_mode(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_new_file_mode(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}
