use crate::document::{Document, Section};
use crate::error::{InsistError, Result};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Key of the stub section written to the main document for a store kept
/// in its own file.
pub const CONFIG_FILE_KEY: &str = "config-file";

/// Suffix of per-item files unless configured otherwise.
pub const DEFAULT_SUFFIX: &str = ".ini";

/// Opaque change marker for one section. Equal fingerprints mean the
/// section can be skipped on reload.
pub type Fingerprint = String;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layout {
    #[default]
    Monolithic,
    SeparateFile,
    FilePerItem,
}

/// Which sections of a document belong to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector<'a> {
    /// Collection members: every section starting with the prefix.
    Prefix(&'a str),
    /// A single record section.
    Exact(&'a str),
}

impl Selector<'_> {
    pub fn matches(&self, section: &str) -> bool {
        match self {
            Selector::Prefix(prefix) => section.starts_with(prefix),
            Selector::Exact(name) => section == *name,
        }
    }
}

/// Where the sections of a store live and how their changes are detected.
pub trait StorageBackend: Send + Sync {
    fn layout(&self) -> Layout;

    /// Load the sections selected for the store `name`. `main` is the main
    /// document when the caller has one at hand.
    fn load(&self, main: Option<&Document>, name: &str, selector: Selector<'_>) -> Result<Document>;

    /// Persist `sections`, replacing what the store wrote before. Stubs
    /// pointing at other files go into `main`.
    fn save(&self, main: &mut Document, name: &str, selector: Selector<'_>, sections: &Document) -> Result<()>;

    fn fingerprint(&self, section: &Section) -> Option<Fingerprint>;

    /// Glob patterns (matched against absolute paths) of the files this
    /// store is loaded from.
    fn file_patterns(&self, name: &str, prefix: &str) -> Vec<String>;

    /// Read one section from its own file. `Ok(None)` when the file is gone.
    fn load_section(&self, section: &str) -> Result<Option<Section>> {
        Err(InsistError::Unimplemented(format!(
            "{:?} storage cannot load section [{section}] on its own",
            self.layout()
        )))
    }
}

fn hex(hasher: DefaultHasher) -> Fingerprint {
    format!("{:016x}", hasher.finish())
}

/// Content hash of a section: its name and every key/value pair in order.
pub fn section_hash(section: &Section) -> Fingerprint {
    let mut hasher = DefaultHasher::new();
    section.name().hash(&mut hasher);
    for (key, value) in section.iter() {
        key.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    hex(hasher)
}

fn select(doc: &Document, selector: Selector<'_>) -> Document {
    doc.filtered(&|name: &str| selector.matches(name))
}

fn remove_selected(main: &mut Document, selector: Selector<'_>) {
    let stale: Vec<String> = main
        .section_names()
        .filter(|name| selector.matches(name))
        .map(String::from)
        .collect();
    for name in stale {
        main.remove_section(&name);
    }
}

/// Every section of every store in one document.
#[derive(Debug, Clone, Default)]
pub struct Monolithic {
    file: Option<PathBuf>,
}

impl Monolithic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound to the main document's file, so changes to it can be routed.
    pub fn bound(file: impl Into<PathBuf>) -> Self {
        Monolithic {
            file: Some(file.into()),
        }
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}

impl StorageBackend for Monolithic {
    fn layout(&self) -> Layout {
        Layout::Monolithic
    }

    fn load(&self, main: Option<&Document>, _name: &str, selector: Selector<'_>) -> Result<Document> {
        if let Some(main) = main {
            return Ok(select(main, selector));
        }
        match &self.file {
            Some(file) if file.is_file() => Ok(select(&Document::read_file(file)?, selector)),
            Some(file) => Err(InsistError::ConfigurationLoad {
                path: file.clone(),
                reason: "main configuration file is missing".into(),
            }),
            None => Ok(Document::new()),
        }
    }

    fn save(&self, main: &mut Document, _name: &str, selector: Selector<'_>, sections: &Document) -> Result<()> {
        remove_selected(main, selector);
        main.extend(sections.clone());
        Ok(())
    }

    fn fingerprint(&self, section: &Section) -> Option<Fingerprint> {
        Some(section_hash(section))
    }

    fn file_patterns(&self, _name: &str, _prefix: &str) -> Vec<String> {
        self.file
            .as_deref()
            .and_then(Path::file_name)
            .map(|f| format!("*/{}", glob::Pattern::escape(&f.to_string_lossy())))
            .into_iter()
            .collect()
    }
}

/// A store's sections live in `<dir>/<name>.ini`; the main document only
/// keeps a `config-file = <name>.ini` stub.
#[derive(Debug, Clone)]
pub struct SeparateFile {
    dir: PathBuf,
    dump_stub: bool,
}

impl SeparateFile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SeparateFile {
            dir: dir.into(),
            dump_stub: true,
        }
    }

    /// Whether `save` writes the stub section into the main document.
    pub fn dump_stub(mut self, dump_stub: bool) -> Self {
        self.dump_stub = dump_stub;
        self
    }

    pub fn filename(name: &str) -> String {
        format!("{name}{DEFAULT_SUFFIX}")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(Self::filename(name))
    }
}

impl StorageBackend for SeparateFile {
    fn layout(&self) -> Layout {
        Layout::SeparateFile
    }

    fn load(&self, main: Option<&Document>, name: &str, selector: Selector<'_>) -> Result<Document> {
        let path = self.path(name);
        if path.is_file() {
            return Ok(select(&Document::read_file(&path)?, selector));
        }

        // Stores written before they moved to their own file.
        let fallback = main
            .map(|main| select(main, selector))
            .filter(|doc| !doc.is_empty());
        match fallback {
            Some(doc) if doc.sections().any(|s| s.contains_key(CONFIG_FILE_KEY)) => {
                Err(InsistError::ConfigurationLoad {
                    path,
                    reason: "referenced by the main configuration but missing".into(),
                })
            }
            Some(doc) => Ok(doc),
            None if matches!(selector, Selector::Exact(_)) => Err(InsistError::ConfigurationLoad {
                path,
                reason: "no such file and no section in the main configuration".into(),
            }),
            None => Ok(Document::new()),
        }
    }

    fn save(&self, main: &mut Document, name: &str, selector: Selector<'_>, sections: &Document) -> Result<()> {
        sections.write_file(&self.path(name))?;
        remove_selected(main, selector);
        if self.dump_stub {
            main.add_section(name).set(CONFIG_FILE_KEY, Self::filename(name));
        }
        Ok(())
    }

    fn fingerprint(&self, section: &Section) -> Option<Fingerprint> {
        Some(section_hash(section))
    }

    fn file_patterns(&self, name: &str, _prefix: &str) -> Vec<String> {
        vec![format!("*/{}", glob::Pattern::escape(&Self::filename(name)))]
    }
}

/// One file per collection item, named `<section><suffix>`. Side-car files
/// `<section>.*` take part in change detection.
#[derive(Debug, Clone)]
pub struct FilePerItem {
    dir: PathBuf,
    suffix: String,
}

impl FilePerItem {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FilePerItem {
            dir: dir.into(),
            suffix: DEFAULT_SUFFIX.to_string(),
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn item_path(&self, section: &str) -> PathBuf {
        self.dir.join(format!("{section}{}", self.suffix))
    }

    /// Section names of the item files in the directory, sorted.
    fn item_sections(&self, prefix: &str) -> Result<Vec<String>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut sections = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();
            if filename.starts_with(prefix) && filename.len() > self.suffix.len() {
                if let Some(section) = filename.strip_suffix(self.suffix.as_str()) {
                    sections.push(section.to_string());
                }
            }
        }
        sections.sort();
        Ok(sections)
    }

    /// `<section>.*` files, sorted by path.
    fn related_files(&self, section: &str) -> Vec<PathBuf> {
        let pattern = format!(
            "{}/{}.*",
            glob::Pattern::escape(&self.dir.to_string_lossy()),
            glob::Pattern::escape(section)
        );
        let mut files: Vec<PathBuf> = match glob::glob(&pattern) {
            Ok(paths) => paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect(),
            Err(_) => Vec::new(),
        };
        files.sort();
        files
    }
}

impl StorageBackend for FilePerItem {
    fn layout(&self) -> Layout {
        Layout::FilePerItem
    }

    fn load(&self, _main: Option<&Document>, _name: &str, selector: Selector<'_>) -> Result<Document> {
        let prefix = match selector {
            Selector::Prefix(prefix) | Selector::Exact(prefix) => prefix,
        };
        let mut doc = Document::new();
        for name in self.item_sections(prefix)? {
            if !selector.matches(&name) {
                continue;
            }
            match self.load_section(&name)? {
                Some(section) => doc.insert_section(section),
                None => log::warn!("{} has no [{name}] section", self.item_path(&name).display()),
            }
        }
        Ok(doc)
    }

    fn save(&self, _main: &mut Document, _name: &str, selector: Selector<'_>, sections: &Document) -> Result<()> {
        let prefix = match selector {
            Selector::Prefix(prefix) | Selector::Exact(prefix) => prefix,
        };
        for stale in self.item_sections(prefix)? {
            if selector.matches(&stale) && !sections.has_section(&stale) {
                std::fs::remove_file(self.item_path(&stale))?;
            }
        }
        for section in sections.sections() {
            let mut doc = Document::new();
            doc.set_header(sections.header().map(String::from));
            doc.insert_section(section.clone());
            doc.write_file(&self.item_path(section.name()))?;
        }
        Ok(())
    }

    fn fingerprint(&self, section: &Section) -> Option<Fingerprint> {
        let files = self.related_files(section.name());
        if files.is_empty() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        for file in files {
            let modified = std::fs::metadata(&file)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok());
            let bytes = std::fs::read(&file).ok()?;
            file.hash(&mut hasher);
            modified.hash(&mut hasher);
            bytes.hash(&mut hasher);
        }
        Some(hex(hasher))
    }

    fn file_patterns(&self, _name: &str, prefix: &str) -> Vec<String> {
        vec![format!("*/{}*.*", glob::Pattern::escape(prefix))]
    }

    fn load_section(&self, section: &str) -> Result<Option<Section>> {
        let path = self.item_path(section);
        if !path.is_file() {
            return Ok(None);
        }
        let doc = Document::read_file(&path)?;
        Ok(doc.section(section).cloned())
    }
}
