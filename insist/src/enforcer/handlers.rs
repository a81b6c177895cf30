use super::{EnforcedStore, StoreRegistration};
use crate::document::Document;
use crate::error::{InsistError, Result};
use crate::record::write_lock;
use crate::store::{CollectionStore, Item, Layout, LoadReport, RecordStore};
use crate::watcher::FsEvent;
use std::fmt;
use std::path::{Path, PathBuf};

/// Registers a collection with the enforcer. The handler bound to a file
/// depends on the storage layout of the collection.
#[derive(Debug, Clone)]
pub struct EnforcedCollection {
    store: CollectionStore,
}

impl EnforcedCollection {
    pub fn new(store: CollectionStore) -> Self {
        EnforcedCollection { store }
    }

    pub fn store(&self) -> &CollectionStore {
        &self.store
    }
}

impl StoreRegistration for EnforcedCollection {
    fn name(&self) -> &str {
        self.store.name()
    }

    fn file_patterns(&self) -> Vec<String> {
        self.store
            .backend()
            .file_patterns(self.store.name(), self.store.prefix())
    }

    fn from_root_and_filename(&self, _root: &Path, path: &Path) -> Result<Box<dyn EnforcedStore>> {
        let store = self.store.clone();
        let path = path.to_path_buf();
        let handler: Box<dyn EnforcedStore> = match store.backend().layout() {
            Layout::Monolithic | Layout::SeparateFile => Box::new(WholeFileHandler { store, path }),
            Layout::FilePerItem => {
                let section = store.section_from_path(&path).ok_or_else(|| {
                    InsistError::Other(format!(
                        "{} is not an item file of collection '{}'",
                        path.display(),
                        store.name()
                    ))
                })?;
                Box::new(FileSectionsHandler { store, section })
            }
        };
        Ok(handler)
    }
}

fn log_report(store: &CollectionStore, report: &LoadReport) {
    if !report.is_noop() {
        log::debug!(
            "Collection '{}': added {:?}, updated {:?}, deleted {:?}",
            store.name(),
            report.added,
            report.updated,
            report.deleted
        );
    }
}

/// The file holds every section of the collection: reload it as a whole.
struct WholeFileHandler {
    store: CollectionStore,
    path: PathBuf,
}

impl WholeFileHandler {
    fn reload(&self) -> Result<()> {
        let doc = Document::read_file(&self.path)?;
        let report = self.store.load(&doc)?;
        log_report(&self.store, &report);
        Ok(())
    }
}

impl EnforcedStore for WholeFileHandler {
    fn describe(&self) -> String {
        format!("'{}' ({})", self.store.name(), self.path.display())
    }

    fn on_created(&mut self, _event: &FsEvent) -> Result<()> {
        self.reload()
    }

    fn on_modified(&mut self, _event: &FsEvent) -> Result<()> {
        self.reload()
    }

    fn on_deleted(&mut self, event: &FsEvent) -> Result<()> {
        log::error!("Collection files should not be deleted: {}", event.path.display());
        Ok(())
    }
}

/// One file per item: only the section the file belongs to is reloaded.
struct FileSectionsHandler {
    store: CollectionStore,
    section: String,
}

impl FileSectionsHandler {
    fn reload(&self) -> Result<()> {
        let report = self.store.reload_section(&self.section)?;
        log_report(&self.store, &report);
        Ok(())
    }
}

impl EnforcedStore for FileSectionsHandler {
    fn describe(&self) -> String {
        format!("'{}' [{}]", self.store.name(), self.section)
    }

    fn on_created(&mut self, _event: &FsEvent) -> Result<()> {
        self.reload()
    }

    fn on_modified(&mut self, _event: &FsEvent) -> Result<()> {
        self.reload()
    }

    /// Deleting the item file deletes the item; deleting a side-car file
    /// reloads it.
    fn on_deleted(&mut self, _event: &FsEvent) -> Result<()> {
        self.reload()
    }
}

/// Registers a single record kept in its own file.
#[derive(Clone)]
pub struct EnforcedRecord {
    name: String,
    filename: String,
    records: RecordStore,
    item: Item,
}

impl EnforcedRecord {
    pub fn new(name: impl Into<String>, filename: impl Into<String>, records: RecordStore, item: Item) -> Self {
        EnforcedRecord {
            name: name.into(),
            filename: filename.into(),
            records,
            item,
        }
    }

    pub fn item(&self) -> &Item {
        &self.item
    }
}

impl fmt::Debug for EnforcedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnforcedRecord")
            .field("name", &self.name)
            .field("filename", &self.filename)
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

impl StoreRegistration for EnforcedRecord {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_patterns(&self) -> Vec<String> {
        vec![format!("*/{}", glob::Pattern::escape(&self.filename))]
    }

    fn from_root_and_filename(&self, _root: &Path, path: &Path) -> Result<Box<dyn EnforcedStore>> {
        Ok(Box::new(RecordFileHandler {
            records: self.records.clone(),
            item: self.item.clone(),
            path: path.to_path_buf(),
        }))
    }
}

struct RecordFileHandler {
    records: RecordStore,
    item: Item,
    path: PathBuf,
}

impl RecordFileHandler {
    fn reload(&self) -> Result<()> {
        let doc = Document::read_file(&self.path)?;
        let section = doc
            .section(self.records.section())
            .ok_or_else(|| InsistError::ConfigurationLoad {
                path: self.path.clone(),
                reason: format!("no [{}] section", self.records.section()),
            })?;
        let mut record = write_lock(&self.item);
        self.records.load(section, &mut **record)
    }
}

impl EnforcedStore for RecordFileHandler {
    fn describe(&self) -> String {
        format!("[{}] ({})", self.records.section(), self.path.display())
    }

    fn on_created(&mut self, _event: &FsEvent) -> Result<()> {
        self.reload()
    }

    fn on_modified(&mut self, _event: &FsEvent) -> Result<()> {
        self.reload()
    }

    fn on_deleted(&mut self, event: &FsEvent) -> Result<()> {
        log::error!("Configuration files should not be deleted: {}", event.path.display());
        Ok(())
    }
}
