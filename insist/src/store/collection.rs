use super::backend::{Fingerprint, Monolithic, Selector, StorageBackend};
use super::record::RecordStore;
use crate::document::{Document, Section};
use crate::error::{InsistError, Result};
use crate::record::{read_lock, write_lock, Record};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// A collection member. Identity is the allocation: compare with
/// [`Arc::ptr_eq`].
pub type Item = Arc<RwLock<Box<dyn Record>>>;

pub fn new_item(record: impl Record) -> Item {
    Arc::new(RwLock::new(Box::new(record)))
}

struct Entry {
    item: Item,
    fingerprint: Option<Fingerprint>,
}

/// Ordered key → item mapping owned by the application and kept in sync by
/// a [`CollectionStore`].
#[derive(Default)]
pub struct Collection {
    entries: IndexMap<String, Entry>,
}

pub type SharedCollection = Arc<RwLock<Collection>>;

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCollection {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn get(&self, key: &str) -> Option<&Item> {
        self.entries.get(key).map(|e| &e.item)
    }

    /// Insert an item. Its fingerprint is unknown, so the next load always
    /// decodes it.
    pub fn insert(&mut self, key: impl Into<String>, item: Item) -> Option<Item> {
        self.insert_entry(key.into(), item, None)
    }

    fn insert_entry(&mut self, key: String, item: Item, fingerprint: Option<Fingerprint>) -> Option<Item> {
        self.entries
            .insert(key, Entry { item, fingerprint })
            .map(|old| old.item)
    }

    /// Insert at `index`, or append when there is no such slot.
    fn insert_entry_at(&mut self, index: Option<usize>, key: String, item: Item, fingerprint: Option<Fingerprint>) {
        let entry = Entry { item, fingerprint };
        match index {
            Some(index) if index <= self.entries.len() => {
                self.entries.shift_insert(index, key, entry);
            }
            _ => {
                self.entries.insert(key, entry);
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Item> {
        self.entries.shift_remove(key).map(|e| e.item)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Item)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), &e.item))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The fingerprint recorded when the item was last loaded.
    pub fn fingerprint(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|e| e.fingerprint.as_deref())
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|(k, e)| (k, read_lock(&e.item).record_type_name())),
            )
            .finish()
    }
}

pub type ItemFactory = Arc<dyn Fn() -> Box<dyn Record> + Send + Sync>;
/// Builds the item for a section; may pick the record type from its content.
pub type TypedItemFactory = Arc<dyn Fn(&Section) -> Result<Box<dyn Record>> + Send + Sync>;
/// Runs on a freshly loaded record before it joins the collection.
pub type BeforeAdd = Arc<dyn Fn(&str, Box<dyn Record>) -> Result<Box<dyn Record>> + Send + Sync>;
pub type AfterAdd = Arc<dyn Fn(&str, &Item) + Send + Sync>;

/// What a load did to the collection, by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
    pub deleted: Vec<String>,
}

impl LoadReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Binds a schema to the sections `<prefix><key>` of a document and keeps
/// a shared [`Collection`] in sync with them.
///
/// Unchanged sections (same fingerprint as on the previous load) are not
/// decoded again. Existing items are updated in place as long as the factory
/// still yields the same record type, so references held elsewhere stay
/// valid across reloads.
#[derive(Clone)]
pub struct CollectionStore {
    name: String,
    prefix: String,
    records: RecordStore,
    backend: Arc<dyn StorageBackend>,
    factory: Option<ItemFactory>,
    typed_factory: Option<TypedItemFactory>,
    before_add: Option<BeforeAdd>,
    after_add: Option<AfterAdd>,
    collection: SharedCollection,
}

impl CollectionStore {
    pub fn new(
        name: impl Into<String>,
        prefix: impl Into<String>,
        records: RecordStore,
        collection: SharedCollection,
    ) -> Self {
        CollectionStore {
            name: name.into(),
            prefix: prefix.into(),
            records,
            backend: Arc::new(Monolithic::new()),
            factory: None,
            typed_factory: None,
            before_add: None,
            after_add: None,
            collection,
        }
    }

    pub fn with_backend(mut self, backend: impl StorageBackend + 'static) -> Self {
        self.backend = Arc::new(backend);
        self
    }

    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Record> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Factory consulted with the section; wins over [`with_factory`](Self::with_factory).
    pub fn with_typed_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Section) -> Result<Box<dyn Record>> + Send + Sync + 'static,
    {
        self.typed_factory = Some(Arc::new(factory));
        self
    }

    pub fn before_add<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, Box<dyn Record>) -> Result<Box<dyn Record>> + Send + Sync + 'static,
    {
        self.before_add = Some(Arc::new(hook));
        self
    }

    /// Called once a new item is in the collection. The collection is
    /// write-locked while the hook runs.
    pub fn after_add<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &Item) + Send + Sync + 'static,
    {
        self.after_add = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    pub fn collection(&self) -> &SharedCollection {
        &self.collection
    }

    fn create_item(&self, section: &Section) -> Result<Box<dyn Record>> {
        if let Some(factory) = &self.typed_factory {
            return factory(section);
        }
        match &self.factory {
            Some(factory) => Ok(factory()),
            None => Err(InsistError::Unimplemented(format!(
                "collection '{}' has no item factory",
                self.name
            ))),
        }
    }

    /// Synchronize the collection with the sections of `doc` carrying this
    /// store's prefix. Items without a section are deleted.
    ///
    /// A decode error aborts the load; changes applied to earlier sections
    /// stay applied.
    pub fn load(&self, doc: &Document) -> Result<LoadReport> {
        let started = Instant::now();
        let mut report = LoadReport::default();
        let mut collection = write_lock(&self.collection);
        let mut unloaded: IndexSet<String> = collection.entries.keys().cloned().collect();

        for section in doc.sections() {
            let Some(key) = self.key_of(section.name()) else {
                continue;
            };
            self.sync_section(&mut collection, key, section, &mut report)?;
            unloaded.shift_remove(key);
        }

        for key in unloaded {
            collection.remove(&key);
            report.deleted.push(key);
        }

        log::debug!(
            "Loaded collection '{}' in {:.1}ms: {} added, {} updated, {} unchanged, {} deleted",
            self.name,
            started.elapsed().as_secs_f64() * 1000.0,
            report.added.len(),
            report.updated.len(),
            report.skipped.len(),
            report.deleted.len()
        );
        Ok(report)
    }

    /// Synchronize a single section without deleting anything else.
    pub fn load_item(&self, section: &Section) -> Result<LoadReport> {
        let key = self.key_of(section.name()).ok_or_else(|| {
            InsistError::Other(format!(
                "section [{}] does not belong to collection '{}'",
                section.name(),
                self.name
            ))
        })?;
        let mut report = LoadReport::default();
        let mut collection = write_lock(&self.collection);
        self.sync_section(&mut collection, key, section, &mut report)?;
        Ok(report)
    }

    pub fn delete_item(&self, key: &str) -> Option<Item> {
        let removed = write_lock(&self.collection).remove(key);
        if removed.is_some() {
            log::debug!("Deleted '{key}' from collection '{}'", self.name);
        }
        removed
    }

    fn key_of<'s>(&self, section: &'s str) -> Option<&'s str> {
        section.strip_prefix(self.prefix.as_str()).filter(|key| !key.is_empty())
    }

    fn sync_section(
        &self,
        collection: &mut Collection,
        key: &str,
        section: &Section,
        report: &mut LoadReport,
    ) -> Result<()> {
        let fingerprint = self.backend.fingerprint(section);
        let mut existing = None;
        if let Some(entry) = collection.entries.get(key) {
            if fingerprint.is_some() && entry.fingerprint == fingerprint {
                report.skipped.push(key.to_string());
                return Ok(());
            }
            existing = Some(entry.item.clone());
        }

        let mut fresh = self.create_item(section)?;
        // slot of an item replaced by one of another type
        let mut slot = None;
        if let Some(item) = &existing {
            let old_type = read_lock(item).record_type();
            if old_type != fresh.record_type() {
                log::debug!(
                    "Item '{key}' of collection '{}' changed type to {}",
                    self.name,
                    fresh.record_type_name()
                );
                slot = collection.entries.get_index_of(key);
                collection.remove(key);
                existing = None;
            }
        }

        match existing {
            Some(item) => {
                {
                    let mut record = write_lock(&item);
                    self.records.load(section, &mut **record)?;
                }
                if let Some(entry) = collection.entries.get_mut(key) {
                    entry.fingerprint = fingerprint;
                }
                report.updated.push(key.to_string());
            }
            None => {
                self.records.load(section, &mut *fresh)?;
                if let Some(hook) = &self.before_add {
                    fresh = hook(key, fresh)?;
                }
                let item: Item = Arc::new(RwLock::new(fresh));
                collection.insert_entry_at(slot, key.to_string(), item.clone(), fingerprint);
                if let Some(hook) = &self.after_add {
                    hook(key, &item);
                }
                report.added.push(key.to_string());
            }
        }
        Ok(())
    }

    pub fn loads(&self, text: &str) -> Result<LoadReport> {
        self.load(&Document::parse(text)?)
    }

    /// Load through the storage backend, consulting `main` where the
    /// backend keeps sections (or stubs) in the main document.
    pub fn load_from_backend(&self, main: Option<&Document>) -> Result<LoadReport> {
        let doc = self
            .backend
            .load(main, &self.name, Selector::Prefix(&self.prefix))?;
        self.load(&doc)
    }

    /// Reload one item from its own file; deletes the item if the file is gone.
    pub fn reload_section(&self, section: &str) -> Result<LoadReport> {
        match self.backend.load_section(section)? {
            Some(loaded) => self.load_item(&loaded),
            None => {
                let mut report = LoadReport::default();
                if let Some(key) = self.key_of(section) {
                    if self.delete_item(key).is_some() {
                        report.deleted.push(key.to_string());
                    }
                }
                Ok(report)
            }
        }
    }

    /// One section per item, in collection order.
    pub fn dump(&self) -> Result<Document> {
        let mut doc = Document::new();
        doc.set_header(self.records.file_header().map(String::from));
        let collection = read_lock(&self.collection);
        for (key, item) in collection.iter() {
            let record = read_lock(item);
            let section = self.records.dump_named(&**record, &format!("{}{key}", self.prefix))?;
            doc.insert_section(section);
        }
        Ok(doc)
    }

    pub fn dumps(&self) -> Result<String> {
        Ok(self.dump()?.to_string())
    }

    /// Persist the collection through the storage backend.
    pub fn save(&self, main: &mut Document) -> Result<()> {
        let doc = self.dump()?;
        self.backend
            .save(main, &self.name, Selector::Prefix(&self.prefix), &doc)
    }

    /// Section an item file (or one of its side-car files) belongs to:
    /// `number:one.ini` and `number:one.notes.txt` both map to `number:one`.
    pub fn section_from_path(&self, path: &Path) -> Option<String> {
        let filename = path.file_name()?.to_string_lossy();
        let rest = filename.strip_prefix(self.prefix.as_str())?;
        let key = rest.split('.').next().filter(|key| !key.is_empty())?;
        Some(format!("{}{key}", self.prefix))
    }
}

impl fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionStore")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("layout", &self.backend.layout())
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecRegistry;
    use crate::store::backend::{FilePerItem, SeparateFile};
    use crate::testing::{counting_codecs, person_schema, Person, Robot};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    const CREW: &str = "\
[person:jeb]
firstname = Jebediah
lastname = Kerman
salary = 20000

[person:val]
firstname = Valentina
lastname = Kerman
salary = 30000
";

    fn crew_store(codecs: &CodecRegistry) -> CollectionStore {
        let records = RecordStore::new(person_schema(), codecs).unwrap();
        CollectionStore::new("crew", "person:", records, Collection::shared())
            .with_factory(|| Box::new(Person::default()))
    }

    fn person(item: &Item) -> Person {
        read_lock(item).downcast_ref::<Person>().unwrap().clone()
    }

    fn keys(store: &CollectionStore) -> Vec<String> {
        read_lock(store.collection()).keys().map(String::from).collect()
    }

    #[test]
    fn test_load_populates_collection() {
        let store = crew_store(&CodecRegistry::new());
        let report = store.loads(CREW).unwrap();

        assert_eq!(report.added, vec!["jeb", "val"]);
        assert_eq!(keys(&store), vec!["jeb", "val"]);
        let collection = read_lock(store.collection());
        let jeb = person(collection.get("jeb").unwrap());
        assert_eq!(jeb.firstname, "Jebediah");
        assert_eq!(jeb.salary, Some(20000));
    }

    #[test]
    fn test_dump_uses_prefix_and_order() {
        let store = crew_store(&CodecRegistry::new());
        {
            let mut collection = write_lock(store.collection());
            collection.insert("val", new_item(Person::new("Valentina", "Kerman")));
            collection.insert("jeb", new_item(Person::new("Jebediah", "Kerman")));
        }
        assert_eq!(
            store.dumps().unwrap(),
            "[person:val]\nfirstname = Valentina\nlastname = Kerman\nsalary = !None\nmotto = !None\n\n\
             [person:jeb]\nfirstname = Jebediah\nlastname = Kerman\nsalary = !None\nmotto = !None\n\n"
        );
    }

    #[test]
    fn test_dump_then_load_round_trip() {
        let store = crew_store(&CodecRegistry::new());
        store.loads(CREW).unwrap();
        let text = store.dumps().unwrap();

        let copy = crew_store(&CodecRegistry::new());
        copy.loads(&text).unwrap();
        assert_eq!(copy.dumps().unwrap(), text);
    }

    #[test]
    fn test_unchanged_sections_are_not_decoded() {
        let (codecs, decodes) = counting_codecs();
        let store = crew_store(&codecs);

        store.loads(CREW).unwrap();
        let first = decodes.load(Ordering::SeqCst);
        assert_eq!(first, 4);

        let report = store.loads(CREW).unwrap();
        assert_eq!(decodes.load(Ordering::SeqCst), first);
        assert_eq!(report.skipped, vec!["jeb", "val"]);
        assert!(report.is_noop());
    }

    #[test]
    fn test_add_remove_keep_identity() {
        let store = crew_store(&CodecRegistry::new());
        store.loads(CREW).unwrap();
        let val_before = read_lock(store.collection()).get("val").unwrap().clone();

        let report = store
            .loads(
                "[person:bill]\nfirstname = Bill\nlastname = Kerman\n\n\
                 [person:val]\nfirstname = Valentina\nlastname = Kerman\nsalary = 30000\n",
            )
            .unwrap();

        assert_eq!(report.added, vec!["bill"]);
        assert_eq!(report.skipped, vec!["val"]);
        assert_eq!(report.deleted, vec!["jeb"]);

        let collection = read_lock(store.collection());
        assert!(collection.get("jeb").is_none());
        assert_eq!(person(collection.get("bill").unwrap()).firstname, "Bill");
        assert!(Arc::ptr_eq(collection.get("val").unwrap(), &val_before));
    }

    #[test]
    fn test_changed_section_updates_in_place() {
        let store = crew_store(&CodecRegistry::new());
        store.loads(CREW).unwrap();
        let jeb_before = read_lock(store.collection()).get("jeb").unwrap().clone();

        let report = store.loads(&CREW.replace("20000", "25000")).unwrap();
        assert_eq!(report.updated, vec!["jeb"]);

        let collection = read_lock(store.collection());
        let jeb = collection.get("jeb").unwrap();
        assert!(Arc::ptr_eq(jeb, &jeb_before));
        assert_eq!(person(jeb).salary, Some(25000));
    }

    #[test]
    fn test_type_change_replaces_item() {
        let records = RecordStore::new(person_schema(), &CodecRegistry::new()).unwrap();
        let store = CollectionStore::new("crew", "person:", records, Collection::shared())
            .with_factory(|| Box::new(Robot::default()))
            .with_typed_factory(|section| {
                if section.contains_key("salary") {
                    Ok(Box::new(Person::default()) as Box<dyn Record>)
                } else {
                    Ok(Box::new(Robot::default()) as Box<dyn Record>)
                }
            });

        store.loads(CREW).unwrap();
        let val_before = read_lock(store.collection()).get("val").unwrap().clone();
        assert!(read_lock(&val_before).is::<Person>());

        let report = store
            .loads(&CREW.replace("salary = 30000\n", ""))
            .unwrap();
        assert_eq!(report.added, vec!["val"]);

        let collection = read_lock(store.collection());
        let val = collection.get("val").unwrap();
        assert!(!Arc::ptr_eq(val, &val_before));
        let record = read_lock(val);
        assert_eq!(record.downcast_ref::<Robot>().unwrap().firstname, "Valentina");
        // The old item is left untouched.
        assert_eq!(person(&val_before).salary, Some(30000));
    }

    #[test]
    fn test_type_change_keeps_position() {
        let records = RecordStore::new(person_schema(), &CodecRegistry::new()).unwrap();
        let store = CollectionStore::new("crew", "person:", records, Collection::shared())
            .with_typed_factory(|section| {
                if section.contains_key("salary") {
                    Ok(Box::new(Person::default()) as Box<dyn Record>)
                } else {
                    Ok(Box::new(Robot::default()) as Box<dyn Record>)
                }
            });

        store.loads(CREW).unwrap();
        let report = store
            .loads(&CREW.replace("salary = 20000\n", ""))
            .unwrap();
        assert_eq!(report.added, vec!["jeb"]);

        let keys: Vec<String> = read_lock(store.collection()).keys().map(String::from).collect();
        assert_eq!(keys, vec!["jeb", "val"]);
        assert!(read_lock(read_lock(store.collection()).get("jeb").unwrap()).is::<Robot>());
        let names = store.dump().unwrap().section_names().map(String::from).collect::<Vec<_>>();
        assert_eq!(names, vec!["person:jeb", "person:val"]);
    }

    #[test]
    fn test_missing_factory_is_unimplemented() {
        let records = RecordStore::new(person_schema(), &CodecRegistry::new()).unwrap();
        let store = CollectionStore::new("crew", "person:", records, Collection::shared());
        let err = store.loads(CREW).unwrap_err();
        assert!(matches!(err, InsistError::Unimplemented(_)));
    }

    #[test]
    fn test_decode_error_keeps_earlier_sections() {
        let store = crew_store(&CodecRegistry::new());
        let err = store
            .loads(&CREW.replace("salary = 30000", "salary = plenty"))
            .unwrap_err();
        assert!(matches!(err, InsistError::Decode { .. }));
        assert_eq!(keys(&store), vec!["jeb"]);
    }

    #[test]
    fn test_add_hooks() {
        let added = Arc::new(Mutex::new(Vec::new()));
        let sink = added.clone();
        let store = crew_store(&CodecRegistry::new())
            .before_add(|_, mut record| {
                record.set("motto", "Fly safe".into())?;
                Ok(record)
            })
            .after_add(move |key, _| sink.lock().unwrap().push(key.to_string()));

        store.loads(CREW).unwrap();
        store.loads(CREW).unwrap();
        assert_eq!(*added.lock().unwrap(), vec!["jeb", "val"]);

        let collection = read_lock(store.collection());
        assert_eq!(person(collection.get("val").unwrap()).motto.as_deref(), Some("Fly safe"));
    }

    #[test]
    fn test_inserted_items_are_always_decoded() {
        let store = crew_store(&CodecRegistry::new());
        let jeb = new_item(Person::new("Jeb", "K"));
        write_lock(store.collection()).insert("jeb", jeb.clone());

        let report = store.loads(CREW).unwrap();
        assert_eq!(report.updated, vec!["jeb"]);
        assert_eq!(person(&jeb).firstname, "Jebediah");
        assert!(read_lock(store.collection()).fingerprint("jeb").is_some());
    }

    #[test]
    fn test_load_item_and_delete_item() {
        let store = crew_store(&CodecRegistry::new());
        store.loads(CREW).unwrap();

        let bill = Document::parse("[person:bill]\nfirstname = Bill\n").unwrap();
        let report = store.load_item(bill.section("person:bill").unwrap()).unwrap();
        assert_eq!(report.added, vec!["bill"]);
        assert_eq!(keys(&store), vec!["jeb", "val", "bill"]);

        assert!(store.delete_item("jeb").is_some());
        assert!(store.delete_item("jeb").is_none());
        assert_eq!(keys(&store), vec!["val", "bill"]);

        let stranger = Section::new("company:kerbal");
        assert!(store.load_item(&stranger).is_err());
    }

    #[test]
    fn test_section_from_path() {
        let store = crew_store(&CodecRegistry::new());
        assert_eq!(
            store.section_from_path(Path::new("/data/person:jeb.ini")),
            Some("person:jeb".to_string())
        );
        assert_eq!(
            store.section_from_path(Path::new("/data/person:jeb.photo.png")),
            Some("person:jeb".to_string())
        );
        assert_eq!(store.section_from_path(Path::new("/data/company:x.ini")), None);
        assert_eq!(store.section_from_path(Path::new("/data/person:.ini")), None);
    }

    #[test]
    fn test_separate_file_backend() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = crew_store(&CodecRegistry::new()).with_backend(SeparateFile::new(tmp.path()));
        store.loads(CREW).unwrap();

        let mut main = Document::new();
        store.save(&mut main).unwrap();
        assert_eq!(main.to_string(), "[crew]\nconfig-file = crew.ini\n\n");

        let copy = crew_store(&CodecRegistry::new()).with_backend(SeparateFile::new(tmp.path()));
        let report = copy.load_from_backend(Some(&main)).unwrap();
        assert_eq!(report.added, vec!["jeb", "val"]);
    }

    #[test]
    fn test_file_per_item_backend() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = FilePerItem::new(tmp.path());
        let store = crew_store(&CodecRegistry::new()).with_backend(backend.clone());
        store.loads(CREW).unwrap();
        store.save(&mut Document::new()).unwrap();

        let copy = crew_store(&CodecRegistry::new()).with_backend(backend);
        copy.load_from_backend(None).unwrap();
        assert_eq!(keys(&copy), vec!["jeb", "val"]);

        // Unchanged files are skipped, a side-car file counts as a change.
        let report = copy.load_from_backend(None).unwrap();
        assert_eq!(report.skipped, vec!["jeb", "val"]);
        std::fs::write(tmp.path().join("person:val.notes"), "likes rockets").unwrap();
        let report = copy.load_from_backend(None).unwrap();
        assert_eq!(report.updated, vec!["val"]);

        std::fs::remove_file(tmp.path().join("person:jeb.ini")).unwrap();
        let report = copy.reload_section("person:jeb").unwrap();
        assert_eq!(report.deleted, vec!["jeb"]);
        assert_eq!(keys(&copy), vec!["val"]);
    }
}
