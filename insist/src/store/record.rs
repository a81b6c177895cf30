use super::backend::{Selector, StorageBackend};
use crate::codec::{deserialize, serialize, CodecRegistry, FieldCodec};
use crate::document::{Document, Section};
use crate::error::{InsistError, Result};
use crate::record::Record;
use crate::schema::{Field, Schema, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Writes one attribute in place of its codec. `Ok(None)` omits the key.
pub type DumpHook = Arc<dyn Fn(&dyn Record) -> Result<Option<String>> + Send + Sync>;
/// Reads one attribute from its raw (still escaped) text in place of its codec.
pub type LoadHook = Arc<dyn Fn(&mut dyn Record, &str) -> Result<()> + Send + Sync>;
/// Notified after a record was loaded from the named section.
pub type LoadedListener = Arc<dyn Fn(&dyn Record, &str) + Send + Sync>;

#[derive(Clone)]
struct BoundField {
    field: Field,
    codec: Arc<dyn FieldCodec>,
}

/// Binds a schema to one section of a document.
///
/// Codecs are resolved from the [`CodecRegistry`] once, when the store is
/// built. Dump and load hooks registered for a field take precedence over
/// its codec.
#[derive(Clone)]
pub struct RecordStore {
    schema: Arc<Schema>,
    fields: Vec<BoundField>,
    section: String,
    file_header: Option<String>,
    only: Option<HashSet<String>>,
    except: HashSet<String>,
    ignore_missing: bool,
    ignore_default: bool,
    dump_hooks: HashMap<String, DumpHook>,
    load_hooks: HashMap<String, LoadHook>,
    listeners: Vec<LoadedListener>,
}

impl RecordStore {
    pub fn new(schema: Schema, codecs: &CodecRegistry) -> Result<Self> {
        let fields = schema
            .fields()
            .iter()
            .map(|field| {
                Ok(BoundField {
                    field: field.clone(),
                    codec: codecs.resolve(&field.field_type)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RecordStore {
            section: schema.name().to_string(),
            schema: Arc::new(schema),
            fields,
            file_header: None,
            only: None,
            except: HashSet::new(),
            ignore_missing: false,
            ignore_default: false,
            dump_hooks: HashMap::new(),
            load_hooks: HashMap::new(),
            listeners: Vec::new(),
        })
    }

    /// Section name to use instead of the schema name.
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = section.into();
        self
    }

    /// Text written verbatim before the first section by `dumps`.
    pub fn with_file_header(mut self, header: impl Into<String>) -> Self {
        self.file_header = Some(header.into());
        self
    }

    /// Restrict the store to the named fields.
    pub fn only<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Leave the named fields out.
    pub fn except<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.except.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Omit keys whose value is unset instead of writing the `!None` marker.
    pub fn ignore_missing(mut self, ignore: bool) -> Self {
        self.ignore_missing = ignore;
        self
    }

    /// Omit keys whose value equals the field's declared default, or `None`
    /// for a field without one.
    pub fn ignore_default(mut self, ignore: bool) -> Self {
        self.ignore_default = ignore;
        self
    }

    pub fn on_dump<F>(mut self, field: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&dyn Record) -> Result<Option<String>> + Send + Sync + 'static,
    {
        self.dump_hooks.insert(field.into(), Arc::new(hook));
        self
    }

    pub fn on_load<F>(mut self, field: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&mut dyn Record, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.load_hooks.insert(field.into(), Arc::new(hook));
        self
    }

    pub fn on_loaded<F>(mut self, listener: F) -> Self
    where
        F: Fn(&dyn Record, &str) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn file_header(&self) -> Option<&str> {
        self.file_header.as_deref()
    }

    fn active_fields(&self) -> impl Iterator<Item = &BoundField> {
        self.fields.iter().filter(move |bound| {
            let name = bound.field.name.as_str();
            !self.except.contains(name) && self.only.as_ref().map_or(true, |only| only.contains(name))
        })
    }

    /// Dump `record` into a section named after this store.
    pub fn dump(&self, record: &dyn Record) -> Result<Section> {
        self.dump_named(record, &self.section)
    }

    /// Dump `record` into a section with an explicit name.
    pub fn dump_named(&self, record: &dyn Record, section_name: &str) -> Result<Section> {
        let mut section = Section::new(section_name);
        for bound in self.active_fields() {
            let name = bound.field.name.as_str();

            if let Some(hook) = self.dump_hooks.get(name) {
                if let Some(raw) = hook(record)? {
                    section.set(name, raw);
                }
                continue;
            }

            let value = record.get(name).unwrap_or(Value::None);
            // a field without a declared default defaults to None
            if self.ignore_default && *bound.field.default.as_ref().unwrap_or(&Value::None) == value {
                continue;
            }
            if self.ignore_missing && value.is_none() {
                continue;
            }
            let encoded = serialize(bound.codec.as_ref(), &value).map_err(|reason| InsistError::Encode {
                section: section_name.to_string(),
                attribute: name.to_string(),
                reason,
            })?;
            if let Some(raw) = encoded {
                section.set(name, raw);
            }
        }
        Ok(section)
    }

    /// Merge the values of `section` into `record`. Attributes without a
    /// key in the section are left as they are.
    pub fn load(&self, section: &Section, record: &mut dyn Record) -> Result<()> {
        for bound in self.active_fields() {
            let name = bound.field.name.as_str();
            let Some(raw) = section.get(name) else {
                continue;
            };

            if let Some(hook) = self.load_hooks.get(name) {
                hook(&mut *record, raw)?;
                continue;
            }

            let value = deserialize(bound.codec.as_ref(), raw).map_err(|reason| InsistError::Decode {
                section: section.name().to_string(),
                attribute: name.to_string(),
                value: raw.to_string(),
                reason,
            })?;
            record.set(name, value)?;
        }
        for listener in &self.listeners {
            listener(&*record, section.name());
        }
        Ok(())
    }

    /// Render `record` as a complete document.
    pub fn dumps(&self, record: &dyn Record) -> Result<String> {
        let mut doc = Document::new();
        doc.set_header(self.file_header.clone());
        doc.insert_section(self.dump(record)?);
        Ok(doc.to_string())
    }

    pub fn loads(&self, text: &str, record: &mut dyn Record) -> Result<()> {
        let doc = Document::parse(text)?;
        self.load_document(&doc, record)
    }

    /// Load from this store's section of `doc`.
    pub fn load_document(&self, doc: &Document, record: &mut dyn Record) -> Result<()> {
        let section = doc
            .section(&self.section)
            .ok_or_else(|| InsistError::SectionNotFound(self.section.clone()))?;
        self.load(section, record)
    }

    /// Load through a storage backend (e.g. the store's own file, falling
    /// back to `main`).
    pub fn load_from(
        &self,
        backend: &dyn StorageBackend,
        main: Option<&Document>,
        record: &mut dyn Record,
    ) -> Result<()> {
        let doc = backend.load(main, &self.section, Selector::Exact(&self.section))?;
        self.load_document(&doc, record)
    }

    pub fn save_to(&self, backend: &dyn StorageBackend, main: &mut Document, record: &dyn Record) -> Result<()> {
        let mut doc = Document::new();
        doc.set_header(self.file_header.clone());
        doc.insert_section(self.dump(record)?);
        backend.save(main, &self.section, Selector::Exact(&self.section), &doc)
    }
}

impl fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore")
            .field("schema", &self.schema.name())
            .field("section", &self.section)
            .field("ignore_missing", &self.ignore_missing)
            .field("ignore_default", &self.ignore_default)
            .finish_non_exhaustive()
    }
}
