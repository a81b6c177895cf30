// YAML description of watched collections, turned into stores and registrations

use crate::codec::{self, CodecRegistry};
use crate::enforcer::EnforcedCollection;
use crate::error::{InsistError, Result};
use crate::record::DynamicRecord;
use crate::registry::Registry;
use crate::schema::{Field, FieldType, Schema, TypeKind, Value};
use crate::store::{Collection, CollectionStore, FilePerItem, Layout, Monolithic, RecordStore, SeparateFile};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Top-level configuration parsed from a YAML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Watched directory. Relative paths are resolved against the directory
    /// of the configuration file.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Main document of monolithic collections that name no file of their own.
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

/// One collection of dynamic records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    /// Section prefix; `<name>:` when omitted.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub layout: Layout,
    /// Document holding a monolithic collection, relative to the root.
    #[serde(default)]
    pub file: Option<String>,
    /// Directory of separate-file and file-per-item collections, relative
    /// to the root.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Item file suffix of file-per-item collections.
    #[serde(default)]
    pub suffix: Option<String>,
    /// Banner written before the first section on save.
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

/// One attribute of the collection's records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TypeKind,
    /// Element type of `list` and `dict` fields.
    #[serde(default)]
    pub items: Option<TypeKind>,
    /// An explicit `null` is kept as `Some(Null)`: a default of `None`.
    #[serde(default, deserialize_with = "present")]
    pub default: Option<serde_yaml::Value>,
}

/// Wrap a present value in `Some`, so `default: null` is told apart from no
/// `default` key.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<serde_yaml::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_yaml::Value::deserialize(deserializer).map(Some)
}

impl WatchConfig {
    /// Parse a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration YAML
    pub fn parse(content: &str) -> Result<Self> {
        let config: WatchConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// The watched directory: `root` resolved against `base`, or `base`
    /// itself.
    pub fn resolve_root(&self, base: &Path) -> PathBuf {
        match &self.root {
            Some(root) => base.join(root),
            None => base.to_path_buf(),
        }
    }

    /// Build one store per collection, backed by [`DynamicRecord`] items, and
    /// register each with `registry` for enforcement.
    pub fn build(&self, root: &Path, registry: &mut Registry) -> Result<Vec<CollectionStore>> {
        let mut names = HashSet::new();
        let mut stores = Vec::with_capacity(self.collections.len());
        for collection in &self.collections {
            if !names.insert(collection.name.as_str()) {
                return Err(InsistError::Config(format!(
                    "collection '{}' is defined twice",
                    collection.name
                )));
            }
            let store = self.build_collection(collection, root, registry.codecs())?;
            registry.register(Arc::new(EnforcedCollection::new(store.clone())));
            stores.push(store);
        }
        Ok(stores)
    }

    fn build_collection(
        &self,
        config: &CollectionConfig,
        root: &Path,
        codecs: &CodecRegistry,
    ) -> Result<CollectionStore> {
        let schema = config.schema(codecs)?;
        let mut records = RecordStore::new(schema.clone(), codecs)?;
        if let Some(header) = &config.header {
            records = records.with_file_header(header.clone());
        }

        let store = CollectionStore::new(&config.name, config.prefix(), records, Collection::shared())
            .with_factory(move || Box::new(DynamicRecord::for_schema(&schema)));

        let dir = match &config.dir {
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        };
        let store = match config.layout {
            Layout::Monolithic => {
                let file = config
                    .file
                    .as_deref()
                    .or(self.main.as_deref())
                    .ok_or_else(|| {
                        InsistError::Config(format!(
                            "monolithic collection '{}' needs a file (or a main document)",
                            config.name
                        ))
                    })?;
                store.with_backend(Monolithic::bound(root.join(file)))
            }
            Layout::SeparateFile => store.with_backend(SeparateFile::new(dir)),
            Layout::FilePerItem => {
                let backend = match &config.suffix {
                    Some(suffix) => FilePerItem::new(dir).with_suffix(suffix.clone()),
                    None => FilePerItem::new(dir),
                };
                store.with_backend(backend)
            }
        };
        Ok(store)
    }
}

impl CollectionConfig {
    pub fn prefix(&self) -> String {
        self.prefix
            .clone()
            .unwrap_or_else(|| format!("{}:", self.name))
    }

    /// Schema of the collection's records, with defaults decoded.
    pub fn schema(&self, codecs: &CodecRegistry) -> Result<Schema> {
        let mut schema = Schema::new(&self.name);
        for field in &self.fields {
            let field_type = field.field_type()?;
            let default = match &field.default {
                Some(yaml) => Some(default_value(&field_type, yaml, codecs).map_err(|reason| {
                    InsistError::Config(format!(
                        "bad default for {}.{}: {reason}",
                        self.name, field.name
                    ))
                })?),
                None => None,
            };
            schema.push(Field {
                default,
                ..Field::new(&field.name, field_type)
            });
        }
        Ok(schema)
    }
}

impl FieldConfig {
    pub fn field_type(&self) -> Result<FieldType> {
        match (self.kind.is_container(), self.items) {
            (true, Some(items)) if items.is_container() => Err(InsistError::Config(format!(
                "field '{}': nested containers are not supported",
                self.name
            ))),
            (true, Some(items)) => {
                let item = scalar_type(items);
                Ok(match self.kind {
                    TypeKind::Dict => FieldType::dict(item),
                    _ => FieldType::list(item),
                })
            }
            (true, None) => Err(InsistError::Config(format!(
                "field '{}': {:?} needs an `items` type",
                self.name, self.kind
            ))),
            (false, Some(_)) => Err(InsistError::Config(format!(
                "field '{}': `items` only applies to list and dict",
                self.name
            ))),
            (false, None) => Ok(scalar_type(self.kind)),
        }
    }
}

fn scalar_type(kind: TypeKind) -> FieldType {
    match kind {
        TypeKind::Text => FieldType::Text,
        TypeKind::TextLine => FieldType::TextLine,
        TypeKind::Int => FieldType::Int,
        TypeKind::Float => FieldType::Float,
        TypeKind::Bool => FieldType::Bool,
        TypeKind::Date => FieldType::Date,
        TypeKind::Datetime => FieldType::Datetime,
        // callers rule containers out
        TypeKind::List | TypeKind::Dict => FieldType::Text,
    }
}

/// Decode a YAML default the way a value of the document would be decoded.
/// Sequences and mappings give the elements of lists and dicts.
fn default_value(
    field_type: &FieldType,
    yaml: &serde_yaml::Value,
    codecs: &CodecRegistry,
) -> std::result::Result<Value, String> {
    use serde_yaml::Value as Yaml;

    let text = match (field_type, yaml) {
        (_, Yaml::Null) => return Ok(Value::None),
        (FieldType::List(item), Yaml::Sequence(items)) => {
            return items
                .iter()
                .map(|v| default_value(item, v, codecs))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::List);
        }
        (FieldType::Dict(value), Yaml::Mapping(entries)) => {
            let mut dict = IndexMap::new();
            for (k, v) in entries {
                let key = k
                    .as_str()
                    .ok_or_else(|| format!("dict key {k:?} is not text"))?;
                dict.insert(key.to_string(), default_value(value, v, codecs)?);
            }
            return Ok(Value::Dict(dict));
        }
        (_, Yaml::String(s)) => s.clone(),
        (_, Yaml::Number(n)) => n.to_string(),
        (_, Yaml::Bool(b)) => b.to_string(),
        (_, other) => return Err(format!("unsupported default {other:?}")),
    };
    let field_codec = codecs.resolve(field_type).map_err(|e| e.to_string())?;
    codec::deserialize(field_codec.as_ref(), &text)
}
