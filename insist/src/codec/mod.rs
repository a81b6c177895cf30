//! Field codec catalog: type-specific string encodings plus the escaping
//! convention shared by every codec.
//!
//! A literal unset value is written as the marker `!None`; any `!` produced
//! by a codec is doubled, so the text `"!None"` round-trips as `!!None`.

mod builtin;

pub use builtin::{
    BoolCodec, DateCodec, DatetimeCodec, DictCodec, FloatCodec, IntCodec, ListCodec, TextCodec,
};

use crate::error::{InsistError, Result};
use crate::schema::{FieldType, TypeKind, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Written in place of an unset value.
pub const NONE_MARKER: &str = "!None";
/// Escape character; doubled when it appears in encoded text.
pub const ESCAPE: char = '!';

/// Encoding rules for one field type.
pub trait FieldCodec: Send + Sync {
    /// Encode a present (non-`None`) value. `Ok(None)` leaves the key out of
    /// the section entirely.
    fn encode(&self, value: &Value) -> std::result::Result<Option<String>, String>;

    /// Decode raw text, already unescaped.
    fn decode(&self, raw: &str) -> std::result::Result<Value, String>;
}

pub fn escape(text: &str) -> String {
    text.replace(ESCAPE, "!!")
}

pub fn unescape(text: &str) -> String {
    text.replace("!!", "!")
}

/// Encode through `codec` and apply the escaping convention.
pub fn serialize(codec: &dyn FieldCodec, value: &Value) -> std::result::Result<Option<String>, String> {
    if value.is_none() {
        return Ok(Some(NONE_MARKER.to_string()));
    }
    Ok(codec.encode(value)?.map(|s| escape(&s)))
}

/// Reverse [`serialize`]: the marker becomes `Value::None`, anything else is
/// unescaped and handed to the codec.
pub fn deserialize(codec: &dyn FieldCodec, raw: &str) -> std::result::Result<Value, String> {
    if raw == NONE_MARKER {
        return Ok(Value::None);
    }
    codec.decode(&unescape(raw))
}

/// Builds a codec for a concrete field type. Container factories resolve
/// their element codec through the registry they are handed.
pub type CodecFactory =
    Arc<dyn Fn(&FieldType, &CodecRegistry) -> Result<Arc<dyn FieldCodec>> + Send + Sync>;

/// Explicit type → codec table. Registering a kind replaces its generic
/// codec; lookups happen once per attribute when a record store is built.
#[derive(Clone)]
pub struct CodecRegistry {
    factories: HashMap<TypeKind, CodecFactory>,
}

impl CodecRegistry {
    /// Registry holding the built-in codecs for every kind.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_codec(TypeKind::Text, Arc::new(TextCodec::multiline()));
        registry.register_codec(TypeKind::TextLine, Arc::new(TextCodec::line()));
        registry.register_codec(TypeKind::Int, Arc::new(IntCodec));
        registry.register_codec(TypeKind::Float, Arc::new(FloatCodec));
        registry.register_codec(TypeKind::Bool, Arc::new(BoolCodec));
        registry.register_codec(TypeKind::Date, Arc::new(DateCodec));
        registry.register_codec(TypeKind::Datetime, Arc::new(DatetimeCodec));
        registry.register(TypeKind::List, |field_type, registry| match field_type {
            FieldType::List(item) => Ok(Arc::new(ListCodec::new(registry.resolve(item)?)) as Arc<dyn FieldCodec>),
            other => Err(InsistError::Other(format!("list codec cannot encode {other:?}"))),
        });
        registry.register(TypeKind::Dict, |field_type, registry| match field_type {
            FieldType::Dict(value) => Ok(Arc::new(DictCodec::new(registry.resolve(value)?)) as Arc<dyn FieldCodec>),
            other => Err(InsistError::Other(format!("dict codec cannot encode {other:?}"))),
        });
        registry
    }

    /// Registry without any codec.
    pub fn empty() -> Self {
        CodecRegistry {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, kind: TypeKind, factory: F)
    where
        F: Fn(&FieldType, &CodecRegistry) -> Result<Arc<dyn FieldCodec>> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    /// Register one codec instance for every field of `kind`.
    pub fn register_codec(&mut self, kind: TypeKind, codec: Arc<dyn FieldCodec>) {
        self.register(kind, move |_, _| Ok(codec.clone()));
    }

    pub fn resolve(&self, field_type: &FieldType) -> Result<Arc<dyn FieldCodec>> {
        let factory = self.factories.get(&field_type.kind()).ok_or_else(|| {
            InsistError::Unimplemented(format!("no codec registered for {:?}", field_type.kind()))
        })?;
        factory(field_type, self)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<String> = self.factories.keys().map(|k| format!("{k:?}")).collect();
        kinds.sort();
        f.debug_struct("CodecRegistry").field("kinds", &kinds).finish()
    }
}
