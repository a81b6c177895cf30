// Record model - application objects whose attributes are persisted

use crate::error::{InsistError, Result};
use crate::schema::{Schema, Value};
use indexmap::IndexMap;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Upcast to `Any` so records can be compared by concrete type and read
/// back as their concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn concrete_type_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn concrete_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// An application object whose named attributes a store reads and writes.
///
/// `get` returns `None` for attributes the record does not carry at all;
/// an attribute that exists but is unset is `Some(Value::None)`.
pub trait Record: AsAny + Send + Sync {
    fn get(&self, attribute: &str) -> Option<Value>;

    fn set(&mut self, attribute: &str, value: Value) -> Result<()>;
}

impl dyn Record {
    pub fn is<T: Record>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Record>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Record>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Type id of the concrete record behind the trait object.
    pub fn record_type(&self) -> TypeId {
        Any::type_id(self.as_any())
    }

    pub fn record_type_name(&self) -> &'static str {
        self.concrete_type_name()
    }
}

/// Record usable with any schema: an ordered attribute map.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DynamicRecord {
    attributes: IndexMap<String, Value>,
}

impl DynamicRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record holding every schema field, set to its default or `None`.
    pub fn for_schema(schema: &Schema) -> Self {
        let attributes = schema
            .fields()
            .iter()
            .map(|f| (f.name.clone(), f.default.clone().unwrap_or(Value::None)))
            .collect();
        DynamicRecord { attributes }
    }

    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(attribute.into(), value.into());
        self
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl Record for DynamicRecord {
    fn get(&self, attribute: &str) -> Option<Value> {
        self.attributes.get(attribute).cloned()
    }

    fn set(&mut self, attribute: &str, value: Value) -> Result<()> {
        self.attributes.insert(attribute.to_string(), value);
        Ok(())
    }
}

/// Error for a `set` on an attribute a typed record does not have.
pub fn unknown_attribute<T: Record>(attribute: &str) -> InsistError {
    InsistError::UnknownAttribute {
        record: std::any::type_name::<T>(),
        attribute: attribute.to_string(),
    }
}

/// Read guard that survives a writer panicking on another thread.
pub(crate) fn read_lock<T: ?Sized>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T: ?Sized>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
