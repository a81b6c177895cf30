use super::value::Value;
use serde::{Deserialize, Serialize};

/// Ordered description of the attributes a record persists. Field order is
/// the write order of every dump.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Schema {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style append of a field.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.push(Field::new(name, field_type));
        self
    }

    /// Builder-style append of a field with a declared default.
    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        default: impl Into<Value>,
    ) -> Self {
        let mut field = Field::new(name, field_type);
        field.default = Some(default.into());
        self.push(field);
        self
    }

    /// Append a field. A field with the same name is replaced in place.
    pub fn push(&mut self, field: Field) {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    /// Schema name, used as the default section name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A single persisted attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub default: Option<Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Field {
            name: name.into(),
            field_type,
            default: None,
        }
    }
}

/// Field types understood by the codec catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Free text; control characters are escaped on write.
    Text,
    /// Single line text.
    TextLine,
    Int,
    Float,
    Bool,
    Date,
    Datetime,
    List(Box<FieldType>),
    /// Text keys mapped to values of the given type.
    Dict(Box<FieldType>),
}

impl FieldType {
    pub fn list(item: FieldType) -> Self {
        FieldType::List(Box::new(item))
    }

    pub fn dict(value: FieldType) -> Self {
        FieldType::Dict(Box::new(value))
    }

    pub fn kind(&self) -> TypeKind {
        match self {
            FieldType::Text => TypeKind::Text,
            FieldType::TextLine => TypeKind::TextLine,
            FieldType::Int => TypeKind::Int,
            FieldType::Float => TypeKind::Float,
            FieldType::Bool => TypeKind::Bool,
            FieldType::Date => TypeKind::Date,
            FieldType::Datetime => TypeKind::Datetime,
            FieldType::List(_) => TypeKind::List,
            FieldType::Dict(_) => TypeKind::Dict,
        }
    }
}

/// Type descriptor without element types; the key of the codec registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TypeKind {
    Text,
    TextLine,
    Int,
    Float,
    Bool,
    Date,
    Datetime,
    List,
    Dict,
}

impl TypeKind {
    /// Whether this kind needs an element type (`items`) to be complete.
    pub fn is_container(self) -> bool {
        matches!(self, TypeKind::List | TypeKind::Dict)
    }
}
