mod types;
mod value;

pub use types::{Field, FieldType, Schema, TypeKind};
pub use value::{FromValue, Value};
