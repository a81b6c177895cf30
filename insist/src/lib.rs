pub mod codec;
pub mod config;
pub mod document;
pub mod enforcer;
pub mod error;
pub mod include;
pub mod record;
pub mod registry;
pub mod schema;
pub mod store;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use config::WatchConfig;
pub use document::{Document, Section};
pub use enforcer::{EnforcedCollection, EnforcedRecord, Enforcer};
pub use error::{InsistError, Result};
pub use include::IncludeObserver;
pub use record::{DynamicRecord, Record};
pub use registry::Registry;
pub use schema::{FieldType, Schema, Value};
pub use store::{Collection, CollectionStore, Item, RecordStore, StorageBackend};
pub use watcher::FileWatcher;
