// Stores - bind schemas to document sections and keep collections in sync

mod backend;
mod collection;
mod record;

pub use backend::{
    section_hash, FilePerItem, Fingerprint, Layout, Monolithic, SeparateFile, Selector,
    StorageBackend, CONFIG_FILE_KEY, DEFAULT_SUFFIX,
};
pub use collection::{
    new_item, AfterAdd, BeforeAdd, Collection, CollectionStore, Item, ItemFactory, LoadReport,
    SharedCollection, TypedItemFactory,
};
pub use record::{DumpHook, LoadHook, LoadedListener, RecordStore};
