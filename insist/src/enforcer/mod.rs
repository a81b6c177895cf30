// Enforcer - routes filesystem events to the stores owning the changed files

mod handlers;

pub use handlers::{EnforcedCollection, EnforcedRecord};

use crate::error::{InsistError, Result};
use crate::registry::Registry;
use crate::watcher::{EventKind, EventSink, FileWatcher, FsEvent, WatchControl};
use glob::{MatchOptions, Pattern};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Name of the file that suspends event processing for its directory while
/// another process writes configuration there.
pub const LOCK_FILENAME: &str = "lock";

/// Editor temporary files; never routed.
pub const IGNORE_PATTERNS: &[&str] = &["*/.#*", "*~", "*.swp"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A store bound to one concrete file, reacting to its changes.
pub trait EnforcedStore: Send {
    /// Label used in log messages.
    fn describe(&self) -> String;

    fn on_created(&mut self, event: &FsEvent) -> Result<()>;
    fn on_modified(&mut self, event: &FsEvent) -> Result<()>;
    fn on_deleted(&mut self, event: &FsEvent) -> Result<()>;
}

/// A store type that can describe the files it is loaded from and be bound
/// to one of them.
pub trait StoreRegistration: Send + Sync {
    fn name(&self) -> &str;

    /// Glob patterns matched against the absolute path of changed files.
    fn file_patterns(&self) -> Vec<String>;

    fn from_root_and_filename(&self, root: &Path, path: &Path) -> Result<Box<dyn EnforcedStore>> {
        let _ = (root, path);
        Err(InsistError::Unimplemented(format!(
            "store '{}' cannot be created from a file",
            self.name()
        )))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).map_err(InsistError::from))
        .collect()
}

fn ignored_patterns() -> Vec<Pattern> {
    IGNORE_PATTERNS
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect()
}

/// Whether `path` is an editor temporary file.
pub fn is_ignored(path: &Path) -> bool {
    ignored_patterns()
        .iter()
        .any(|p| p.matches_path_with(path, MATCH_OPTIONS))
}

struct Handler {
    registration: Arc<dyn StoreRegistration>,
    patterns: Vec<Pattern>,
}

impl Handler {
    fn new(registration: Arc<dyn StoreRegistration>) -> Result<Self> {
        let patterns = compile(&registration.file_patterns())?;
        Ok(Handler {
            registration,
            patterns,
        })
    }

    fn name(&self) -> &str {
        self.registration.name()
    }

    fn matches(&self, path: &Path) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_path_with(path, MATCH_OPTIONS))
    }

    /// Bind a store to the event's file and run the matching callback.
    fn run(&self, root: &Path, event: &FsEvent) -> Result<()> {
        let started = Instant::now();
        let mut store = self.registration.from_root_and_filename(root, &event.path)?;
        match event.kind {
            EventKind::Created => store.on_created(event)?,
            EventKind::Modified => store.on_modified(event)?,
            EventKind::Deleted => store.on_deleted(event)?,
            EventKind::Opened => return Ok(()),
        }
        log::info!(
            "Configuration for {} updated in {:.1}ms.",
            store.describe(),
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }
}

/// Detects configuration changes below a directory and applies them to
/// the registered stores.
///
/// Every event goes through the lock protocol first: while a `lock` file
/// exists in a directory, events for other files of that directory are
/// dropped. Otherwise the first handler whose patterns match the path gets
/// the event, and remembers the path for later events.
pub struct Enforcer {
    root: PathBuf,
    handlers: Vec<Handler>,
    ignored: Vec<Pattern>,
    locked: HashSet<PathBuf>,
    path_cache: HashMap<PathBuf, String>,
}

impl Enforcer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Enforcer {
            root: root.into(),
            handlers: Vec::new(),
            ignored: ignored_patterns(),
            locked: HashSet::new(),
            path_cache: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register every store of `registry` that describes its files.
    pub fn register_handlers(&mut self, registry: &Registry) -> Result<usize> {
        let mut count = 0;
        for registration in registry.registrations() {
            log::debug!("Found store: {}", registration.name());
            if registration.file_patterns().is_empty() {
                continue;
            }
            self.register(registration.clone())?;
            count += 1;
        }
        Ok(count)
    }

    pub fn register(&mut self, registration: Arc<dyn StoreRegistration>) -> Result<()> {
        let handler = Handler::new(registration)?;
        log::info!(
            "Registering {:?} -> {}",
            handler.registration.file_patterns(),
            handler.name()
        );
        self.handlers.push(handler);
        Ok(())
    }

    /// Remove a handler and forget every path routed to it.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.name() != name);
        self.path_cache.retain(|_, handler| handler != name);
        before != self.handlers.len()
    }

    pub fn handler_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(Handler::name)
    }

    pub fn is_locked(&self, dir: &Path) -> bool {
        self.locked.contains(dir)
    }

    pub fn cached_handler(&self, path: &Path) -> Option<&str> {
        self.path_cache.get(path).map(String::as_str)
    }

    /// Route one event. Returns whether it was handled, which includes
    /// events swallowed by the lock protocol.
    pub fn dispatch(&mut self, event: &FsEvent) -> bool {
        if event.is_directory && event.kind == EventKind::Modified {
            return false;
        }
        if event.kind == EventKind::Opened {
            return false;
        }
        if self.handle_locks(event) {
            return true;
        }
        if self.ignored.iter().any(|p| p.matches_path_with(&event.path, MATCH_OPTIONS)) {
            return false;
        }

        // a deleted file leaves the cache; a recreated one is routed afresh
        let gone = event.kind == EventKind::Deleted;
        if let Some(name) = self.path_cache.get(&event.path) {
            if let Some(handler) = self.handlers.iter().find(|h| h.name() == name) {
                if let Err(e) = handler.run(&self.root, event) {
                    log::error!("Error while handling {event:?} with {name}: {e}");
                }
                if gone {
                    self.path_cache.remove(&event.path);
                }
                return true;
            }
        }

        let Some(handler) = self.handlers.iter().find(|h| h.matches(&event.path)) else {
            return false;
        };
        if let Err(e) = handler.run(&self.root, event) {
            log::error!("Error while handling {event:?} with {}: {e}", handler.name());
        }
        if !gone {
            let name = handler.name().to_string();
            self.path_cache.insert(event.path.clone(), name);
        }
        true
    }

    /// The lock protocol. Relies on events for one path arriving in order:
    /// the lock's creation is seen before writes made while locked, its
    /// deletion after them.
    fn handle_locks(&mut self, event: &FsEvent) -> bool {
        let Some(dir) = event.path.parent() else {
            return false;
        };
        let lock_path = dir.join(LOCK_FILENAME);

        // Catch up on locks created before we started listening.
        if !self.locked.contains(dir) && lock_path.exists() {
            self.locked.insert(dir.to_path_buf());
        }

        let is_lock = event.path == lock_path;
        if !is_lock {
            if self.locked.contains(dir) {
                log::debug!("Event ignored due to suspension: {event:?}");
                return true;
            }
            return false;
        }

        match event.kind {
            EventKind::Created => {
                self.locked.insert(dir.to_path_buf());
                log::debug!("Enforcer suspended due to locking of {}", dir.display());
            }
            EventKind::Deleted => {
                self.locked.remove(dir);
                log::debug!("Enforcer resuming after unlocking of {}", dir.display());
            }
            EventKind::Modified | EventKind::Opened => {}
        }
        true
    }

    /// Watch the root directory on a background thread.
    pub fn start(self) -> Result<FileWatcher<Enforcer>> {
        let root = self.root.clone();
        FileWatcher::start(&root, self)
    }
}

impl EventSink for Enforcer {
    fn handle(&mut self, event: FsEvent, _control: &mut dyn WatchControl) {
        self.dispatch(&event);
    }
}
