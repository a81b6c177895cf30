use crate::error::Result;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Capacity of the queue between the OS notification source and the worker.
pub const QUEUE_CAPACITY: usize = 1024;

/// How often an idle worker checks whether it should stop.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The kind of file change detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
    Opened,
}

/// A filesystem event, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
    pub kind: EventKind,
    pub is_directory: bool,
}

impl FsEvent {
    pub fn new(path: impl Into<PathBuf>, kind: EventKind) -> Self {
        FsEvent {
            path: path.into(),
            kind,
            is_directory: false,
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(path, EventKind::Created)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(path, EventKind::Modified)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(path, EventKind::Deleted)
    }

    pub fn directory(mut self) -> Self {
        self.is_directory = true;
        self
    }

    /// Convert a `notify` event. Renames become a delete of the old path and
    /// a create of the new one; access events become `Opened`.
    pub fn from_notify(event: Event) -> Vec<FsEvent> {
        use notify::EventKind as N;

        let paths = event.paths;
        let each = |kind: EventKind, folder: Option<bool>| -> Vec<FsEvent> {
            paths
                .iter()
                .map(|path| FsEvent {
                    is_directory: folder.unwrap_or_else(|| path.is_dir()),
                    path: path.clone(),
                    kind,
                })
                .collect()
        };

        match event.kind {
            N::Create(kind) => each(EventKind::Created, folder_hint(kind == CreateKind::Folder, kind == CreateKind::File)),
            N::Remove(kind) => each(EventKind::Deleted, folder_hint(kind == RemoveKind::Folder, kind == RemoveKind::File)),
            N::Modify(ModifyKind::Name(RenameMode::From)) => each(EventKind::Deleted, None),
            N::Modify(ModifyKind::Name(RenameMode::To)) => each(EventKind::Created, None),
            N::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => vec![
                FsEvent {
                    path: paths[0].clone(),
                    kind: EventKind::Deleted,
                    is_directory: false,
                },
                FsEvent {
                    is_directory: paths[1].is_dir(),
                    path: paths[1].clone(),
                    kind: EventKind::Created,
                },
            ],
            N::Modify(ModifyKind::Name(_)) => paths
                .iter()
                .map(|path| FsEvent {
                    path: path.clone(),
                    kind: if path.exists() { EventKind::Created } else { EventKind::Deleted },
                    is_directory: path.is_dir(),
                })
                .collect(),
            N::Modify(_) => each(EventKind::Modified, None),
            N::Access(_) => each(EventKind::Opened, None),
            N::Any | N::Other => Vec::new(),
        }
    }
}

fn folder_hint(folder: bool, file: bool) -> Option<bool> {
    match (folder, file) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

/// Adds and removes non-recursive directory watches on behalf of a sink.
pub trait WatchControl {
    fn watch(&mut self, dir: &Path) -> Result<()>;
    fn unwatch(&mut self, dir: &Path) -> Result<()>;
}

/// Consumer of filesystem events, driven by a [`FileWatcher`] worker thread.
pub trait EventSink: Send + 'static {
    /// Called once on the caller's thread before events are delivered.
    fn started(&mut self, _control: &mut dyn WatchControl) -> Result<()> {
        Ok(())
    }

    fn handle(&mut self, event: FsEvent, control: &mut dyn WatchControl);
}

/// Watch control backed by the shared OS watcher. Directories below the
/// recursively watched root already report their events, so they are not
/// watched twice.
struct NotifyControl {
    watcher: Arc<Mutex<RecommendedWatcher>>,
    root: PathBuf,
    watched: HashSet<PathBuf>,
}

impl WatchControl for NotifyControl {
    fn watch(&mut self, dir: &Path) -> Result<()> {
        if dir.starts_with(&self.root) || self.watched.contains(dir) {
            return Ok(());
        }
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        self.watched.insert(dir.to_path_buf());
        log::info!("Watching {}", dir.display());
        Ok(())
    }

    fn unwatch(&mut self, dir: &Path) -> Result<()> {
        if !self.watched.remove(dir) {
            return Ok(());
        }
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        watcher.unwatch(dir)?;
        log::info!("Stopped watching {}", dir.display());
        Ok(())
    }
}

/// Watches a directory tree recursively and feeds its events, one at a
/// time, to an [`EventSink`] on a single worker thread.
pub struct FileWatcher<S: EventSink> {
    _watcher: Arc<Mutex<RecommendedWatcher>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<S>>,
}

impl<S: EventSink> FileWatcher<S> {
    pub fn start(root: &Path, mut sink: S) -> Result<Self> {
        let root = std::fs::canonicalize(root)?;
        let (event_tx, event_rx) = mpsc::sync_channel::<notify::Result<Event>>(QUEUE_CAPACITY);

        let watcher = RecommendedWatcher::new(
            move |res| {
                // Blocks while the queue is full; fails only once the worker is gone.
                let _ = event_tx.send(res);
            },
            Config::default(),
        )?;
        let watcher = Arc::new(Mutex::new(watcher));

        let mut control = NotifyControl {
            watcher: watcher.clone(),
            root: root.clone(),
            watched: HashSet::new(),
        };
        sink.started(&mut control)?;
        watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .watch(&root, RecursiveMode::Recursive)?;
        log::info!("Watching {} recursively", root.display());

        let stop = Arc::new(AtomicBool::new(false));
        let stopping = stop.clone();
        let thread = std::thread::Builder::new()
            .name("insist-watcher".into())
            .spawn(move || {
                while !stopping.load(Ordering::SeqCst) {
                    match event_rx.recv_timeout(POLL_INTERVAL) {
                        Ok(Ok(event)) => {
                            for fs_event in FsEvent::from_notify(event) {
                                sink.handle(fs_event, &mut control);
                            }
                        }
                        Ok(Err(e)) => {
                            log::warn!("File watcher error: {e}");
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                sink
            })?;

        Ok(FileWatcher {
            _watcher: watcher,
            stop,
            thread: Some(thread),
        })
    }

    /// Stop the worker after the event it is currently handling, and hand
    /// the sink back.
    pub fn stop(mut self) -> Option<S> {
        self.stop.store(true, Ordering::SeqCst);
        self.thread.take().and_then(|thread| thread.join().ok())
    }
}

impl<S: EventSink> Drop for FileWatcher<S> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
