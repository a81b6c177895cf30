// Include observer - turns changes of included documents into changes of
// the documents including them

use crate::document::include_targets;
use crate::enforcer::is_ignored;
use crate::error::Result;
use crate::watcher::{EventKind, EventSink, FileWatcher, FsEvent, WatchControl};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// Extension of the documents scanned for `#include` lines.
const DOCUMENT_EXTENSION: &str = "ini";

/// Tracks which documents include which, and touches an including document
/// when one of its included documents changes so that it is reprocessed
/// through the normal enforcement path.
///
/// Paths are absolute and normalized, so one file reached through different
/// relative paths is one node of the graph. A directory holding included
/// files is watched exactly while at least one of its files is included.
#[derive(Debug)]
pub struct IncludeObserver {
    root: PathBuf,
    /// included file -> documents including it
    included_files: HashMap<PathBuf, HashSet<PathBuf>>,
    /// document -> files it includes
    watched_files: HashMap<PathBuf, HashSet<PathBuf>>,
    /// directory -> included files in it
    include_dirs: HashMap<PathBuf, HashSet<PathBuf>>,
    /// included documents touched by us; their next change was already
    /// propagated
    touched: HashSet<PathBuf>,
}

/// Serializable snapshot of the include graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IncludeGraph {
    pub included_files: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    pub watched_files: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    pub include_dirs: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
}

fn sorted(map: &HashMap<PathBuf, HashSet<PathBuf>>) -> BTreeMap<PathBuf, BTreeSet<PathBuf>> {
    map.iter()
        .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
        .collect()
}

/// Absolute path with `.` and `..` resolved. Symlinks are resolved as far
/// as the path exists.
pub fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        if let Ok(parent) = std::fs::canonicalize(parent) {
            return parent.join(name);
        }
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Update the modification time of `path` without changing its content.
pub fn touch(path: &Path) -> Result<()> {
    let file = File::options().append(true).open(path)?;
    file.set_modified(SystemTime::now())?;
    Ok(())
}

fn is_document(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == DOCUMENT_EXTENSION) && !is_ignored(path)
}

impl IncludeObserver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        IncludeObserver {
            root: root.into(),
            included_files: HashMap::new(),
            watched_files: HashMap::new(),
            include_dirs: HashMap::new(),
            touched: HashSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan every document below the root once and build the graph.
    pub fn initialize(&mut self, control: &mut dyn WatchControl) -> Result<()> {
        log::info!("Initializing include observer for {}", self.root.display());
        let pattern = format!(
            "{}/**/*.{DOCUMENT_EXTENSION}",
            glob::Pattern::escape(&self.root.to_string_lossy())
        );
        for path in glob::glob(&pattern)? {
            match path {
                Ok(path) if is_document(&path) => self.update(&path, control)?,
                Ok(_) => {}
                Err(e) => log::warn!("Cannot scan {}: {e}", e.path().display()),
            }
        }
        Ok(())
    }

    /// Re-read the `#include` lines of `path` (none if it is gone) and
    /// bring the graph and the directory watches up to date.
    pub fn update(&mut self, path: &Path, control: &mut dyn WatchControl) -> Result<()> {
        let path = normalize(path);
        let includes: HashSet<PathBuf> = if path.is_file() {
            let text = std::fs::read_to_string(&path)?;
            let base = path.parent().unwrap_or_else(|| Path::new("/"));
            include_targets(&text)
                .iter()
                .map(|target| normalize(&base.join(target)))
                .collect()
        } else {
            HashSet::new()
        };
        log::debug!(
            "Updating include observer: {} includes {:?}",
            path.display(),
            includes
        );

        let previous = self.watched_files.remove(&path).unwrap_or_default();

        for added in includes.difference(&previous) {
            self.included_files
                .entry(added.clone())
                .or_default()
                .insert(path.clone());
            let dir = added.parent().unwrap_or_else(|| Path::new("/")).to_path_buf();
            let files = self.include_dirs.entry(dir.clone()).or_default();
            if files.is_empty() {
                log::debug!("Start watching include dir: {}", dir.display());
                control.watch(&dir)?;
            }
            files.insert(added.clone());
        }

        for removed in previous.difference(&includes) {
            let still_included = match self.included_files.get_mut(removed) {
                Some(including) => {
                    including.remove(&path);
                    !including.is_empty()
                }
                None => false,
            };
            if still_included {
                continue;
            }
            self.included_files.remove(removed);

            let dir = removed.parent().unwrap_or_else(|| Path::new("/")).to_path_buf();
            let now_empty = match self.include_dirs.get_mut(&dir) {
                Some(files) => {
                    files.remove(removed);
                    files.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.include_dirs.remove(&dir);
                log::debug!("Stop watching include dir: {}", dir.display());
                control.unwatch(&dir)?;
            }
        }

        if !includes.is_empty() {
            self.watched_files.insert(path, includes);
        }
        Ok(())
    }

    /// Every document that includes `path`, directly or through other
    /// included documents.
    pub fn including(&self, path: &Path) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut queue = vec![normalize(path)];
        let mut out = Vec::new();
        while let Some(next) = queue.pop() {
            let Some(including) = self.included_files.get(&next) else {
                continue;
            };
            let mut including: Vec<&PathBuf> = including.iter().collect();
            including.sort();
            for doc in including {
                if seen.insert(doc.clone()) {
                    out.push(doc.clone());
                    queue.push(doc.clone());
                }
            }
        }
        out
    }

    /// React to one filesystem event.
    pub fn handle_event(&mut self, event: &FsEvent, control: &mut dyn WatchControl) -> Result<()> {
        if event.is_directory || event.kind == EventKind::Opened {
            return Ok(());
        }
        let path = normalize(&event.path);

        if self.included_files.contains_key(&path) {
            match event.kind {
                EventKind::Deleted => {
                    log::error!("Included file cannot be deleted: {}", path.display());
                }
                _ if self.touched.remove(&path) => {}
                _ => {
                    for including in self.including(&path) {
                        log::info!(
                            "Included file {} changed. Touching {} to trigger update.",
                            path.display(),
                            including.display()
                        );
                        touch(&including)?;
                        if self.included_files.contains_key(&including) {
                            self.touched.insert(including);
                        }
                    }
                }
            }
        }

        if is_document(&path) {
            self.update(&path, control)?;
        }
        Ok(())
    }

    pub fn graph(&self) -> IncludeGraph {
        IncludeGraph {
            included_files: sorted(&self.included_files),
            watched_files: sorted(&self.watched_files),
            include_dirs: sorted(&self.include_dirs),
        }
    }

    pub fn is_watching(&self, dir: &Path) -> bool {
        self.include_dirs.contains_key(dir)
    }

    /// Scan the root and watch it on a background thread.
    pub fn start(self) -> Result<FileWatcher<IncludeObserver>> {
        let root = self.root.clone();
        FileWatcher::start(&root, self)
    }
}

impl EventSink for IncludeObserver {
    fn started(&mut self, control: &mut dyn WatchControl) -> Result<()> {
        self.initialize(control)
    }

    fn handle(&mut self, event: FsEvent, control: &mut dyn WatchControl) {
        if let Err(e) = self.handle_event(&event, control) {
            log::error!("Error while tracking includes for {event:?}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{canonical, RecordingControl};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn mtime(path: &Path) -> SystemTime {
        std::fs::metadata(path).unwrap().modified().unwrap()
    }

    fn backdate(path: &Path) {
        let file = File::options().append(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(60)).unwrap();
    }

    #[test]
    fn test_normalize_resolves_relative_components() {
        let tmp = TempDir::new().unwrap();
        let root = canonical(tmp.path());
        std::fs::create_dir(root.join("shared")).unwrap();
        std::fs::write(root.join("shared/base.ini"), "").unwrap();

        assert_eq!(normalize(&root.join("conf/../shared/./base.ini")), root.join("shared/base.ini"));
        assert_eq!(normalize(&root.join("shared/gone.ini")), root.join("shared/gone.ini"));
        assert_eq!(normalize(&root.join("nowhere/../x/y.ini")), root.join("x/y.ini"));
    }

    #[test]
    fn test_initialize_builds_graph() {
        let tmp = TempDir::new().unwrap();
        let root = canonical(tmp.path());
        std::fs::create_dir_all(root.join("shared")).unwrap();
        std::fs::create_dir_all(root.join("app")).unwrap();
        std::fs::write(root.join("shared/base.ini"), "[person:jeb]\nfirstname = Jebediah\n").unwrap();
        std::fs::write(root.join("main.ini"), "#include shared/base.ini\n").unwrap();
        std::fs::write(root.join("app/other.ini"), "#include ../shared/base.ini\n").unwrap();

        let mut observer = IncludeObserver::new(&root);
        let mut control = RecordingControl::default();
        observer.initialize(&mut control).unwrap();

        let base = root.join("shared/base.ini");
        let graph = observer.graph();
        assert_eq!(
            graph.included_files[&base],
            [root.join("app/other.ini"), root.join("main.ini")]
                .into_iter()
                .collect::<BTreeSet<_>>()
        );
        assert_eq!(graph.watched_files.len(), 2);
        assert_eq!(control.watched, vec![root.join("shared")]);
        assert!(observer.is_watching(&root.join("shared")));
    }

    #[test]
    fn test_update_adds_and_removes_watches() {
        let tmp = TempDir::new().unwrap();
        let root = canonical(tmp.path());
        std::fs::create_dir_all(root.join("a")).unwrap();
        std::fs::create_dir_all(root.join("b")).unwrap();
        std::fs::write(root.join("a/one.ini"), "").unwrap();
        std::fs::write(root.join("b/two.ini"), "").unwrap();
        let main = root.join("main.ini");

        let mut observer = IncludeObserver::new(&root);
        let mut control = RecordingControl::default();

        std::fs::write(&main, "#include a/one.ini\n#include b/two.ini\n").unwrap();
        observer.update(&main, &mut control).unwrap();
        let mut watched = control.watched.clone();
        watched.sort();
        assert_eq!(watched, vec![root.join("a"), root.join("b")]);

        std::fs::write(&main, "#include b/two.ini\n").unwrap();
        observer.update(&main, &mut control).unwrap();
        assert_eq!(control.unwatched, vec![root.join("a")]);
        assert!(!observer.is_watching(&root.join("a")));
        assert!(observer.is_watching(&root.join("b")));

        std::fs::remove_file(&main).unwrap();
        observer.update(&main, &mut control).unwrap();
        assert_eq!(control.unwatched, vec![root.join("a"), root.join("b")]);
        assert_eq!(observer.graph(), IncludeGraph::default());
    }

    #[test]
    fn test_shared_include_keeps_watch() {
        let tmp = TempDir::new().unwrap();
        let root = canonical(tmp.path());
        std::fs::write(root.join("base.ini"), "").unwrap();
        std::fs::write(root.join("one.ini"), "#include base.ini\n").unwrap();
        std::fs::write(root.join("two.ini"), "#include ./base.ini\n").unwrap();

        let mut observer = IncludeObserver::new(&root);
        let mut control = RecordingControl::default();
        observer.update(&root.join("one.ini"), &mut control).unwrap();
        observer.update(&root.join("two.ini"), &mut control).unwrap();
        assert_eq!(control.watched, vec![root.clone()]);

        std::fs::write(root.join("one.ini"), "").unwrap();
        observer.update(&root.join("one.ini"), &mut control).unwrap();
        assert!(control.unwatched.is_empty());
        assert_eq!(
            observer.including(&root.join("base.ini")),
            vec![root.join("two.ini")]
        );
    }

    #[test]
    fn test_change_of_included_file_touches_including_file() {
        let tmp = TempDir::new().unwrap();
        let root = canonical(tmp.path());
        let base = root.join("base.ini");
        let main = root.join("main.ini");
        std::fs::write(&base, "[person:jeb]\nfirstname = Jebediah\n").unwrap();
        std::fs::write(&main, "#include base.ini\n").unwrap();
        backdate(&main);
        let before = mtime(&main);

        let mut observer = IncludeObserver::new(&root);
        let mut control = RecordingControl::default();
        observer.initialize(&mut control).unwrap();

        std::fs::write(&base, "[person:jeb]\nfirstname = Jeb\n").unwrap();
        observer.handle_event(&FsEvent::modified(&base), &mut control).unwrap();

        assert!(mtime(&main) > before);
        assert_eq!(std::fs::read_to_string(&main).unwrap(), "#include base.ini\n");
    }

    #[test]
    fn test_nested_includes_touch_every_level() {
        let tmp = TempDir::new().unwrap();
        let root = canonical(tmp.path());
        std::fs::write(root.join("c.ini"), "").unwrap();
        std::fs::write(root.join("b.ini"), "#include c.ini\n").unwrap();
        std::fs::write(root.join("a.ini"), "#include b.ini\n").unwrap();

        let mut observer = IncludeObserver::new(&root);
        let mut control = RecordingControl::default();
        observer.initialize(&mut control).unwrap();
        assert_eq!(
            observer.including(&root.join("c.ini")),
            vec![root.join("b.ini"), root.join("a.ini")]
        );

        backdate(&root.join("a.ini"));
        let before = mtime(&root.join("a.ini"));
        observer
            .handle_event(&FsEvent::modified(root.join("c.ini")), &mut control)
            .unwrap();
        assert!(mtime(&root.join("a.ini")) > before);

        // The touch of b.ini comes back as an event; it must not propagate twice.
        backdate(&root.join("a.ini"));
        let before = mtime(&root.join("a.ini"));
        observer
            .handle_event(&FsEvent::modified(root.join("b.ini")), &mut control)
            .unwrap();
        assert_eq!(mtime(&root.join("a.ini")), before);
    }

    #[test]
    fn test_include_cycle_terminates() {
        let tmp = TempDir::new().unwrap();
        let root = canonical(tmp.path());
        std::fs::write(root.join("a.ini"), "#include b.ini\n").unwrap();
        std::fs::write(root.join("b.ini"), "#include a.ini\n").unwrap();

        let mut observer = IncludeObserver::new(&root);
        let mut control = RecordingControl::default();
        observer.initialize(&mut control).unwrap();

        let mut including = observer.including(&root.join("a.ini"));
        including.sort();
        assert_eq!(including, vec![root.join("a.ini"), root.join("b.ini")]);
        observer
            .handle_event(&FsEvent::modified(root.join("a.ini")), &mut control)
            .unwrap();
    }

    #[test]
    fn test_deleted_included_file_is_reported_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let root = canonical(tmp.path());
        std::fs::write(root.join("base.ini"), "").unwrap();
        std::fs::write(root.join("main.ini"), "#include base.ini\n").unwrap();

        let mut observer = IncludeObserver::new(&root);
        let mut control = RecordingControl::default();
        observer.initialize(&mut control).unwrap();

        std::fs::remove_file(root.join("base.ini")).unwrap();
        observer
            .handle_event(&FsEvent::deleted(root.join("base.ini")), &mut control)
            .unwrap();
        assert!(observer.graph().included_files.contains_key(&root.join("base.ini")));
    }
}
