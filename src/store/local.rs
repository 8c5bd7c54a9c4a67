use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, ViewError};
use crate::node::{ChildCounts, Node, NodeHandle, NodeKind, ShareState};
use crate::sort::SortSpec;
use crate::store::{ChangeFeed, NodeStore, StoreEvent};
use crate::thumbs::{is_image_name, ThumbnailSource};

/// A directory tree exposed as a node store.
///
/// Handles encode root-relative paths, so a rename shows up on the
/// change feed as a removal of the old handle plus an upsert of the new
/// one. The feed is driven by a debounced filesystem watcher.
pub struct LocalStore {
    root: PathBuf,
    feed: Arc<ChangeFeed>,
    watcher: Mutex<Option<Debouncer<RecommendedWatcher>>>,
    watch_active: Arc<AtomicBool>,
    ignore: Vec<String>,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = fs::canonicalize(root)?;
        Ok(Self {
            root,
            feed: Arc::new(ChangeFeed::new()),
            watcher: Mutex::new(None),
            watch_active: Arc::new(AtomicBool::new(false)),
            ignore: default_ignore_patterns(),
        })
    }

    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore = patterns;
        self
    }

    #[allow(dead_code)]
    pub fn root_path(&self) -> &Path {
        &self.root
    }

    fn watcher_guard(&self) -> MutexGuard<'_, Option<Debouncer<RecommendedWatcher>>> {
        self.watcher.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Absolute path behind a handle minted by this store.
    pub fn path_for(&self, handle: &NodeHandle) -> Result<PathBuf> {
        decode_path(&self.root, handle)
    }

    /// Start feeding filesystem changes to subscribers, coalesced over
    /// `debounce`.
    pub fn watch(&self, debounce: Duration) -> Result<()> {
        let root = self.root.clone();
        let feed = self.feed.clone();
        let active = self.watch_active.clone();
        let patterns = self.ignore.clone();
        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    if !active.load(Ordering::Relaxed) {
                        return;
                    }
                    for event in events {
                        if should_ignore(&event.path, &patterns) {
                            continue;
                        }
                        if let Some(change) = change_event(&root, &event.path) {
                            feed.publish(&change);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "watch backend error"),
            }
        })?;
        debouncer
            .watcher()
            .watch(&self.root, RecursiveMode::Recursive)?;
        *self.watcher_guard() = Some(debouncer);
        self.watch_active.store(true, Ordering::Relaxed);
        Ok(())
    }

    #[allow(dead_code)]
    pub fn stop_watch(&self) {
        self.watch_active.store(false, Ordering::Relaxed);
        self.watcher_guard().take();
    }

    /// Suspend event publication without tearing the watcher down.
    #[allow(dead_code)]
    pub fn pause_watch(&self) {
        self.watch_active.store(false, Ordering::Relaxed);
    }

    #[allow(dead_code)]
    pub fn resume_watch(&self) {
        if self.watcher_guard().is_some() {
            self.watch_active.store(true, Ordering::Relaxed);
        }
    }

    #[allow(dead_code)]
    pub fn watching(&self) -> bool {
        self.watch_active.load(Ordering::Relaxed) && self.watcher_guard().is_some()
    }
}

#[async_trait]
impl NodeStore for LocalStore {
    async fn root(&self) -> Result<Node> {
        read_node(&self.root, &self.root)
    }

    async fn node(&self, handle: &NodeHandle) -> Result<Option<Node>> {
        let path = self.path_for(handle)?;
        if fs::symlink_metadata(&path).is_err() {
            return Ok(None);
        }
        read_node(&self.root, &path).map(Some)
    }

    async fn children(&self, folder: &NodeHandle, sort: SortSpec) -> Result<Vec<Node>> {
        let dir = self.path_for(folder)?;
        let mut nodes = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let Ok(entry) = entry else { continue };
            match read_node(&self.root, &entry.path()) {
                Ok(node) => nodes.push(node),
                // Entries that vanish or refuse metadata mid-listing
                // are skipped, same as entries with undecodable names.
                Err(e) => debug!(path = %entry.path().display(), error = %e, "skipping entry"),
            }
        }
        sort.sort(&mut nodes);
        Ok(nodes)
    }

    async fn index_for(&self, node: &Node, sort: SortSpec) -> Result<i64> {
        let Some(parent) = node.parent.as_ref() else {
            return Ok(-1);
        };
        let Ok(siblings) = self.children(parent, sort).await else {
            return Ok(-1);
        };
        match siblings.iter().position(|s| s.handle == node.handle) {
            Some(index) => Ok(index as i64),
            None => Ok(siblings
                .iter()
                .take_while(|s| sort.compare(s, node).is_lt())
                .count() as i64),
        }
    }

    async fn child_counts(&self, folder: &NodeHandle) -> Result<ChildCounts> {
        let dir = self.path_for(folder)?;
        count_children(&dir)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent> {
        self.feed.subscribe()
    }
}

fn default_ignore_patterns() -> Vec<String> {
    vec![".git".to_string(), "node_modules".to_string(), "target".to_string()]
}

/// Handle for `path`, rooted at `root`. `None` for paths outside the
/// root or with undecodable names.
fn handle_for(root: &Path, path: &Path) -> Option<NodeHandle> {
    let rel = path.strip_prefix(root).ok()?;
    if rel.as_os_str().is_empty() {
        return Some(NodeHandle::from_bytes(b"/"));
    }
    let rel = rel.to_str()?;
    Some(NodeHandle::from_bytes(format!("/{rel}").as_bytes()))
}

fn decode_path(root: &Path, handle: &NodeHandle) -> Result<PathBuf> {
    let bytes = handle.decode()?;
    let text = String::from_utf8(bytes).map_err(|_| ViewError::BadHandle(handle.to_string()))?;
    let Some(rel) = text.strip_prefix('/') else {
        return Err(ViewError::BadHandle(handle.to_string()));
    };
    if rel.is_empty() {
        return Ok(root.to_path_buf());
    }
    Ok(root.join(rel))
}

fn read_node(root: &Path, path: &Path) -> Result<Node> {
    let metadata = fs::symlink_metadata(path)?;
    let handle = handle_for(root, path)
        .ok_or_else(|| ViewError::BadHandle(path.display().to_string()))?;
    let parent = if path == root {
        None
    } else {
        path.parent().and_then(|p| handle_for(root, p))
    };
    let kind = if path == root {
        NodeKind::Root
    } else if metadata.is_dir() {
        NodeKind::Folder
    } else if metadata.is_file() {
        NodeKind::File
    } else {
        NodeKind::Unknown
    };
    let counts = if kind.is_container() {
        count_children(path).ok()
    } else {
        None
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string());
    Ok(Node {
        handle,
        parent,
        name,
        kind,
        size: if metadata.is_file() { metadata.len() } else { 0 },
        modified: metadata.modified().ok(),
        share: ShareState::Private,
        counts,
    })
}

fn count_children(dir: &Path) -> Result<ChildCounts> {
    let mut counts = ChildCounts::default();
    for entry in fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        match entry.file_type() {
            Ok(kind) if kind.is_dir() => counts.folders += 1,
            Ok(_) => counts.files += 1,
            Err(_) => {}
        }
    }
    Ok(counts)
}

/// Translate a watcher path into a feed event: still on disk means
/// upsert, gone means removal.
fn change_event(root: &Path, path: &Path) -> Option<StoreEvent> {
    if fs::symlink_metadata(path).is_ok() {
        return read_node(root, path).ok().map(StoreEvent::Upserted);
    }
    let handle = handle_for(root, path)?;
    let parent = if path == root {
        None
    } else {
        path.parent().and_then(|p| handle_for(root, p))
    };
    Some(StoreEvent::Removed { handle, parent })
}

/// Check whether a path matches any ignore pattern. Patterns starting
/// with `*` match name suffixes, everything else matches whole path
/// components.
fn should_ignore(path: &Path, patterns: &[String]) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    for pattern in patterns {
        if let Some(suffix) = pattern.strip_prefix('*') {
            if name.ends_with(suffix) {
                return true;
            }
        } else if path
            .components()
            .any(|c| c.as_os_str().to_str() == Some(pattern.as_str()))
        {
            return true;
        }
    }
    false
}

/// Thumbnails for a [`LocalStore`]: image files are their own
/// thumbnail, everything else has none.
pub struct MediaThumbs {
    root: PathBuf,
}

impl MediaThumbs {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ThumbnailSource for MediaThumbs {
    async fn thumbnail(&self, node: &Node) -> Result<Option<PathBuf>> {
        if node.kind != NodeKind::File || !is_image_name(&node.name) {
            return Ok(None);
        }
        let path = decode_path(&self.root, &node.handle)?;
        if fs::symlink_metadata(&path).is_err() {
            return Ok(None);
        }
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        let mut f = File::create(dir.path().join("readme.txt")).unwrap();
        f.write_all(b"hello").unwrap();
        File::create(dir.path().join("docs/inner.txt")).unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn handles_roundtrip_through_paths() {
        let (_dir, store) = setup();
        let root = store.root_path().to_path_buf();
        let file = root.join("docs/inner.txt");
        let handle = handle_for(&root, &file).unwrap();
        assert_eq!(decode_path(&root, &handle).unwrap(), file);

        let root_handle = handle_for(&root, &root).unwrap();
        assert_eq!(decode_path(&root, &root_handle).unwrap(), root);
    }

    #[tokio::test]
    async fn root_node_is_a_container_with_counts() {
        let (_dir, store) = setup();
        let root = store.root().await.unwrap();
        assert_eq!(root.kind, NodeKind::Root);
        assert!(root.parent.is_none());
        assert_eq!(root.counts, Some(ChildCounts::new(1, 1)));
    }

    #[tokio::test]
    async fn lists_children_sorted_with_folders_first() {
        let (_dir, store) = setup();
        let root = store.root().await.unwrap();
        let children = store
            .children(&root.handle, SortSpec::default())
            .await
            .unwrap();
        let names: Vec<&str> = children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["docs", "readme.txt"]);
        assert_eq!(children[0].kind, NodeKind::Folder);
        assert_eq!(children[0].counts, Some(ChildCounts::new(0, 1)));
        assert_eq!(children[1].size, 5);
    }

    #[tokio::test]
    async fn missing_node_resolves_to_none() {
        let (_dir, store) = setup();
        let ghost = handle_for(store.root_path(), &store.root_path().join("ghost.txt")).unwrap();
        assert!(store.node(&ghost).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn index_for_positions_among_siblings() {
        let (_dir, store) = setup();
        let root = store.root().await.unwrap();
        let children = store
            .children(&root.handle, SortSpec::default())
            .await
            .unwrap();
        let readme = children.iter().find(|n| n.name == "readme.txt").unwrap();
        assert_eq!(
            store.index_for(readme, SortSpec::default()).await.unwrap(),
            1
        );

        let detached = store.root().await.unwrap();
        assert_eq!(
            store.index_for(&detached, SortSpec::default()).await.unwrap(),
            -1
        );
    }

    #[test]
    fn ignore_patterns_match_components_and_suffixes() {
        let patterns = vec![".git".to_string(), "*.swp".to_string()];
        assert!(should_ignore(Path::new("/repo/.git/HEAD"), &patterns));
        assert!(should_ignore(Path::new("/repo/notes.swp"), &patterns));
        assert!(!should_ignore(Path::new("/repo/src/main.rs"), &patterns));
    }

    #[test]
    fn change_events_distinguish_presence() {
        let (_dir, store) = setup();
        let root = store.root_path().to_path_buf();

        let existing = root.join("readme.txt");
        match change_event(&root, &existing) {
            Some(StoreEvent::Upserted(node)) => assert_eq!(node.name, "readme.txt"),
            other => panic!("expected upsert, got {other:?}"),
        }

        let gone = root.join("docs/gone.txt");
        match change_event(&root, &gone) {
            Some(StoreEvent::Removed { handle, parent }) => {
                assert_eq!(handle, handle_for(&root, &gone).unwrap());
                assert_eq!(parent, Some(handle_for(&root, &root.join("docs")).unwrap()));
            }
            other => panic!("expected removal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn watcher_reports_created_files() {
        let (dir, store) = setup();
        let mut feed = store.subscribe();
        store.watch(Duration::from_millis(50)).unwrap();
        assert!(store.watching());

        File::create(dir.path().join("fresh.txt")).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut seen = None;
        while std::time::Instant::now() < deadline {
            match feed.try_recv() {
                Ok(StoreEvent::Upserted(node)) if node.name == "fresh.txt" => {
                    seen = Some(node);
                    break;
                }
                Ok(_) => continue,
                Err(_) => tokio::time::sleep(Duration::from_millis(25)).await,
            }
        }
        let node = seen.expect("no upsert for created file");
        assert_eq!(node.kind, NodeKind::File);
        store.stop_watch();
        assert!(!store.watching());
    }

    #[tokio::test]
    async fn paused_watcher_stays_quiet() {
        let (dir, store) = setup();
        let mut feed = store.subscribe();
        store.watch(Duration::from_millis(20)).unwrap();
        store.pause_watch();

        File::create(dir.path().join("quiet.txt")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(feed.try_recv().is_err());

        store.resume_watch();
        assert!(store.watching());
    }

    #[tokio::test]
    async fn media_thumbs_point_at_image_files() {
        let (dir, store) = setup();
        File::create(dir.path().join("photo.jpg")).unwrap();
        let root = store.root().await.unwrap();
        let children = store
            .children(&root.handle, SortSpec::default())
            .await
            .unwrap();
        let photo = children.iter().find(|n| n.name == "photo.jpg").unwrap();
        let text = children.iter().find(|n| n.name == "readme.txt").unwrap();

        let thumbs = MediaThumbs::new(store.root_path().to_path_buf());
        let path = thumbs.thumbnail(photo).await.unwrap().unwrap();
        assert!(path.ends_with("photo.jpg"));
        assert!(thumbs.thumbnail(text).await.unwrap().is_none());
    }
}
