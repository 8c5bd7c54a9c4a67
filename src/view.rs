use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::collection::{CollectionChange, FormFactor, LiveCollection};
use crate::event::{Events, LoadId, ViewEvent};
use crate::loader::{ListingRequest, NodeListLoader, ViewMode};
use crate::node::{Node, NodeHandle, NodeItem};
use crate::prefs::ViewPrefs;
use crate::router::NodeEventRouter;
use crate::sort::{SortKey, SortSpec};
use crate::store::{NodeStore, StoreEvent};
use crate::thumbs::{spawn_fetch, ThumbnailSource};

/// Lifecycle of the displayed listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    /// Nothing requested yet.
    Idle,
    /// A load is flushing batches.
    Loading,
    /// Load complete with at least one item.
    Loaded,
    /// Load complete, folder has no children.
    Empty,
    /// Load or navigation failed; the message is for the user.
    Failed(String),
}

/// One ancestor entry of the breadcrumb trail, root first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crumb {
    pub handle: NodeHandle,
    pub name: String,
}

/// One folder's worth of live view state.
///
/// All mutation happens through `&mut self` on the task that owns the
/// view; loader chunks, store change events and thumbnail results
/// arrive through the [`Events`] channel and are applied by
/// [`handle_event`]. Events stamped with a superseded load id are
/// dropped here, which together with the loader's cancellation flag
/// makes navigation last-request-wins.
///
/// [`handle_event`]: FolderView::handle_event
pub struct FolderView {
    store: Arc<dyn NodeStore>,
    prefs: Arc<dyn ViewPrefs>,
    events_tx: mpsc::UnboundedSender<ViewEvent>,
    loader: NodeListLoader,
    items: LiveCollection<NodeItem>,
    crumbs: Vec<Crumb>,
    folder: Option<Node>,
    state: ViewState,
    sort: SortSpec,
    mode: ViewMode,
    default_sort: SortSpec,
    default_mode: ViewMode,
    active_load: Option<LoadId>,
}

impl FolderView {
    pub fn new(
        store: Arc<dyn NodeStore>,
        prefs: Arc<dyn ViewPrefs>,
        events: &Events,
        form_factor: FormFactor,
    ) -> Self {
        Self {
            loader: NodeListLoader::new(store.clone(), events.sender()),
            store,
            prefs,
            events_tx: events.sender(),
            items: LiveCollection::new(form_factor),
            crumbs: Vec::new(),
            folder: None,
            state: ViewState::Idle,
            sort: SortSpec::default(),
            mode: ViewMode::List,
            default_sort: SortSpec::default(),
            default_mode: ViewMode::List,
            active_load: None,
        }
    }

    /// Set the fallback sort and mode used by folders that have no
    /// remembered preference of their own.
    pub fn with_defaults(mut self, sort: SortSpec, mode: ViewMode) -> Self {
        self.default_sort = sort;
        self.default_mode = mode;
        self
    }

    /// Attach a thumbnail source: every item inserted into the view
    /// fires one background fetch, driven by the collection's own
    /// change notifications.
    pub fn with_thumbnails(mut self, source: Arc<dyn ThumbnailSource>) -> Self {
        let tx = self.events_tx.clone();
        self.items.subscribe(Box::new(move |change| {
            if let CollectionChange::Inserted { item, .. } = change {
                if !item.node.is_container() {
                    spawn_fetch(source.clone(), item.node.clone(), tx.clone());
                }
            }
        }));
        self
    }

    // ── accessors ───────────────────────────────────────────────────

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn items(&self) -> &LiveCollection<NodeItem> {
        &self.items
    }

    /// Selection and the other collection operations go through here.
    pub fn items_mut(&mut self) -> &mut LiveCollection<NodeItem> {
        &mut self.items
    }

    pub fn crumbs(&self) -> &[Crumb] {
        &self.crumbs
    }

    pub fn sort(&self) -> SortSpec {
        self.sort
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn loading(&self) -> bool {
        self.active_load.is_some()
    }

    /// Child-count summary of the viewed folder itself.
    pub fn folder_summary(&self) -> Option<String> {
        self.folder
            .as_ref()
            .map(|f| f.counts.unwrap_or_default().summary())
    }

    // ── operations ──────────────────────────────────────────────────

    /// Switch the view to `handle`: resolve the folder, rebuild the
    /// breadcrumb trail, re-read per-folder preferences, reset the
    /// collection and start a fresh load. Any in-flight load is
    /// superseded. Failures surface through [`ViewState::Failed`].
    pub async fn navigate(&mut self, handle: &NodeHandle) {
        let node = match self.store.node(handle).await {
            Ok(Some(node)) if node.is_container() => node,
            Ok(Some(node)) => {
                self.fail_navigation(format!("{} is not a folder", node.name));
                return;
            }
            Ok(None) => {
                self.fail_navigation(format!("folder {handle} no longer exists"));
                return;
            }
            Err(e) => {
                self.fail_navigation(e.to_string());
                return;
            }
        };

        self.crumbs = self.build_crumbs(&node).await;
        let key = node.pref_key();
        self.sort = self.prefs.sort_for(&key).unwrap_or(self.default_sort);
        self.mode = self.prefs.mode_for(&key).unwrap_or(self.default_mode);
        self.items.clear();
        self.items.set_direction(self.sort.direction);
        self.state = ViewState::Loading;
        let load = self.loader.start(
            ListingRequest {
                folder: node.handle.clone(),
                sort: self.sort,
            },
            self.mode,
        );
        self.active_load = Some(load);
        self.folder = Some(node);
    }

    /// Re-run the current folder's load from scratch.
    #[allow(dead_code)]
    pub async fn reload(&mut self) {
        let Some(handle) = self.folder.as_ref().map(|f| f.handle.clone()) else {
            return;
        };
        self.navigate(&handle).await;
    }

    /// Change the sort key, remember it for this folder and refetch.
    #[allow(dead_code)]
    pub async fn set_sort_key(&mut self, key: SortKey) {
        self.sort.key = key;
        self.persist_sort();
        self.reload().await;
    }

    /// Flip the sort direction, remember it and refetch in the new
    /// order.
    #[allow(dead_code)]
    pub async fn invert_sort_order(&mut self) {
        self.items.invert_order();
        self.sort.direction = self.items.direction();
        self.persist_sort();
        self.reload().await;
    }

    /// Change the presentation mode and remember it for this folder.
    /// Takes effect on the next load; the current items stay put.
    #[allow(dead_code)]
    pub fn set_view_mode(&mut self, mode: ViewMode) {
        self.mode = mode;
        if let Some(folder) = &self.folder {
            self.prefs.set_mode(&folder.pref_key(), mode);
        }
    }

    /// Apply one marshalled event. This is the single mutation entry
    /// point the owning task drives in its receive loop.
    pub async fn handle_event(&mut self, event: ViewEvent) {
        match event {
            ViewEvent::LoadBatch { load, items } => {
                if self.active_load != Some(load) {
                    debug!(load, "dropping stale batch");
                    return;
                }
                self.items.append(items);
            }
            ViewEvent::LoadFinished { load } => {
                if self.active_load != Some(load) {
                    debug!(load, "dropping stale completion");
                    return;
                }
                self.active_load = None;
                self.state = if self.items.is_empty() {
                    ViewState::Empty
                } else {
                    ViewState::Loaded
                };
                self.refresh_folder_counts().await;
            }
            ViewEvent::LoadFailed { load, message } => {
                if self.active_load != Some(load) {
                    debug!(load, "dropping stale failure");
                    return;
                }
                self.active_load = None;
                warn!(load, message = %message, "listing load failed");
                self.items.clear();
                self.state = ViewState::Failed(message);
            }
            ViewEvent::Store(event) => self.apply_store_event(event).await,
            ViewEvent::Thumbnail { handle, path } => {
                self.items.update(&handle, |item| item.thumbnail = Some(path));
            }
        }
    }

    async fn apply_store_event(&mut self, event: StoreEvent) {
        let Some(folder) = &self.folder else {
            return;
        };
        let router = NodeEventRouter::new(self.store.clone(), folder.handle.clone(), self.sort);
        let counts_stale = router.apply(event, &mut self.items).await;
        if counts_stale {
            self.refresh_folder_counts().await;
            // Live patches can empty a loaded view or refill an empty
            // one after the load already settled.
            if self.state == ViewState::Loaded && self.items.is_empty() {
                self.state = ViewState::Empty;
            } else if self.state == ViewState::Empty && !self.items.is_empty() {
                self.state = ViewState::Loaded;
            }
        }
    }

    async fn refresh_folder_counts(&mut self) {
        let Some(folder) = self.folder.as_mut() else {
            return;
        };
        match self.store.child_counts(&folder.handle).await {
            Ok(counts) => folder.counts = Some(counts),
            Err(e) => debug!(error = %e, "keeping stale folder counts"),
        }
    }

    /// Walk parent handles up to the root. A broken link ends the trail
    /// early rather than failing the navigation.
    async fn build_crumbs(&self, node: &Node) -> Vec<Crumb> {
        let mut crumbs = vec![Crumb {
            handle: node.handle.clone(),
            name: node.name.clone(),
        }];
        let mut seen: HashSet<NodeHandle> = HashSet::from([node.handle.clone()]);
        let mut cursor = node.parent.clone();
        while let Some(parent) = cursor {
            // A corrupt store could loop parents; the seen set caps the walk.
            if !seen.insert(parent.clone()) {
                break;
            }
            match self.store.node(&parent).await {
                Ok(Some(ancestor)) => {
                    crumbs.push(Crumb {
                        handle: ancestor.handle.clone(),
                        name: ancestor.name.clone(),
                    });
                    cursor = ancestor.parent;
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "breadcrumb walk stopped early");
                    break;
                }
            }
        }
        crumbs.reverse();
        crumbs
    }

    fn persist_sort(&self) {
        if let Some(folder) = &self.folder {
            self.prefs.set_sort(&folder.pref_key(), self.sort);
        }
    }

    fn fail_navigation(&mut self, message: String) {
        warn!(message = %message, "navigation failed");
        self.loader.cancel_current();
        self.active_load = None;
        self.items.clear();
        self.crumbs.clear();
        self.folder = None;
        self.state = ViewState::Failed(message);
    }
}
