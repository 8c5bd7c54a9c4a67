use std::sync::Arc;

use tracing::debug;

use crate::collection::LiveCollection;
use crate::error::Result;
use crate::node::{Node, NodeHandle, NodeItem};
use crate::sort::SortSpec;
use crate::store::{NodeStore, StoreEvent};

/// Applies store change events to the collection of one viewed folder.
///
/// Routing is per-event: a failure while patching one event is logged
/// and dropped without poisoning the events around it. The next full
/// reload trues the view up again.
pub struct NodeEventRouter {
    store: Arc<dyn NodeStore>,
    folder: NodeHandle,
    sort: SortSpec,
}

impl NodeEventRouter {
    pub fn new(store: Arc<dyn NodeStore>, folder: NodeHandle, sort: SortSpec) -> Self {
        Self {
            store,
            folder,
            sort,
        }
    }

    /// Patch `items` with one event. Returns true when the viewed
    /// folder's own child counts went stale, i.e. when an item was
    /// inserted or removed.
    pub async fn apply(&self, event: StoreEvent, items: &mut LiveCollection<NodeItem>) -> bool {
        match event {
            StoreEvent::Upserted(node) => {
                let parent = node.parent.clone();
                let in_view = parent.as_ref() == Some(&self.folder);
                let mut stale = false;

                if items.contains_key(&node.handle) {
                    if in_view {
                        let update = node.clone();
                        items.update(&node.handle, |item| item.update_from(update));
                    } else {
                        // Reparented away from the viewed folder.
                        items.remove_by_key(&node.handle);
                        debug!(node = %node.handle, "node moved out of view");
                        stale = true;
                    }
                } else if in_view {
                    match self.insertion_index(&node).await {
                        Ok(index) => {
                            let item = NodeItem::new(node.clone());
                            if index >= items.len() {
                                items.push(item);
                            } else {
                                items.insert(index, item);
                            }
                            stale = true;
                        }
                        Err(e) => {
                            debug!(node = %node.handle, error = %e, "skipping unappliable insert")
                        }
                    }
                }

                if let Some(parent) = parent {
                    if let Err(e) = self.refresh_folder_item(&parent, items).await {
                        debug!(folder = %parent, error = %e, "skipping summary refresh");
                    }
                }
                stale
            }
            StoreEvent::Removed { handle, parent } => {
                if items.remove_by_key(&handle).is_some() {
                    debug!(node = %handle, "removed from view");
                    return true;
                }
                if let Some(parent) = parent {
                    if let Err(e) = self.refresh_folder_item(&parent, items).await {
                        debug!(folder = %parent, error = %e, "skipping summary refresh");
                    }
                }
                false
            }
            StoreEvent::ShareChanged(node) => {
                let share = node.share;
                items.update(&node.handle, |item| item.node.share = share);
                false
            }
        }
    }

    /// Display position for a node entering the view. Stores that
    /// cannot answer report a negative index, which clamps to the top;
    /// positions past the end become appends at the call site.
    async fn insertion_index(&self, node: &Node) -> Result<usize> {
        let index = self.store.index_for(node, self.sort).await?;
        Ok(index.max(0) as usize)
    }

    /// Keep the child-count summary of a displayed subfolder live.
    async fn refresh_folder_item(
        &self,
        folder: &NodeHandle,
        items: &mut LiveCollection<NodeItem>,
    ) -> Result<()> {
        if *folder == self.folder || !items.contains_key(folder) {
            return Ok(());
        }
        let counts = self.store.child_counts(folder).await?;
        items.update(folder, |item| item.set_counts(counts));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::FormFactor;
    use crate::node::{Node, NodeKind, ShareState};
    use crate::store::memory::MemoryStore;

    async fn load_collection(
        store: &MemoryStore,
        folder: &NodeHandle,
    ) -> LiveCollection<NodeItem> {
        let mut items = LiveCollection::new(FormFactor::Desktop);
        let children = store.children(folder, SortSpec::default()).await.unwrap();
        for child in children {
            items.push(NodeItem::new(child));
        }
        items
    }

    fn router(store: &Arc<MemoryStore>, folder: &NodeHandle) -> NodeEventRouter {
        NodeEventRouter::new(store.clone(), folder.clone(), SortSpec::default())
    }

    fn names(items: &LiveCollection<NodeItem>) -> Vec<String> {
        items.items().iter().map(|i| i.node.name.clone()).collect()
    }

    fn plain_node(name: &str, parent: &NodeHandle) -> Node {
        Node {
            handle: NodeHandle::from_bytes(name.as_bytes()),
            parent: Some(parent.clone()),
            name: name.to_string(),
            kind: NodeKind::File,
            size: 1,
            modified: None,
            share: ShareState::Private,
            counts: None,
        }
    }

    #[tokio::test]
    async fn new_node_lands_at_store_position() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        store.add_file(&root, "a.txt", 1).unwrap();
        store.add_file(&root, "m.txt", 1).unwrap();
        store.add_file(&root, "z.txt", 1).unwrap();
        let mut items = load_collection(&store, &root).await;

        let mut feed = store.subscribe();
        store.add_file(&root, "b.txt", 1).unwrap();
        let event = feed.try_recv().unwrap();

        let stale = router(&store, &root).apply(event, &mut items).await;
        assert!(stale);
        assert_eq!(names(&items), vec!["a.txt", "b.txt", "m.txt", "z.txt"]);
    }

    #[tokio::test]
    async fn pinned_index_inserts_mid_list() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        let mut items = LiveCollection::new(FormFactor::Desktop);
        for name in ["A", "B", "C"] {
            items.push(NodeItem::new(plain_node(name, &root)));
        }
        store.force_index(Some(1));

        let event = StoreEvent::Upserted(plain_node("D", &root));
        router(&store, &root).apply(event, &mut items).await;
        assert_eq!(names(&items), vec!["A", "D", "B", "C"]);
    }

    #[tokio::test]
    async fn negative_index_clamps_to_top() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        let mut items = LiveCollection::new(FormFactor::Desktop);
        items.push(NodeItem::new(plain_node("A", &root)));
        store.force_index(Some(-3));

        let event = StoreEvent::Upserted(plain_node("top", &root));
        router(&store, &root).apply(event, &mut items).await;
        assert_eq!(names(&items), vec!["top", "A"]);
    }

    #[tokio::test]
    async fn index_past_end_appends() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        let mut items = LiveCollection::new(FormFactor::Desktop);
        items.push(NodeItem::new(plain_node("A", &root)));
        store.force_index(Some(99));

        let event = StoreEvent::Upserted(plain_node("tail", &root));
        router(&store, &root).apply(event, &mut items).await;
        assert_eq!(names(&items), vec!["A", "tail"]);
    }

    #[tokio::test]
    async fn repeated_upsert_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        let mut items = LiveCollection::new(FormFactor::Desktop);
        store.force_index(Some(0));

        let node = plain_node("only", &root);
        let r = router(&store, &root);
        r.apply(StoreEvent::Upserted(node.clone()), &mut items).await;
        r.apply(StoreEvent::Upserted(node.clone()), &mut items).await;
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn rename_updates_in_place_and_keeps_selection() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        store.add_file(&root, "a.txt", 1).unwrap();
        let target = store.add_file(&root, "b.txt", 1).unwrap();
        let mut items = load_collection(&store, &root).await;
        items.set_selected(&target, true);

        let mut feed = store.subscribe();
        store.rename(&target, "renamed.txt").unwrap();
        let event = feed.try_recv().unwrap();

        let stale = router(&store, &root).apply(event, &mut items).await;
        assert!(!stale);
        assert_eq!(items.position(&target), Some(1));
        assert_eq!(items.get(1).unwrap().node.name, "renamed.txt");
        assert!(items.is_selected(&target));
    }

    #[tokio::test]
    async fn move_away_removes_from_view() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        let docs = store.add_folder(&root, "docs").unwrap();
        let file = store.add_file(&root, "a.txt", 1).unwrap();
        let mut items = load_collection(&store, &root).await;
        assert_eq!(items.len(), 2);

        let mut feed = store.subscribe();
        store.move_node(&file, &docs).unwrap();
        let event = feed.try_recv().unwrap();

        let stale = router(&store, &root).apply(event, &mut items).await;
        assert!(stale);
        assert!(!items.contains_key(&file));
        // The move also lands inside the displayed docs folder, whose
        // summary must pick it up.
        assert_eq!(items.get(0).unwrap().summary().as_deref(), Some("1 file"));
    }

    #[tokio::test]
    async fn move_into_view_inserts() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        let docs = store.add_folder(&root, "docs").unwrap();
        let file = store.add_file(&docs, "deep.txt", 1).unwrap();
        let mut items = load_collection(&store, &root).await;
        assert_eq!(items.len(), 1);

        let mut feed = store.subscribe();
        store.move_node(&file, &root).unwrap();
        let event = feed.try_recv().unwrap();

        router(&store, &root).apply(event, &mut items).await;
        assert_eq!(names(&items), vec!["docs", "deep.txt"]);
    }

    #[tokio::test]
    async fn change_inside_displayed_subfolder_refreshes_its_summary() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        let docs = store.add_folder(&root, "docs").unwrap();
        store.add_file(&docs, "one.txt", 1).unwrap();
        let mut items = load_collection(&store, &root).await;
        assert_eq!(items.get(0).unwrap().summary().as_deref(), Some("1 file"));

        let mut feed = store.subscribe();
        store.add_file(&docs, "two.txt", 1).unwrap();
        let event = feed.try_recv().unwrap();

        let stale = router(&store, &root).apply(event, &mut items).await;
        assert!(!stale);
        assert_eq!(items.len(), 1);
        assert_eq!(items.get(0).unwrap().summary().as_deref(), Some("2 files"));
    }

    #[tokio::test]
    async fn removal_inside_displayed_subfolder_refreshes_its_summary() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        let docs = store.add_folder(&root, "docs").unwrap();
        let one = store.add_file(&docs, "one.txt", 1).unwrap();
        store.add_file(&docs, "two.txt", 1).unwrap();
        let mut items = load_collection(&store, &root).await;
        assert_eq!(items.get(0).unwrap().summary().as_deref(), Some("2 files"));

        let mut feed = store.subscribe();
        store.remove(&one).unwrap();
        let event = feed.try_recv().unwrap();

        let stale = router(&store, &root).apply(event, &mut items).await;
        assert!(!stale);
        assert_eq!(items.get(0).unwrap().summary().as_deref(), Some("1 file"));
    }

    #[tokio::test]
    async fn removal_of_displayed_item_reports_stale_counts() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        let file = store.add_file(&root, "a.txt", 1).unwrap();
        let mut items = load_collection(&store, &root).await;

        let mut feed = store.subscribe();
        store.remove(&file).unwrap();
        let event = feed.try_recv().unwrap();

        let stale = router(&store, &root).apply(event, &mut items).await;
        assert!(stale);
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn share_change_touches_share_only() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        let file = store.add_file(&root, "a.txt", 7).unwrap();
        let mut items = load_collection(&store, &root).await;

        let mut feed = store.subscribe();
        store.set_share(&file, ShareState::OutShare).unwrap();
        let event = feed.try_recv().unwrap();

        router(&store, &root).apply(event, &mut items).await;
        let item = items.get(0).unwrap();
        assert_eq!(item.node.share, ShareState::OutShare);
        assert_eq!(item.node.size, 7);
        assert_eq!(item.node.name, "a.txt");
    }

    #[tokio::test]
    async fn share_change_for_absent_node_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        let mut items = LiveCollection::new(FormFactor::Desktop);

        let event = StoreEvent::ShareChanged(plain_node("ghost", &root));
        router(&store, &root).apply(event, &mut items).await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn one_broken_event_does_not_poison_the_next() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        let mut items = LiveCollection::new(FormFactor::Desktop);

        let broken = plain_node("broken", &root);
        store.break_index_for(&broken.handle);
        let r = router(&store, &root);
        r.apply(StoreEvent::Upserted(broken), &mut items).await;
        assert!(items.is_empty());

        store.force_index(Some(0));
        r.apply(StoreEvent::Upserted(plain_node("fine", &root)), &mut items)
            .await;
        assert_eq!(names(&items), vec!["fine"]);
    }

    #[tokio::test]
    async fn removal_with_unknown_parent_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root_handle();
        let mut items = load_collection(&store, &root).await;

        let event = StoreEvent::Removed {
            handle: NodeHandle::from_bytes(b"phantom"),
            parent: Some(NodeHandle::from_bytes(b"nowhere")),
        };
        let stale = router(&store, &root).apply(event, &mut items).await;
        assert!(!stale);
    }
}
