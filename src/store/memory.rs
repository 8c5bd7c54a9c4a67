use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Result, ViewError};
use crate::node::{ChildCounts, Node, NodeHandle, NodeKind, ShareState};
use crate::sort::SortSpec;
use crate::store::{ChangeFeed, NodeStore, StoreEvent};

/// In-memory node graph with handle-stable moves, plus fault and
/// latency injection. Backs the async tests; also handy as a scratch
/// drive for demos.
pub struct MemoryStore {
    graph: Mutex<Graph>,
    faults: Mutex<Faults>,
    feed: ChangeFeed,
}

struct Graph {
    nodes: HashMap<NodeHandle, Node>,
    children: HashMap<NodeHandle, Vec<NodeHandle>>,
    root: NodeHandle,
    seq: u64,
}

#[derive(Default)]
struct Faults {
    fetch_latency: Option<Duration>,
    fail_next_children: Option<String>,
    broken_index: HashSet<NodeHandle>,
    forced_index: Option<i64>,
}

impl Graph {
    fn mint(&mut self) -> NodeHandle {
        self.seq += 1;
        NodeHandle::from_bytes(&self.seq.to_be_bytes())
    }

    /// Snapshot of a node with container counts computed from the
    /// current child lists.
    fn snapshot(&self, handle: &NodeHandle) -> Option<Node> {
        let mut node = self.nodes.get(handle)?.clone();
        if node.is_container() {
            node.counts = Some(self.counts_of(handle));
        }
        Some(node)
    }

    fn counts_of(&self, handle: &NodeHandle) -> ChildCounts {
        let mut counts = ChildCounts::default();
        if let Some(children) = self.children.get(handle) {
            for child in children {
                if let Some(node) = self.nodes.get(child) {
                    if node.is_container() {
                        counts.folders += 1;
                    } else {
                        counts.files += 1;
                    }
                }
            }
        }
        counts
    }

    fn sorted_children(&self, folder: &NodeHandle, sort: SortSpec) -> Option<Vec<Node>> {
        let handles = self.children.get(folder)?;
        let mut nodes: Vec<Node> = handles.iter().filter_map(|h| self.snapshot(h)).collect();
        sort.sort(&mut nodes);
        Some(nodes)
    }

    fn detach(&mut self, handle: &NodeHandle) {
        let parent = self.nodes.get(handle).and_then(|n| n.parent.clone());
        if let Some(parent) = parent {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|h| h != handle);
            }
        }
    }

    fn is_ancestor(&self, candidate: &NodeHandle, of: &NodeHandle) -> bool {
        let mut cursor = self.nodes.get(of).and_then(|n| n.parent.clone());
        while let Some(parent) = cursor {
            if parent == *candidate {
                return true;
            }
            cursor = self.nodes.get(&parent).and_then(|n| n.parent.clone());
        }
        false
    }

    /// Handles of `handle` and every descendant, parents before
    /// children.
    fn subtree(&self, handle: &NodeHandle) -> Vec<NodeHandle> {
        let mut out = vec![handle.clone()];
        let mut queue = vec![handle.clone()];
        while let Some(next) = queue.pop() {
            if let Some(children) = self.children.get(&next) {
                out.extend(children.iter().cloned());
                queue.extend(children.iter().cloned());
            }
        }
        out
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let root_handle = NodeHandle::from_bytes(&0u64.to_be_bytes());
        let root = Node {
            handle: root_handle.clone(),
            parent: None,
            name: "Cloud Drive".to_string(),
            kind: NodeKind::Root,
            size: 0,
            modified: Some(SystemTime::now()),
            share: ShareState::Private,
            counts: None,
        };
        let mut nodes = HashMap::new();
        nodes.insert(root_handle.clone(), root);
        let mut children = HashMap::new();
        children.insert(root_handle.clone(), Vec::new());
        Self {
            graph: Mutex::new(Graph {
                nodes,
                children,
                root: root_handle,
                seq: 0,
            }),
            faults: Mutex::new(Faults::default()),
            feed: ChangeFeed::new(),
        }
    }

    fn graph(&self) -> MutexGuard<'_, Graph> {
        self.graph.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn root_handle(&self) -> NodeHandle {
        self.graph().root.clone()
    }

    // ── fixture construction ────────────────────────────────────────

    pub fn add_folder(&self, parent: &NodeHandle, name: &str) -> Result<NodeHandle> {
        self.add_node(parent, name, NodeKind::Folder, 0)
    }

    pub fn add_file(&self, parent: &NodeHandle, name: &str, size: u64) -> Result<NodeHandle> {
        self.add_node(parent, name, NodeKind::File, size)
    }

    fn add_node(
        &self,
        parent: &NodeHandle,
        name: &str,
        kind: NodeKind,
        size: u64,
    ) -> Result<NodeHandle> {
        let event = {
            let mut graph = self.graph();
            if !graph
                .nodes
                .get(parent)
                .map(|n| n.is_container())
                .unwrap_or(false)
            {
                return Err(ViewError::NodeGone(parent.clone()));
            }
            let handle = graph.mint();
            let node = Node {
                handle: handle.clone(),
                parent: Some(parent.clone()),
                name: name.to_string(),
                kind,
                size,
                modified: Some(SystemTime::now()),
                share: ShareState::Private,
                counts: None,
            };
            graph.nodes.insert(handle.clone(), node);
            graph.children.entry(handle.clone()).or_default();
            graph
                .children
                .entry(parent.clone())
                .or_default()
                .push(handle.clone());
            let snapshot = graph
                .snapshot(&handle)
                .ok_or_else(|| ViewError::NodeGone(handle.clone()))?;
            (handle, snapshot)
        };
        self.feed.publish(&StoreEvent::Upserted(event.1));
        Ok(event.0)
    }

    // ── mutation, each publishing to the feed ───────────────────────

    pub fn rename(&self, handle: &NodeHandle, name: &str) -> Result<()> {
        self.upsert_with(handle, |node| node.name = name.to_string())
    }

    pub fn set_size(&self, handle: &NodeHandle, size: u64) -> Result<()> {
        self.upsert_with(handle, |node| node.size = size)
    }

    fn upsert_with(&self, handle: &NodeHandle, apply: impl FnOnce(&mut Node)) -> Result<()> {
        let snapshot = {
            let mut graph = self.graph();
            let node = graph
                .nodes
                .get_mut(handle)
                .ok_or_else(|| ViewError::NodeGone(handle.clone()))?;
            apply(node);
            node.modified = Some(SystemTime::now());
            graph
                .snapshot(handle)
                .ok_or_else(|| ViewError::NodeGone(handle.clone()))?
        };
        self.feed.publish(&StoreEvent::Upserted(snapshot));
        Ok(())
    }

    /// Move a node under a new parent, keeping its handle. Refuses a
    /// destination inside the moved subtree.
    pub fn move_node(&self, handle: &NodeHandle, new_parent: &NodeHandle) -> Result<()> {
        let snapshot = {
            let mut graph = self.graph();
            if !graph
                .nodes
                .get(new_parent)
                .map(|n| n.is_container())
                .unwrap_or(false)
            {
                return Err(ViewError::NodeGone(new_parent.clone()));
            }
            if handle == new_parent || graph.is_ancestor(handle, new_parent) {
                return Err(ViewError::NodeGone(new_parent.clone()));
            }
            if !graph.nodes.contains_key(handle) {
                return Err(ViewError::NodeGone(handle.clone()));
            }
            graph.detach(handle);
            if let Some(node) = graph.nodes.get_mut(handle) {
                node.parent = Some(new_parent.clone());
                node.modified = Some(SystemTime::now());
            }
            graph
                .children
                .entry(new_parent.clone())
                .or_default()
                .push(handle.clone());
            graph
                .snapshot(handle)
                .ok_or_else(|| ViewError::NodeGone(handle.clone()))?
        };
        self.feed.publish(&StoreEvent::Upserted(snapshot));
        Ok(())
    }

    pub fn set_share(&self, handle: &NodeHandle, share: ShareState) -> Result<()> {
        let snapshot = {
            let mut graph = self.graph();
            let node = graph
                .nodes
                .get_mut(handle)
                .ok_or_else(|| ViewError::NodeGone(handle.clone()))?;
            node.share = share;
            graph
                .snapshot(handle)
                .ok_or_else(|| ViewError::NodeGone(handle.clone()))?
        };
        self.feed.publish(&StoreEvent::ShareChanged(snapshot));
        Ok(())
    }

    /// Remove a node and its subtree. One removal event is published
    /// per dropped node, parents before children.
    pub fn remove(&self, handle: &NodeHandle) -> Result<()> {
        let removed = {
            let mut graph = self.graph();
            if !graph.nodes.contains_key(handle) {
                return Err(ViewError::NodeGone(handle.clone()));
            }
            if *handle == graph.root {
                return Err(ViewError::NodeGone(handle.clone()));
            }
            graph.detach(handle);
            let doomed = graph.subtree(handle);
            let mut events = Vec::with_capacity(doomed.len());
            for gone in &doomed {
                let parent = graph.nodes.get(gone).and_then(|n| n.parent.clone());
                graph.nodes.remove(gone);
                graph.children.remove(gone);
                events.push(StoreEvent::Removed {
                    handle: gone.clone(),
                    parent,
                });
            }
            events
        };
        for event in &removed {
            self.feed.publish(event);
        }
        Ok(())
    }

}

// ── fault and latency injection ─────────────────────────────────────

#[allow(dead_code)]
impl MemoryStore {
    /// Delay every listing fetch by `latency`.
    pub fn set_fetch_latency(&self, latency: Option<Duration>) {
        self.faults().fetch_latency = latency;
    }

    /// Make the next listing fetch fail with an access-revoked error.
    pub fn fail_next_children(&self, message: &str) {
        self.faults().fail_next_children = Some(message.to_string());
    }

    /// Make position queries for `handle` fail until further notice.
    pub fn break_index_for(&self, handle: &NodeHandle) {
        self.faults().broken_index.insert(handle.clone());
    }

    /// Pin the answer of every position query, bypassing computation.
    pub fn force_index(&self, index: Option<i64>) {
        self.faults().forced_index = index;
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn root(&self) -> Result<Node> {
        let root = self.root_handle();
        self.graph()
            .snapshot(&root)
            .ok_or(ViewError::NodeGone(root))
    }

    async fn node(&self, handle: &NodeHandle) -> Result<Option<Node>> {
        Ok(self.graph().snapshot(handle))
    }

    async fn children(&self, folder: &NodeHandle, sort: SortSpec) -> Result<Vec<Node>> {
        let latency = self.faults().fetch_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(message) = self.faults().fail_next_children.take() {
            return Err(ViewError::AccessRevoked(message));
        }
        self.graph()
            .sorted_children(folder, sort)
            .ok_or_else(|| ViewError::NodeGone(folder.clone()))
    }

    async fn index_for(&self, node: &Node, sort: SortSpec) -> Result<i64> {
        {
            let faults = self.faults();
            if let Some(forced) = faults.forced_index {
                return Ok(forced);
            }
            if faults.broken_index.contains(&node.handle) {
                return Err(ViewError::AccessRevoked(format!(
                    "position query refused for {}",
                    node.handle
                )));
            }
        }
        let Some(parent) = node.parent.as_ref() else {
            return Ok(-1);
        };
        let graph = self.graph();
        let Some(siblings) = graph.sorted_children(parent, sort) else {
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
        let graph = self.graph();
        if !graph.children.contains_key(folder) {
            return Err(ViewError::NodeGone(folder.clone()));
        }
        Ok(graph.counts_of(folder))
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent> {
        self.feed.subscribe()
    }
}
