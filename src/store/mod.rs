pub mod local;
pub mod memory;

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::node::{ChildCounts, Node, NodeHandle};
use crate::sort::SortSpec;

/// Out-of-band change reported by a store after the initial listing.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A node appeared or changed; carries the node with its current
    /// parent, so a move shows up as an upsert under the new parent.
    Upserted(Node),
    /// A node is gone. Live data no longer exists, only the handle and
    /// the last-known parent survive.
    Removed {
        handle: NodeHandle,
        parent: Option<NodeHandle>,
    },
    /// Only the sharing state of a node changed.
    ShareChanged(Node),
}

/// Backend answering folder queries and publishing a change feed.
///
/// Implementations must be cheap to query repeatedly: the view asks for
/// single-node positions and child counts while patching live events.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// The top folder of the store.
    async fn root(&self) -> Result<Node>;

    /// Resolve a handle; `Ok(None)` when the node does not exist.
    async fn node(&self, handle: &NodeHandle) -> Result<Option<Node>>;

    /// Direct children of a folder, ordered by `sort`, in one call.
    async fn children(&self, folder: &NodeHandle, sort: SortSpec) -> Result<Vec<Node>>;

    /// Position `node` would occupy among its current siblings under
    /// `sort`. Negative when the store cannot answer.
    async fn index_for(&self, node: &Node, sort: SortSpec) -> Result<i64>;

    /// Folder and file counts among a folder's direct children.
    async fn child_counts(&self, folder: &NodeHandle) -> Result<ChildCounts>;

    /// Subscribe to the change feed. Every subscriber sees every event
    /// published from subscription time on.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent>;
}

/// Fan-out plumbing shared by store implementations: every subscriber
/// gets its own unbounded channel, closed subscribers are pruned on the
/// next publish.
#[derive(Default)]
pub struct ChangeFeed {
    senders: Mutex<Vec<mpsc::UnboundedSender<StoreEvent>>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    pub fn publish(&self, event: &StoreEvent) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}
