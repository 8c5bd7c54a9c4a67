use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, ViewError};
use crate::node::{NodeHandle, NodeItem};
use crate::store::StoreEvent;

/// Generation stamp of a listing load. Events carrying a stale id are
/// discarded by the view.
pub type LoadId = u64;

/// Everything the view task consumes, in one channel: loader output,
/// store change events and background thumbnail results all get
/// marshalled here so collection mutation stays on a single task.
#[derive(Debug)]
pub enum ViewEvent {
    /// One fetched chunk of the listing.
    LoadBatch { load: LoadId, items: Vec<NodeItem> },
    /// The loader flushed every chunk of this load.
    LoadFinished { load: LoadId },
    /// The listing fetch failed terminally.
    LoadFailed { load: LoadId, message: String },
    /// An out-of-band change from the store feed.
    Store(StoreEvent),
    /// A thumbnail became available for a displayed node.
    Thumbnail { handle: NodeHandle, path: PathBuf },
}

/// The view's event channel: background tasks send, the view task
/// receives.
pub struct Events {
    rx: mpsc::UnboundedReceiver<ViewEvent>,
    tx: mpsc::UnboundedSender<ViewEvent>,
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}

impl Events {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { rx, tx }
    }

    /// A sender clone for loader, feed forwarder and thumbnail tasks.
    pub fn sender(&self) -> mpsc::UnboundedSender<ViewEvent> {
        self.tx.clone()
    }

    /// Receive the next event, waiting until one is available.
    pub async fn next(&mut self) -> Result<ViewEvent> {
        self.rx.recv().await.ok_or(ViewError::ChannelClosed)
    }

    /// Non-blocking receive, for draining a quiet channel.
    #[allow(dead_code)]
    pub fn try_next(&mut self) -> Option<ViewEvent> {
        self.rx.try_recv().ok()
    }
}

/// Marshal a store's change feed into the view channel. The returned
/// task ends when either side closes.
pub fn forward_store_events(
    mut feed: mpsc::UnboundedReceiver<StoreEvent>,
    tx: mpsc::UnboundedSender<ViewEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = feed.recv().await {
            if tx.send(ViewEvent::Store(event)).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeKind, ShareState};

    fn sample_node() -> Node {
        Node {
            handle: NodeHandle::from_bytes(b"n"),
            parent: None,
            name: "n".to_string(),
            kind: NodeKind::File,
            size: 0,
            modified: None,
            share: ShareState::Private,
            counts: None,
        }
    }

    #[tokio::test]
    async fn delivers_in_send_order() {
        let mut events = Events::new();
        let tx = events.sender();
        tx.send(ViewEvent::LoadFinished { load: 1 }).unwrap();
        tx.send(ViewEvent::LoadFailed {
            load: 2,
            message: "boom".into(),
        })
        .unwrap();

        assert!(matches!(
            events.next().await.unwrap(),
            ViewEvent::LoadFinished { load: 1 }
        ));
        assert!(matches!(
            events.next().await.unwrap(),
            ViewEvent::LoadFailed { load: 2, .. }
        ));
        assert!(events.try_next().is_none());
    }

    #[tokio::test]
    async fn forwarder_wraps_store_events() {
        let events = Events::new();
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let task = forward_store_events(feed_rx, events.sender());

        feed_tx
            .send(StoreEvent::Upserted(sample_node()))
            .unwrap();
        drop(feed_tx);

        let mut events = events;
        assert!(matches!(
            events.next().await.unwrap(),
            ViewEvent::Store(StoreEvent::Upserted(_))
        ));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn closed_channel_surfaces_as_error() {
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        drop(dead_tx);
        let (spare_tx, _spare_rx) = mpsc::unbounded_channel();
        let mut events = Events {
            rx: dead_rx,
            tx: spare_tx,
        };
        assert!(matches!(
            events.next().await,
            Err(ViewError::ChannelClosed)
        ));
    }
}
