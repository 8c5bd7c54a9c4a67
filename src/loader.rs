use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::event::{LoadId, ViewEvent};
use crate::node::{NodeHandle, NodeItem};
use crate::sort::SortSpec;
use crate::store::NodeStore;

/// First chunk of a list-mode load, sized to fill a viewport.
pub const LIST_VIEWPORT_BATCH: usize = 256;
/// Follow-up chunk size in list mode.
pub const LIST_FOLLOWUP_BATCH: usize = 1024;
/// First chunk of a grid-mode load. Grid cells are heavier to realize,
/// so the batches are smaller.
pub const GRID_VIEWPORT_BATCH: usize = 128;
/// Follow-up chunk size in grid mode.
pub const GRID_FOLLOWUP_BATCH: usize = 512;

/// Presentation mode of the folder view. Decides chunk sizing during
/// loads and is persisted per folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    List,
    Grid,
}

impl ViewMode {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "grid" => ViewMode::Grid,
            _ => ViewMode::List,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ViewMode::List => "list",
            ViewMode::Grid => "grid",
        }
    }

    pub fn viewport_batch(self) -> usize {
        match self {
            ViewMode::List => LIST_VIEWPORT_BATCH,
            ViewMode::Grid => GRID_VIEWPORT_BATCH,
        }
    }

    pub fn followup_batch(self) -> usize {
        match self {
            ViewMode::List => LIST_FOLLOWUP_BATCH,
            ViewMode::Grid => GRID_FOLLOWUP_BATCH,
        }
    }
}

/// What to list: a folder and the order to fetch it in.
#[derive(Debug, Clone)]
pub struct ListingRequest {
    pub folder: NodeHandle,
    pub sort: SortSpec,
}

struct LoadTicket {
    id: LoadId,
    cancel: Arc<AtomicBool>,
}

/// Runs listing loads one at a time, last request wins.
///
/// Each load fetches the full child list in one store call, then
/// flushes it to the view channel in chunks: a small viewport batch
/// first so something is visible immediately, larger batches after.
/// Starting a new load flips the previous load's cancellation flag;
/// the flag is checked before every chunk, and batches additionally
/// carry the load id so anything already in flight when the flag
/// flipped is discarded by the receiver.
pub struct NodeListLoader {
    store: Arc<dyn NodeStore>,
    events: mpsc::UnboundedSender<ViewEvent>,
    seq: LoadId,
    current: Option<LoadTicket>,
}

impl NodeListLoader {
    pub fn new(store: Arc<dyn NodeStore>, events: mpsc::UnboundedSender<ViewEvent>) -> Self {
        Self {
            store,
            events,
            seq: 0,
            current: None,
        }
    }

    /// Cancel any in-flight load and start a fresh one. Returns the
    /// generation id stamped on every event of the new load.
    pub fn start(&mut self, request: ListingRequest, mode: ViewMode) -> LoadId {
        self.cancel_current();
        self.seq += 1;
        let id = self.seq;
        let cancel = Arc::new(AtomicBool::new(false));
        self.current = Some(LoadTicket {
            id,
            cancel: cancel.clone(),
        });
        let store = self.store.clone();
        let tx = self.events.clone();
        debug!(load = id, folder = %request.folder, "starting listing load");
        tokio::spawn(run(store, tx, request, mode, id, cancel));
        id
    }

    /// Flip the cancellation flag of the in-flight load, if any. The
    /// collection keeps whatever had been flushed so far; no error is
    /// reported.
    pub fn cancel_current(&mut self) {
        if let Some(ticket) = self.current.take() {
            ticket.cancel.store(true, Ordering::Relaxed);
            debug!(load = ticket.id, "cancelled load");
        }
    }

    /// Generation id of the load currently in flight.
    #[allow(dead_code)]
    pub fn active(&self) -> Option<LoadId> {
        self.current.as_ref().map(|t| t.id)
    }
}

async fn run(
    store: Arc<dyn NodeStore>,
    tx: mpsc::UnboundedSender<ViewEvent>,
    request: ListingRequest,
    mode: ViewMode,
    load: LoadId,
    cancel: Arc<AtomicBool>,
) {
    let children = match store.children(&request.folder, request.sort).await {
        Ok(children) => children,
        Err(e) => {
            if !cancel.load(Ordering::Relaxed) {
                let _ = tx.send(ViewEvent::LoadFailed {
                    load,
                    message: e.to_string(),
                });
            }
            return;
        }
    };
    debug!(load, count = children.len(), "listing fetched");
    let mut rest: Vec<NodeItem> = children.into_iter().map(NodeItem::new).collect();
    let mut batch_size = mode.viewport_batch();
    while !rest.is_empty() {
        if cancel.load(Ordering::Relaxed) {
            debug!(load, "load cancelled mid-flush");
            return;
        }
        let take = batch_size.min(rest.len());
        let tail = rest.split_off(take);
        let batch = std::mem::replace(&mut rest, tail);
        if tx
            .send(ViewEvent::LoadBatch { load, items: batch })
            .is_err()
        {
            return;
        }
        batch_size = mode.followup_batch();
        // Let the view task drain between chunks.
        tokio::task::yield_now().await;
    }
    if cancel.load(Ordering::Relaxed) {
        return;
    }
    let _ = tx.send(ViewEvent::LoadFinished { load });
}
