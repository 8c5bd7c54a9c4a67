//! Best-effort thumbnail population for displayed nodes.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;
use crate::event::ViewEvent;
use crate::node::Node;

/// Source of thumbnail images for displayed nodes.
///
/// `Ok(None)` means the node has no thumbnail; callers treat errors the
/// same way. A missing thumbnail never degrades the listing.
#[async_trait]
pub trait ThumbnailSource: Send + Sync {
    async fn thumbnail(&self, node: &Node) -> Result<Option<PathBuf>>;
}

const IMAGE_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "heic", "tif", "tiff",
];

/// Extension check shared by sources that only thumb image files.
pub fn is_image_name(name: &str) -> bool {
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty() && IMAGE_EXTS.iter().any(|e| ext.eq_ignore_ascii_case(e))
}

/// Fire one background fetch for a freshly displayed node. The result
/// is marshalled back to the view channel; failures are logged and
/// swallowed.
pub fn spawn_fetch(
    source: Arc<dyn ThumbnailSource>,
    node: Node,
    tx: mpsc::UnboundedSender<ViewEvent>,
) {
    tokio::spawn(async move {
        match source.thumbnail(&node).await {
            Ok(Some(path)) => {
                let _ = tx.send(ViewEvent::Thumbnail {
                    handle: node.handle,
                    path,
                });
            }
            Ok(None) => {}
            Err(e) => debug!(node = %node.handle, error = %e, "thumbnail fetch failed"),
        }
    });
}
