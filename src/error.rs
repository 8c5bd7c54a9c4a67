use thiserror::Error;

use crate::node::NodeHandle;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, ViewError>;

/// Errors surfaced by stores, loaders and the view.
#[derive(Debug, Error)]
pub enum ViewError {
    /// I/O errors from filesystem-backed stores.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the filesystem change watcher.
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// A handle that does not resolve to a live node.
    #[error("Unknown node: {0}")]
    NodeGone(NodeHandle),

    /// A handle string that cannot be decoded.
    #[error("Invalid handle: {0}")]
    BadHandle(String),

    /// The store rejected the request because access was revoked.
    #[error("Access revoked: {0}")]
    AccessRevoked(String),

    /// The view event channel closed while a receiver was waiting.
    #[error("Event channel closed")]
    ChannelClosed,
}
