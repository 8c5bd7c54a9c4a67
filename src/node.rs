use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::collection::Keyed;
use crate::error::{Result, ViewError};

/// Opaque node identity, rendered as unpadded URL-safe base64.
///
/// Handles are minted by a store from whatever it uses as raw identity
/// (an id counter, a relative path) and stay stable across renames and
/// moves wherever the backing store can manage that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(String);

impl NodeHandle {
    /// Mint a handle from raw identity bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap an already-encoded handle string.
    #[allow(dead_code)]
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    #[allow(dead_code)]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the raw identity bytes behind the handle.
    pub fn decode(&self) -> Result<Vec<u8>> {
        URL_SAFE_NO_PAD
            .decode(&self.0)
            .map_err(|_| ViewError::BadHandle(self.0.clone()))
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a node is, as far as the view cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
    Root,
    /// Rubbish-bin root of a cloud store.
    #[allow(dead_code)]
    Trash,
    Unknown,
}

impl NodeKind {
    /// Containers can be navigated into and carry child counts.
    pub fn is_container(self) -> bool {
        matches!(self, NodeKind::Folder | NodeKind::Root | NodeKind::Trash)
    }
}

/// Sharing state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShareState {
    #[default]
    Private,
    /// Shared out to someone else.
    OutShare,
    /// Shared in from someone else.
    #[allow(dead_code)]
    InShare,
}

/// Direct-child counts of a container node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChildCounts {
    pub folders: usize,
    pub files: usize,
}

impl ChildCounts {
    pub fn new(folders: usize, files: usize) -> Self {
        Self { folders, files }
    }

    pub fn total(self) -> usize {
        self.folders + self.files
    }

    /// Human-readable summary, e.g. `1 folder, 3 files`.
    pub fn summary(self) -> String {
        if self.total() == 0 {
            return "Empty".to_string();
        }
        let folders = match self.folders {
            1 => "1 folder".to_string(),
            n => format!("{n} folders"),
        };
        let files = match self.files {
            1 => "1 file".to_string(),
            n => format!("{n} files"),
        };
        match (self.folders, self.files) {
            (_, 0) => folders,
            (0, _) => files,
            _ => format!("{folders}, {files}"),
        }
    }
}

/// A node as reported by a store.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub handle: NodeHandle,
    /// Parent folder handle; `None` for the top of the store.
    pub parent: Option<NodeHandle>,
    pub name: String,
    pub kind: NodeKind,
    /// Payload size in bytes; zero for containers.
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub share: ShareState,
    /// Direct-child counts, populated by stores for containers.
    pub counts: Option<ChildCounts>,
}

impl Node {
    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }

    /// Stable key used to remember per-folder view preferences.
    pub fn pref_key(&self) -> String {
        format!("{}:{}", self.handle, self.name)
    }
}

/// A node decorated for display: child-count summary plus an optional
/// thumbnail produced in the background.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeItem {
    pub node: Node,
    pub thumbnail: Option<PathBuf>,
}

impl NodeItem {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            thumbnail: None,
        }
    }

    /// Replace the displayed node data, keeping any thumbnail already
    /// fetched for the same content.
    pub fn update_from(&mut self, node: Node) {
        self.node = node;
    }

    pub fn set_counts(&mut self, counts: ChildCounts) {
        self.node.counts = Some(counts);
    }

    /// Child-count summary for containers, `None` for files.
    pub fn summary(&self) -> Option<String> {
        if !self.node.is_container() {
            return None;
        }
        Some(self.node.counts.unwrap_or_default().summary())
    }
}

impl Keyed for NodeItem {
    type Key = NodeHandle;

    fn key(&self) -> NodeHandle {
        self.node.handle.clone()
    }
}
