use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::node::Node;

/// Sort key options for folder listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Name,
    Size,
    Modified,
}

impl SortKey {
    /// Parse a sort key from a config/CLI string, defaulting to Name.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "size" => SortKey::Size,
            "modified" | "mtime" | "date" => SortKey::Modified,
            _ => SortKey::Name,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Size => "size",
            SortKey::Modified => "modified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn inverted(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortDirection::Ascending => "ascending",
            SortDirection::Descending => "descending",
        }
    }
}

/// A complete listing order: key plus direction.
///
/// Containers always come before files; the direction applies to the
/// keyed comparison within each group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            key: SortKey::Name,
            direction: SortDirection::Ascending,
        }
    }
}

impl SortSpec {
    pub fn new(key: SortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }

    #[allow(dead_code)]
    pub fn inverted(self) -> Self {
        Self {
            key: self.key,
            direction: self.direction.inverted(),
        }
    }

    /// Total order over sibling nodes. Ties fall back to
    /// case-insensitive name, then handle, so the result is
    /// deterministic for any input.
    pub fn compare(&self, a: &Node, b: &Node) -> Ordering {
        let container_rank = b.kind.is_container().cmp(&a.kind.is_container());
        let keyed = match self.key {
            SortKey::Name => compare_names(a, b),
            SortKey::Size => a.size.cmp(&b.size),
            SortKey::Modified => a.modified.cmp(&b.modified),
        };
        let keyed = match self.direction {
            SortDirection::Ascending => keyed,
            SortDirection::Descending => keyed.reverse(),
        };
        container_rank
            .then(keyed)
            .then_with(|| compare_names(a, b))
            .then_with(|| a.handle.cmp(&b.handle))
    }

    pub fn sort(&self, nodes: &mut [Node]) {
        nodes.sort_by(|a, b| self.compare(a, b));
    }
}

fn compare_names(a: &Node, b: &Node) -> Ordering {
    a.name.to_lowercase().cmp(&b.name.to_lowercase())
}
