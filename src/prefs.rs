//! Per-folder view preferences: sort order and view mode, remembered
//! across visits and written through to a TOML file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::loader::ViewMode;
use crate::sort::SortSpec;

/// Remembered presentation settings, keyed by folder identity
/// (`handle:name`, see [`Node::pref_key`]).
///
/// [`Node::pref_key`]: crate::node::Node::pref_key
pub trait ViewPrefs: Send + Sync {
    fn sort_for(&self, folder_key: &str) -> Option<SortSpec>;
    fn set_sort(&self, folder_key: &str, sort: SortSpec);
    fn mode_for(&self, folder_key: &str) -> Option<ViewMode>;
    fn set_mode(&self, folder_key: &str, mode: ViewMode);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct FolderPrefs {
    #[serde(skip_serializing_if = "Option::is_none")]
    sort: Option<SortSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<ViewMode>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct PrefsTable {
    folders: HashMap<String, FolderPrefs>,
}

/// TOML-backed preference store.
///
/// The file is read once at open. Every change rewrites it; a failed
/// write is logged and the in-memory table stays authoritative for the
/// rest of the session.
pub struct PrefsFile {
    path: PathBuf,
    table: Mutex<PrefsTable>,
}

impl PrefsFile {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let table = load_table(&path);
        Self {
            path,
            table: Mutex::new(table),
        }
    }

    /// `<config dir>/folderview/prefs.toml`, when a config dir exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("folderview").join("prefs.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, PrefsTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_entry(&self, folder_key: &str, apply: impl FnOnce(&mut FolderPrefs)) {
        let mut table = self.guard();
        apply(table.folders.entry(folder_key.to_string()).or_default());
        persist(&self.path, &table);
    }
}

impl ViewPrefs for PrefsFile {
    fn sort_for(&self, folder_key: &str) -> Option<SortSpec> {
        self.guard().folders.get(folder_key).and_then(|p| p.sort)
    }

    fn set_sort(&self, folder_key: &str, sort: SortSpec) {
        self.with_entry(folder_key, |prefs| prefs.sort = Some(sort));
    }

    fn mode_for(&self, folder_key: &str) -> Option<ViewMode> {
        self.guard().folders.get(folder_key).and_then(|p| p.mode)
    }

    fn set_mode(&self, folder_key: &str, mode: ViewMode) {
        self.with_entry(folder_key, |prefs| prefs.mode = Some(mode));
    }
}

fn load_table(path: &Path) -> PrefsTable {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return PrefsTable::default(),
    };
    match toml::from_str(&content) {
        Ok(table) => table,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unparsable preferences file");
            PrefsTable::default()
        }
    }
}

fn persist(path: &Path, table: &PrefsTable) {
    let rendered = match toml::to_string_pretty(table) {
        Ok(rendered) => rendered,
        Err(e) => {
            warn!(error = %e, "failed to render preferences");
            return;
        }
    };
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %parent.display(), error = %e, "failed to create preferences directory");
            return;
        }
    }
    if let Err(e) = std::fs::write(path, rendered) {
        warn!(path = %path.display(), error = %e, "failed to write preferences");
    }
}

/// Ephemeral preference store for tests and prefs-less sessions.
#[derive(Default)]
pub struct MemoryPrefs {
    table: Mutex<PrefsTable>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, PrefsTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ViewPrefs for MemoryPrefs {
    fn sort_for(&self, folder_key: &str) -> Option<SortSpec> {
        self.guard().folders.get(folder_key).and_then(|p| p.sort)
    }

    fn set_sort(&self, folder_key: &str, sort: SortSpec) {
        self.guard()
            .folders
            .entry(folder_key.to_string())
            .or_default()
            .sort = Some(sort);
    }

    fn mode_for(&self, folder_key: &str) -> Option<ViewMode> {
        self.guard().folders.get(folder_key).and_then(|p| p.mode)
    }

    fn set_mode(&self, folder_key: &str, mode: ViewMode) {
        self.guard()
            .folders
            .entry(folder_key.to_string())
            .or_default()
            .mode = Some(mode);
    }
}
