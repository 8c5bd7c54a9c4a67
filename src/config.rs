//! Application configuration: TOML file loading, CLI overrides, and defaults.
//!
//! Resolution order (first found wins, values merge/override):
//! 1. CLI flags (`--config`, `--grid`, `--sort`, etc.)
//! 2. `$FOLDERVIEW_CONFIG` environment variable (path to config file)
//! 3. Project-local `.folderview.toml` in the current working directory
//! 4. Global `~/.config/folderview/config.toml`
//! 5. Built-in defaults

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::collection::FormFactor;
use crate::loader::ViewMode;
use crate::sort::{SortDirection, SortKey, SortSpec};

// ── Section configs ──────────────────────────────────────────────────────────

/// Listing presentation settings. These are the fallbacks a folder gets
/// before it has remembered preferences of its own.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ViewConfig {
    /// Presentation mode: "list" or "grid".
    pub mode: Option<String>,
    /// Sort order: "name", "size", "modified".
    pub sort_by: Option<String>,
    /// Sort descending instead of ascending.
    pub descending: Option<bool>,
    /// Device class: "desktop", "tablet", "phone".
    pub form_factor: Option<String>,
}

/// Filesystem watcher settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WatcherConfig {
    /// Enable the change watcher for live view patching.
    pub enabled: Option<bool>,
    /// Debounce interval in milliseconds.
    pub debounce_ms: Option<u64>,
    /// Path components (or `*suffix` name patterns) whose changes are
    /// dropped before they reach the view.
    pub ignore: Option<Vec<String>>,
}

/// Thumbnail settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Fetch thumbnails for displayed items.
    pub enabled: Option<bool>,
}

/// Per-folder preference persistence settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PrefsConfig {
    /// Path of the preference file. Defaults to
    /// `~/.config/folderview/prefs.toml`.
    pub path: Option<String>,
}

// ── Top-level config ─────────────────────────────────────────────────────────

/// Top-level application configuration.
///
/// All fields are optional so that partial configs from different sources
/// can be merged together (CLI overrides file, file overrides defaults).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub view: ViewConfig,
    pub watcher: WatcherConfig,
    pub thumbnails: ThumbnailConfig,
    pub prefs: PrefsConfig,
}

// ── Default constants ────────────────────────────────────────────────────────

/// Default debounce interval in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

// ── Config file locator ──────────────────────────────────────────────────────

/// Return the list of candidate config file paths in priority order.
///
/// Does not include the CLI `--config` path, which is handled separately.
fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. $FOLDERVIEW_CONFIG environment variable
    if let Ok(env_path) = std::env::var("FOLDERVIEW_CONFIG") {
        paths.push(PathBuf::from(env_path));
    }

    // 2. Project-local `.folderview.toml` in CWD
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".folderview.toml"));
    }

    // 3. Global `~/.config/folderview/config.toml`
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("folderview").join("config.toml"));
    }

    paths
}

/// Try to read and parse a TOML config file. Returns `None` if the file
/// doesn't exist or can't be parsed (with a logged warning).
fn load_file(path: &Path) -> Option<AppConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return None,
    };
    match toml::from_str::<AppConfig>(&content) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse config file");
            None
        }
    }
}

// ── Merge logic ──────────────────────────────────────────────────────────────

impl AppConfig {
    /// Merge `other` on top of `self`; `other`'s `Some` values win.
    pub fn merge(self, other: &AppConfig) -> AppConfig {
        AppConfig {
            view: ViewConfig {
                mode: other.view.mode.clone().or(self.view.mode),
                sort_by: other.view.sort_by.clone().or(self.view.sort_by),
                descending: other.view.descending.or(self.view.descending),
                form_factor: other.view.form_factor.clone().or(self.view.form_factor),
            },
            watcher: WatcherConfig {
                enabled: other.watcher.enabled.or(self.watcher.enabled),
                debounce_ms: other.watcher.debounce_ms.or(self.watcher.debounce_ms),
                ignore: other.watcher.ignore.clone().or(self.watcher.ignore),
            },
            thumbnails: ThumbnailConfig {
                enabled: other.thumbnails.enabled.or(self.thumbnails.enabled),
            },
            prefs: PrefsConfig {
                path: other.prefs.path.clone().or(self.prefs.path),
            },
        }
    }

    /// Load the final merged configuration.
    ///
    /// `cli_config_path` is an explicit config file path from `--config`.
    /// `cli_overrides` are partial overrides derived from CLI flags.
    pub fn load(cli_config_path: Option<&Path>, cli_overrides: Option<&AppConfig>) -> AppConfig {
        let mut config = AppConfig::default();

        // Candidate files are listed highest priority first; walk them in
        // reverse so later merges win.
        let paths = candidate_paths();
        for path in paths.iter().rev() {
            if let Some(file_cfg) = load_file(path) {
                config = config.merge(&file_cfg);
            }
        }

        // Explicit --config file has higher priority than candidates.
        if let Some(cli_path) = cli_config_path {
            if let Some(file_cfg) = load_file(cli_path) {
                config = config.merge(&file_cfg);
            }
        }

        // CLI flag overrides are highest priority.
        if let Some(overrides) = cli_overrides {
            config = config.merge(overrides);
        }

        config
    }

    // ── Convenience getters with built-in defaults ──────────────────────────

    /// Presentation mode for folders without a remembered preference.
    pub fn view_mode(&self) -> ViewMode {
        self.view
            .mode
            .as_deref()
            .map(ViewMode::from_str)
            .unwrap_or(ViewMode::List)
    }

    /// Sort spec for folders without a remembered preference.
    pub fn sort_spec(&self) -> SortSpec {
        let key = self
            .view
            .sort_by
            .as_deref()
            .map(SortKey::from_str)
            .unwrap_or(SortKey::Name);
        let direction = if self.view.descending.unwrap_or(false) {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        };
        SortSpec::new(key, direction)
    }

    /// Device class the selection rules adapt to.
    pub fn form_factor(&self) -> FormFactor {
        self.view
            .form_factor
            .as_deref()
            .map(FormFactor::from_str)
            .unwrap_or(FormFactor::Desktop)
    }

    /// Whether the change watcher is enabled.
    pub fn watcher_enabled(&self) -> bool {
        self.watcher.enabled.unwrap_or(true)
    }

    /// Watcher debounce interval in milliseconds.
    pub fn debounce_ms(&self) -> u64 {
        self.watcher.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)
    }

    /// Whether thumbnails are fetched for displayed items.
    pub fn thumbnails_enabled(&self) -> bool {
        self.thumbnails.enabled.unwrap_or(true)
    }

    /// Explicit preference file path, if one is configured.
    pub fn prefs_path(&self) -> Option<PathBuf> {
        self.prefs.path.as_ref().map(PathBuf::from)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
