mod collection;
mod config;
mod error;
mod event;
mod loader;
mod node;
mod prefs;
mod router;
mod sort;
mod store;
mod thumbs;
mod view;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::time::sleep;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, ViewConfig, WatcherConfig};
use crate::event::{forward_store_events, Events};
use crate::node::{NodeItem, ShareState};
use crate::prefs::{MemoryPrefs, PrefsFile, ViewPrefs};
use crate::store::local::{LocalStore, MediaThumbs};
use crate::store::memory::MemoryStore;
use crate::store::NodeStore;
use crate::view::{FolderView, ViewState};

/// A live, incrementally loaded folder view for large directories.
#[derive(Parser, Debug)]
#[command(name = "fview", version, about)]
struct Cli {
    /// Root path to display (defaults to current directory)
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Start in grid mode
    #[arg(long)]
    grid: bool,

    /// Sort key: name, size, modified
    #[arg(long)]
    sort: Option<String>,

    /// Sort descending
    #[arg(long)]
    desc: bool,

    /// Keep running and reprint the view as changes arrive
    #[arg(long)]
    follow: bool,

    /// Disable the filesystem watcher
    #[arg(long)]
    no_watch: bool,

    /// Browse a built-in demo drive instead of the filesystem
    #[arg(long)]
    demo: bool,

    /// Explicit config file path
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> error::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let overrides = cli_overrides(&cli);
    let config = AppConfig::load(cli.config.as_deref(), Some(&overrides));

    let mut events = Events::new();

    if cli.demo {
        let store = Arc::new(demo_store()?);
        forward_store_events(store.subscribe(), events.sender());
        let prefs: Arc<dyn ViewPrefs> = Arc::new(MemoryPrefs::new());
        let view = FolderView::new(store.clone(), prefs, &events, config.form_factor())
            .with_defaults(config.sort_spec(), config.view_mode());
        if cli.follow {
            spawn_demo_script(store.clone());
        }
        return run(view, store, &mut events, cli.follow).await;
    }

    let root = cli.path.canonicalize().map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", cli.path.display()),
        )
    })?;

    let mut local = LocalStore::new(&root)?;
    if let Some(patterns) = config.watcher.ignore.clone() {
        local = local.with_ignore_patterns(patterns);
    }
    let local = Arc::new(local);

    // Start the watcher unless disabled; the view still works without
    // it, just without live updates.
    if config.watcher_enabled() {
        if let Err(e) = local.watch(Duration::from_millis(config.debounce_ms())) {
            warn!(error = %e, "watcher unavailable, live updates disabled");
        }
    }

    forward_store_events(local.subscribe(), events.sender());

    let prefs: Arc<dyn ViewPrefs> = match config.prefs_path().or_else(PrefsFile::default_path) {
        Some(path) => {
            let file = PrefsFile::open(path);
            debug!(path = %file.path().display(), "folder preferences file");
            Arc::new(file)
        }
        None => Arc::new(MemoryPrefs::new()),
    };

    let mut view = FolderView::new(local.clone(), prefs, &events, config.form_factor())
        .with_defaults(config.sort_spec(), config.view_mode());
    if config.thumbnails_enabled() {
        view = view.with_thumbnails(Arc::new(MediaThumbs::new(root)));
    }

    run(view, local, &mut events, cli.follow).await
}

/// Drive the view until its load settles, then either exit with one
/// printed listing or keep reprinting as live changes land.
async fn run<S: NodeStore + ?Sized>(
    mut view: FolderView,
    store: Arc<S>,
    events: &mut Events,
    follow: bool,
) -> error::Result<()> {
    let dirty = Arc::new(AtomicBool::new(false));
    let flag = dirty.clone();
    view.items_mut()
        .subscribe(Box::new(move |_| flag.store(true, Ordering::Relaxed)));

    let root = store.root().await?;
    view.navigate(&root.handle).await;
    if !view.loading() {
        print_view(&view);
        if !follow {
            return Ok(());
        }
    }

    loop {
        tokio::select! {
            event = events.next() => {
                view.handle_event(event?).await;
                if view.loading() {
                    continue;
                }
                if dirty.swap(false, Ordering::Relaxed) {
                    print_view(&view);
                    if !follow {
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn cli_overrides(cli: &Cli) -> AppConfig {
    AppConfig {
        view: ViewConfig {
            mode: cli.grid.then(|| "grid".to_string()),
            sort_by: cli.sort.clone(),
            descending: cli.desc.then_some(true),
            ..Default::default()
        },
        watcher: WatcherConfig {
            enabled: cli.no_watch.then_some(false),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn print_view(view: &FolderView) {
    let trail: Vec<String> = view.crumbs().iter().map(|c| c.name.clone()).collect();
    println!();
    println!(
        "{}  [{} {}, {} view]",
        trail.join(" / "),
        view.sort().key.label(),
        view.sort().direction.label(),
        view.mode().label()
    );
    if let Some(summary) = view.folder_summary() {
        println!("{summary}");
    }
    match view.state() {
        ViewState::Failed(message) => println!("error: {message}"),
        ViewState::Empty => {}
        _ => {
            for item in view.items().items() {
                println!("{}", render_item(item));
            }
        }
    }
}

fn render_item(item: &NodeItem) -> String {
    let node = &item.node;
    let marker = if node.kind.is_container() { 'd' } else { '-' };
    let share = match node.share {
        ShareState::Private => ' ',
        ShareState::OutShare => '<',
        ShareState::InShare => '>',
    };
    let detail = match item.summary() {
        Some(summary) => summary,
        None => format_size(node.size),
    };
    let name = &node.name;
    let thumb = if item.thumbnail.is_some() { "  [thumb]" } else { "" };
    format!("{marker}{share} {name:<32} {detail:>18}{thumb}")
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    const TB: u64 = 1024 * GB;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ── demo drive ───────────────────────────────────────────────────────

fn demo_store() -> error::Result<MemoryStore> {
    let store = MemoryStore::new();
    let root = store.root_handle();
    let docs = store.add_folder(&root, "Documents")?;
    let photos = store.add_folder(&root, "Photos")?;
    store.add_folder(&root, "Archive")?;
    store.add_file(&docs, "report.pdf", 1_482_113)?;
    store.add_file(&docs, "notes.txt", 2_048)?;
    store.add_file(&photos, "beach.png", 3_145_728)?;
    store.add_file(&photos, "sunset.png", 2_621_440)?;
    store.add_file(&root, "todo.md", 512)?;
    store.set_share(&photos, ShareState::OutShare)?;
    Ok(store)
}

fn spawn_demo_script(store: Arc<MemoryStore>) {
    tokio::spawn(async move {
        if let Err(e) = demo_script(&store).await {
            warn!(error = %e, "demo script stopped");
        }
    });
}

/// Mutate the demo drive on a timer so `--demo --follow` shows the
/// view being patched in place.
async fn demo_script(store: &MemoryStore) -> error::Result<()> {
    let root = store.root_handle();
    let pause = Duration::from_secs(2);

    sleep(pause).await;
    let incoming = store.add_file(&root, "incoming.bin", 9_437_184)?;
    sleep(pause).await;
    store.set_size(&incoming, 26_214_400)?;
    sleep(pause).await;
    store.rename(&incoming, "dataset.bin")?;
    sleep(pause).await;
    let vault = store.add_folder(&root, "Vault")?;
    sleep(pause).await;
    store.move_node(&incoming, &vault)?;
    sleep(pause).await;
    store.set_share(&vault, ShareState::OutShare)?;
    sleep(pause).await;
    store.remove(&vault)?;
    Ok(())
}
