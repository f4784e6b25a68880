//! MarketDeck CLI: drive the sync engine from a terminal.
//!
//! Commands:
//! - `sync`: bootstrap window 1, then run progressive ticks
//! - `window`: load one window (cache-first) and print it
//! - `search`: search the whole upstream dataset
//! - `rank`: jump to the item at a given rank
//! - `config show|export|import|pull|push`: user configuration
//! - `cache status|clear`: inspect or purge the window cache

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use marketdeck_core::data::{
    CoinGeckoProvider, FileStore, KvStore, MarketProvider, PersistentCache, RankedItem,
};
use marketdeck_core::SystemClock;
use marketdeck_sync::{
    EngineSettings, NoRemote, RemoteConfigStore, RestConfigStore, SyncEngine, TickOutcome,
    ViewQuery,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "marketdeck",
    about = "MarketDeck: cached, progressively synced market rankings"
)]
struct Cli {
    /// Data directory for the cache and local config. Defaults to the
    /// platform data dir (e.g. ~/.local/share/marketdeck).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Engine settings TOML file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine and run progressive ticks at the configured interval.
    Sync {
        /// Number of progressive ticks after the bootstrap window.
        #[arg(long, default_value_t = 1)]
        ticks: usize,
    },
    /// Load one window (cache-first) and print its items.
    Window {
        /// 1-based window index.
        index: u32,

        /// Maximum rows to print.
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// Search the whole dataset by name or symbol.
    Search { query: String },
    /// Show the item at a rank, loading its window if needed.
    Rank { rank: u32 },
    /// User configuration commands.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Window cache commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current config and replication status.
    Show,
    /// Write the config as JSON.
    Export { file: PathBuf },
    /// Import a JSON export (list-based or legacy favorites).
    Import { file: PathBuf },
    /// Fetch the remote row and merge it (newest wins).
    Pull,
    /// Upload the local config now.
    Push,
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached windows with their age and item count.
    Status,
    /// Delete every cached window.
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let settings = match &cli.config {
        Some(path) => EngineSettings::from_file(path)?,
        None => EngineSettings::default(),
    };

    match cli.command {
        Commands::Sync { ticks } => run_sync(settings, &data_dir, ticks),
        Commands::Window { index, limit } => run_window(settings, &data_dir, index, limit),
        Commands::Search { query } => run_search(settings, &data_dir, &query),
        Commands::Rank { rank } => run_rank(settings, &data_dir, rank),
        Commands::Config { action } => run_config(settings, &data_dir, action),
        Commands::Cache { action } => run_cache(&data_dir, action),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "marketdeck=debug"
    } else {
        "marketdeck=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn default_data_dir() -> Result<PathBuf> {
    match dirs::data_dir() {
        Some(dir) => Ok(dir.join("marketdeck")),
        None => bail!("no platform data directory; pass --data-dir"),
    }
}

fn open_store(data_dir: &Path) -> Result<Arc<FileStore>> {
    debug!(data_dir = %data_dir.display(), "opening local store");
    let store = FileStore::open(data_dir)
        .with_context(|| format!("open data directory {}", data_dir.display()))?;
    Ok(Arc::new(store))
}

fn build_engine(settings: EngineSettings, data_dir: &Path) -> Result<SyncEngine> {
    let store: Arc<dyn KvStore> = open_store(data_dir)?;
    let provider: Arc<dyn MarketProvider> =
        Arc::new(CoinGeckoProvider::new(settings.upstream.config()));
    let remote: Arc<dyn RemoteConfigStore> = match &settings.remote {
        Some(r) => Arc::new(RestConfigStore::new(&r.url, r.api_key.clone(), &r.table)),
        None => Arc::new(NoRemote),
    };
    Ok(SyncEngine::new(
        settings,
        provider,
        store,
        remote,
        Arc::new(SystemClock),
    )?)
}

fn run_sync(settings: EngineSettings, data_dir: &Path, ticks: usize) -> Result<()> {
    let mut engine = build_engine(settings, data_dir)?;

    let report = engine.start();
    print_tick("bootstrap", &report.bootstrap);
    if let Err(e) = &report.pull {
        println!("config pull: {e}");
    }

    for (i, outcome) in engine.run_ticks(ticks).iter().enumerate() {
        print_tick(&format!("tick {}", i + 1), outcome);
    }

    if let Some(Err(e)) = engine.stop() {
        println!("config push: {e}");
    }

    let set = engine.working_set();
    println!();
    println!("Working set: {} items", set.len());
    println!(
        "Windows loaded: {:?}",
        engine.controller().loaded_windows().iter().collect::<Vec<_>>()
    );
    println!("Config sync: {:?}", engine.sync_status());
    Ok(())
}

fn print_tick(label: &str, outcome: &TickOutcome) {
    match outcome {
        TickOutcome::Loaded {
            window_index,
            items,
            source,
        } => println!("{label}: window {window_index} → {items} items ({source:?})"),
        other => println!("{label}: {other:?}"),
    }
}

fn run_window(settings: EngineSettings, data_dir: &Path, index: u32, limit: usize) -> Result<()> {
    if index == 0 {
        bail!("window indices start at 1");
    }
    let mut engine = build_engine(settings, data_dir)?;
    let load = engine.load_window(index);

    println!(
        "Window {index}: {} items from {:?}",
        load.items.len(),
        load.source
    );
    if load.is_degraded() {
        let cause = load
            .failure
            .map(|k| k.to_string())
            .unwrap_or_else(|| "unknown".into());
        println!("Degraded: upstream failed ({cause})");
    }
    if let Some(at) = load.fetched_at {
        println!("Fetched at: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!();
    print_items(&engine.visible_items(&ViewQuery::default()), limit);
    Ok(())
}

fn run_search(settings: EngineSettings, data_dir: &Path, query: &str) -> Result<()> {
    let mut engine = build_engine(settings, data_dir)?;
    let results = engine.search(query)?;
    engine.leave_search();

    if results.is_empty() {
        println!("No results for \"{query}\"");
        return Ok(());
    }
    let config = engine.config();
    let visible: Vec<RankedItem> = results
        .into_iter()
        .filter(|item| !config.hidden_ids.contains(&item.id))
        .collect();
    print_items(&visible, visible.len());
    Ok(())
}

fn run_rank(settings: EngineSettings, data_dir: &Path, rank: u32) -> Result<()> {
    let mut engine = build_engine(settings, data_dir)?;
    match engine.jump_to_rank(rank) {
        Some(item) => {
            print_items(std::slice::from_ref(&item), 1);
            Ok(())
        }
        None => bail!("no item at rank {rank}"),
    }
}

fn print_items(items: &[RankedItem], limit: usize) {
    println!(
        "{:>6}  {:<10} {:<28} {:>16} {:>9}",
        "Rank", "Symbol", "Name", "Price", "24h %"
    );
    println!("{}", "-".repeat(73));
    for item in items.iter().take(limit) {
        let price = item
            .metric("current_price")
            .map(|p| format!("{p:.4}"))
            .unwrap_or_else(|| "-".into());
        let change = item
            .metric("price_change_percentage_24h")
            .map(|c| format!("{c:+.2}"))
            .unwrap_or_else(|| "-".into());
        let rank = if item.is_ranked() {
            item.rank.to_string()
        } else {
            "-".into()
        };
        println!(
            "{:>6}  {:<10} {:<28} {:>16} {:>9}",
            rank,
            item.symbol.to_uppercase(),
            truncate(&item.name, 28),
            price,
            change
        );
    }
    if items.len() > limit {
        println!("... {} more", items.len() - limit);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

fn run_config(settings: EngineSettings, data_dir: &Path, action: ConfigAction) -> Result<()> {
    let mut engine = build_engine(settings, data_dir)?;

    match action {
        ConfigAction::Show => {
            println!("{}", engine.config().export_json()?);
            println!();
            println!("Client id: {}", engine.client_id());
            println!("Sync status: {:?}", engine.sync_status());
        }
        ConfigAction::Export { file } => {
            let json = engine.config().export_json()?;
            std::fs::write(&file, json)
                .with_context(|| format!("write {}", file.display()))?;
            println!("Config exported to {}", file.display());
        }
        ConfigAction::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("read {}", file.display()))?;
            engine.mutate_config(|c| c.import_json(&text))?;
            println!("Config imported from {}", file.display());
            if let Some(Err(e)) = engine.stop() {
                println!("Remote push failed ({e}); kept locally");
            }
        }
        ConfigAction::Pull => {
            let outcome = engine.pull_config()?;
            println!("Pull: {outcome:?}");
            println!("Sync status: {:?}", engine.sync_status());
        }
        ConfigAction::Push => {
            engine.push_config()?;
            println!("Config pushed");
        }
    }
    Ok(())
}

fn run_cache(data_dir: &Path, action: CacheAction) -> Result<()> {
    let cache = PersistentCache::new(open_store(data_dir)?);

    match action {
        CacheAction::Status => {
            let mut entries = cache.status();
            if entries.is_empty() {
                println!("Cache is empty: {}", data_dir.display());
                return Ok(());
            }
            entries.sort_by(|a, b| a.key.cmp(&b.key));
            let now = chrono::Utc::now();

            println!("Cache: {}", data_dir.display());
            println!("Entries: {}", entries.len());
            println!();
            println!("{:<24} {:>8} {:>12}", "Key", "Items", "Age");
            println!("{}", "-".repeat(46));
            for e in &entries {
                let age = (now - e.fetched_at).num_seconds().max(0);
                println!("{:<24} {:>8} {:>11}s", e.key, e.item_count, age);
            }
        }
        CacheAction::Clear => {
            let removed = cache.clear()?;
            println!("Removed {removed} cached windows");
        }
    }
    Ok(())
}
