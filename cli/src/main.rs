//! LedgerIndex CLI: run the ledger indexer and the explorer read API.
//!
//! # Commands
//! ```text
//! ledgerindex serve   [--config <file>] [--listen <addr>] [--cursor newest|resume|<height>]
//!                     [--database <path>] [--gateway <ws-url>]
//! ledgerindex import  --file <blocks.json> [--config <file>] [--database <path>] [--cursor ...]
//! ledgerindex info    [--config <file>] [--database <path>]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ledgerindex_api::{router, ApiState};
use ledgerindex_core::{
    Decoded, IndexerHealth, LedgerIndexer, LedgerStore, ReplaySource, SourceBlock, StartCursor,
};
use ledgerindex_storage::{InMemoryStorage, SqliteStorage};
use ledgerindex_stream::WsBlockSource;
use tracing::{info, warn};

mod config;
mod telemetry;

use config::{AppConfig, StoreBackend, StoreConfig};

#[derive(Parser)]
#[command(
    name = "ledgerindex",
    about = "Ledger block indexer and explorer read API",
    version
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to the ledger gateway and serve the read API
    Serve {
        #[command(flatten)]
        store: StoreArgs,
        /// Address the HTTP API binds to
        #[arg(long)]
        listen: Option<String>,
        /// Start cursor: newest | resume | <height>
        #[arg(long)]
        cursor: Option<StartCursor>,
        /// Gateway WebSocket URL
        #[arg(long)]
        gateway: Option<String>,
    },

    /// Index a JSON array of block notifications from a file, then exit
    Import {
        /// File containing `[SourceBlock, ...]`
        #[arg(short, long)]
        file: PathBuf,
        #[command(flatten)]
        store: StoreArgs,
        /// Skip blocks below this height, or `resume` after the stored tip
        #[arg(long)]
        cursor: Option<StartCursor>,
    },

    /// Print store statistics
    Info {
        #[command(flatten)]
        store: StoreArgs,
    },
}

#[derive(Args)]
struct StoreArgs {
    /// SQLite database file (selects the sqlite backend)
    #[arg(long)]
    database: Option<String>,
}

impl StoreArgs {
    fn apply(&self, store: &mut StoreConfig) {
        if let Some(path) = &self.database {
            store.backend = StoreBackend::Sqlite;
            store.path = path.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = AppConfig::load(cli.config.as_deref())?;
    telemetry::init_tracing(&cfg.log);

    match cli.command {
        Commands::Serve {
            store,
            listen,
            cursor,
            gateway,
        } => {
            store.apply(&mut cfg.store);
            if let Some(listen) = listen {
                cfg.api.listen = listen;
            }
            if let Some(cursor) = cursor {
                cfg.indexer.cursor = cursor;
            }
            if let Some(url) = gateway {
                cfg.source.url = url;
            }
            serve(cfg).await
        }
        Commands::Import { file, store, cursor } => {
            store.apply(&mut cfg.store);
            if let Some(cursor) = cursor {
                cfg.indexer.cursor = cursor;
            }
            import(cfg, file).await
        }
        Commands::Info { store } => {
            store.apply(&mut cfg.store);
            print_info(&cfg.store).await
        }
    }
}

async fn open_store(cfg: &StoreConfig) -> Result<Arc<dyn LedgerStore>> {
    let store: Arc<dyn LedgerStore> = match cfg.backend {
        StoreBackend::Sqlite => Arc::new(
            SqliteStorage::open(&cfg.path)
                .await
                .with_context(|| format!("opening sqlite store {}", cfg.path))?,
        ),
        StoreBackend::Memory => {
            warn!("using the in-memory store; indexed data is lost on exit");
            Arc::new(InMemoryStorage::new())
        }
    };
    Ok(store)
}

async fn serve(cfg: AppConfig) -> Result<()> {
    let source = Arc::new(WsBlockSource::new(cfg.source.clone())?);
    let listener = tokio::net::TcpListener::bind(&cfg.api.listen)
        .await
        .with_context(|| format!("binding {}", cfg.api.listen))?;

    let store = open_store(&cfg.store).await?;
    let health = Arc::new(IndexerHealth::new());

    let indexer = LedgerIndexer::new(
        cfg.indexer.clone(),
        source,
        Arc::clone(&store),
        Arc::clone(&health),
    )
    .spawn();

    let app = router(ApiState::new(store, health, cfg.api.service.clone()));
    info!(addr = %cfg.api.listen, gateway = %cfg.source.url, "read API listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    indexer.shutdown().await;
    served.context("HTTP server failed")
}

async fn import(cfg: AppConfig, file: PathBuf) -> Result<()> {
    let text = std::fs::read_to_string(&file)
        .with_context(|| format!("reading {}", file.display()))?;
    let entries: Vec<Decoded<SourceBlock>> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of blocks", file.display()))?;
    let blocks = usable_blocks(entries);
    info!(file = %file.display(), blocks = blocks.len(), "importing block dump");

    let store = open_store(&cfg.store).await?;
    let health = Arc::new(IndexerHealth::new());

    let mut indexer_cfg = cfg.indexer.clone();
    indexer_cfg.name = "import".into();
    LedgerIndexer::new(
        indexer_cfg,
        Arc::new(ReplaySource::new(blocks)),
        Arc::clone(&store),
        Arc::clone(&health),
    )
    .spawn()
    .wait()
    .await;

    let report = health.snapshot();
    store.close().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Keep the decodable blocks of a dump; the rest are logged and skipped.
fn usable_blocks(entries: Vec<Decoded<SourceBlock>>) -> Vec<SourceBlock> {
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match entry {
            Decoded::Valid(block) => Some(block),
            Decoded::Malformed { reason, .. } => {
                warn!(index, reason = %reason, "skipping undecodable block in dump");
                None
            }
        })
        .collect()
}

async fn print_info(cfg: &StoreConfig) -> Result<()> {
    let store = open_store(cfg).await?;
    let stats = store.stats().await?;
    let latest = store.latest_block().await?;
    store.close().await;

    let body = serde_json::json!({
        "store": cfg,
        "stats": stats,
        "latestBlock": latest,
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
