mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use mnema::config::MnemaConfig;
use mnema::system::CognitiveSystem;

#[derive(Parser)]
#[command(name = "mnema", version, about = "Cognitive memory engine for long-running assistants")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a text experience as a memory
    Store {
        /// The experience text
        text: String,
        /// Hierarchy level: concept, context, or episode (default)
        #[arg(long)]
        level: Option<String>,
        /// Parent memory id (must sit at a higher tier)
        #[arg(long)]
        parent: Option<String>,
        /// Source path recorded with the memory
        #[arg(long)]
        source: Option<String>,
        /// Store as a semantic (long-term) memory
        #[arg(long)]
        semantic: bool,
    },
    /// Retrieve memories for a query
    Recall {
        query: String,
        /// Maximum core results
        #[arg(long, default_value_t = 10)]
        core: usize,
        /// Maximum peripheral results
        #[arg(long, default_value_t = 25)]
        peripheral: usize,
        /// Maximum bridge results (defaults to config)
        #[arg(long)]
        bridges: Option<usize>,
        /// Comma-separated memory types to include (episodic,semantic)
        #[arg(long)]
        types: Option<String>,
        /// Abort if retrieval exceeds this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Run a consolidation pass (decay, eviction, promotion)
    Consolidate,
    /// Show store counts, graph size, cache ratio, and health
    Stats,
    /// Delete every memory loaded from a source path
    ForgetSource { path: String },
    /// Mine commit messages from a git repository into memories
    LoadGit {
        /// Repository path (defaults to the current directory)
        repo: Option<PathBuf>,
        /// Maximum number of commits to mine
        #[arg(long, default_value_t = 500)]
        max_commits: usize,
    },
    /// Watch a directory and keep memories in sync with its files
    Watch {
        /// Directory to watch (defaults to sync.watch_root)
        root: Option<PathBuf>,
        /// Run a single poll-and-process pass, then exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let config = MnemaConfig::load()?;

    // Log to stderr so stdout stays clean for JSON output
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let consolidation = config.consolidation.clone();
    let system = Arc::new(CognitiveSystem::new(config)?);

    // Background maintenance for the long-running commands
    let maintenance_shutdown = Arc::new(AtomicBool::new(false));
    if consolidation.enabled {
        if let Command::Watch { once: false, .. } = &args.command {
            let system = Arc::clone(&system);
            let flag = Arc::clone(&maintenance_shutdown);
            tokio::spawn(async move {
                mnema::memory::consolidate::run_scheduler(
                    system.vector_store(),
                    system.metadata(),
                    consolidation,
                    flag,
                )
                .await;
            });
        }
    }

    match args.command {
        Command::Store {
            text,
            level,
            parent,
            source,
            semantic,
        } => cli::store(&system, &text, level, parent, source, semantic)?,
        Command::Recall {
            query,
            core,
            peripheral,
            bridges,
            types,
            timeout_ms,
        } => cli::recall(&system, &query, core, peripheral, bridges, types, timeout_ms)?,
        Command::Consolidate => cli::consolidate(&system)?,
        Command::Stats => cli::stats(&system)?,
        Command::ForgetSource { path } => cli::forget_source(&system, &path)?,
        Command::LoadGit { repo, max_commits } => cli::load_git(&system, repo, max_commits)?,
        Command::Watch { root, once } => cli::watch(Arc::clone(&system), root, once).await?,
    }

    maintenance_shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    Ok(())
}
