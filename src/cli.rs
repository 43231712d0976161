//! Command handlers for the `mnema` binary.
//!
//! Thin wrappers over [`CognitiveSystem`]: parse arguments, call the façade,
//! print JSON to stdout.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mnema::memory::types::{MemoryKind, MemoryLevel};
use mnema::sync::loader::{GitHistoryLoader, MemoryLoader};
use mnema::sync::{DirectoryWatcher, SyncEngine};
use mnema::system::{CognitiveSystem, RecallLimits, StoreContext};

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `mnema store <text> [--level ..] [--parent ..] [--source ..]`
pub fn store(
    system: &CognitiveSystem,
    text: &str,
    level: Option<String>,
    parent_id: Option<String>,
    source_path: Option<String>,
    semantic: bool,
) -> Result<()> {
    let level_hint = level
        .map(|l| MemoryLevel::from_str(&l).map_err(anyhow::Error::msg))
        .transpose()?;
    let receipt = system.store(
        text,
        StoreContext {
            level_hint,
            kind: semantic.then_some(MemoryKind::Semantic),
            parent_id,
            source_path,
            ..Default::default()
        },
    )?;
    print_json(&receipt)
}

/// `mnema recall <query> [--core N] [--peripheral N] [--bridges N] [--timeout-ms N]`
pub fn recall(
    system: &CognitiveSystem,
    query: &str,
    k_core: usize,
    k_peripheral: usize,
    k_bridge: Option<usize>,
    types: Option<String>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let kinds = types
        .map(|raw| {
            raw.split(',')
                .map(|t| MemoryKind::from_str(t.trim()).map_err(anyhow::Error::msg))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?;
    let response = system.recall(
        query,
        RecallLimits {
            k_core,
            k_peripheral,
            k_bridge,
            kinds,
        },
        timeout_ms.map(Duration::from_millis),
    )?;
    print_json(&response)
}

/// `mnema consolidate`
pub fn consolidate(system: &CognitiveSystem) -> Result<()> {
    let report = system.consolidate()?;
    print_json(&report)
}

/// `mnema stats`
pub fn stats(system: &CognitiveSystem) -> Result<()> {
    let stats = system.stats()?;
    print_json(&stats)
}

/// `mnema forget-source <path>`
pub fn forget_source(system: &CognitiveSystem, path: &str) -> Result<()> {
    let deleted = system.delete_by_source(path)?;
    print_json(&serde_json::json!({ "deleted": deleted }))
}

/// `mnema load-git [repo]` — mine commit messages into episodic memories.
pub fn load_git(system: &CognitiveSystem, repo: Option<PathBuf>, max_commits: usize) -> Result<()> {
    let repo = match repo {
        Some(path) => path,
        None => std::env::current_dir().context("cannot resolve current directory")?,
    };
    let loader = GitHistoryLoader { max_commits };
    if !loader.supports(&repo) {
        anyhow::bail!("{} is not a git repository", repo.display());
    }

    let source = format!("git:{}", repo.display());
    // Replace wholesale so re-running stays idempotent
    system.delete_by_source(&source)?;

    let mut stored = 0usize;
    for candidate in loader.load(&repo)? {
        system.store(
            &candidate.content,
            StoreContext {
                level_hint: Some(candidate.level),
                kind: Some(candidate.kind),
                source_path: Some(source.clone()),
                created_at: candidate.created_at,
                dimensions_hint: candidate.dimensions_hint,
                ..Default::default()
            },
        )?;
        stored += 1;
    }
    print_json(&serde_json::json!({ "source": source, "stored": stored }))
}

/// `mnema watch [--once]` — run the file sync engine over the configured root.
pub async fn watch(system: Arc<CognitiveSystem>, root: Option<PathBuf>, once: bool) -> Result<()> {
    let mut sync_config = system.config().sync.clone();
    if let Some(root) = root {
        sync_config.watch_root = Some(root.to_string_lossy().into_owned());
    }
    let root = sync_config
        .watch_root
        .clone()
        .context("no watch root: pass a path or set sync.watch_root")?;

    let engine = SyncEngine::new(system, sync_config.clone());

    if once {
        let mut watcher = DirectoryWatcher::new(&root, &sync_config.extensions);
        let processed = engine.run_once(&mut watcher)?;
        return print_json(&serde_json::json!({
            "processed": processed,
            "health": engine.health(),
        }));
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            flag.store(true, Ordering::Relaxed);
        }
    });

    engine.run(shutdown).await?;
    Ok(())
}
