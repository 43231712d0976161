//! File synchronization engine.
//!
//! A polling detection layer ([`watcher`]) diffs the watched tree and emits
//! change events; the coordination layer here consumes them and performs
//! atomic delete + reload per path through the loader registry ([`loader`]).
//! Events travel over a bounded channel from the poller to a worker pool —
//! when the queue is saturated the poller drops the rest of the tick and
//! logs it. Failed paths retry with exponential backoff and eventually mark
//! the engine degraded.

pub mod loader;
pub mod watcher;

pub use loader::{LoaderRegistry, MemoryCandidate, MemoryLoader};
pub use watcher::{ChangeEvent, ChangeKind, DirectoryWatcher, FileState};

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::system::{CognitiveSystem, StoreContext};

/// Initial retry delay for a failed path.
const RETRY_INITIAL: Duration = Duration::from_secs(1);
/// Backoff cap.
const RETRY_CAP: Duration = Duration::from_secs(60);
/// Attempts before a path is declared dirty and the engine degraded.
const RETRY_ATTEMPTS: u32 = 5;

// ── Health ───────────────────────────────────────────────────────────────────

/// Shared mutable health counters, updated by the poller and workers.
#[derive(Default)]
pub struct SyncHealthState {
    events_processed: AtomicU64,
    events_failed: AtomicU64,
    ticks_dropped: AtomicU64,
    degraded: AtomicBool,
    dirty: Mutex<BTreeSet<PathBuf>>,
}

/// Point-in-time health snapshot reported through `stats`.
#[derive(Debug, Clone, Serialize)]
pub struct SyncHealth {
    pub events_processed: u64,
    pub events_failed: u64,
    pub ticks_dropped: u64,
    pub dirty_paths: Vec<String>,
    pub degraded: bool,
}

impl SyncHealthState {
    pub fn snapshot(&self) -> SyncHealth {
        let dirty = self.dirty.lock().map(|d| d.clone()).unwrap_or_default();
        SyncHealth {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            ticks_dropped: self.ticks_dropped.load(Ordering::Relaxed),
            dirty_paths: dirty
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }

    fn record_success(&self, path: &Path) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut dirty) = self.dirty.lock() {
            dirty.remove(path);
            if dirty.is_empty() {
                self.degraded.store(false, Ordering::Relaxed);
            }
        }
    }

    fn record_failure(&self, path: &Path) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
        self.degraded.store(true, Ordering::Relaxed);
        if let Ok(mut dirty) = self.dirty.lock() {
            dirty.insert(path.to_path_buf());
        }
    }

    fn record_dropped_tick(&self) {
        self.ticks_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Coordination layer: consumes change events and keeps the memory stores in
/// sync with the watched tree.
pub struct SyncEngine {
    system: Arc<CognitiveSystem>,
    registry: LoaderRegistry,
    config: SyncConfig,
    health: Arc<SyncHealthState>,
    path_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(system: Arc<CognitiveSystem>, config: SyncConfig) -> Arc<Self> {
        let health = Arc::new(SyncHealthState::default());
        system.attach_sync_health(Arc::clone(&health));
        Arc::new(Self {
            system,
            registry: LoaderRegistry::with_defaults(),
            config,
            health,
            path_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn health(&self) -> SyncHealth {
        self.health.snapshot()
    }

    /// The serialization point for everything touching one path.
    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .path_locks
            .lock()
            .expect("path lock table never poisoned");
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    /// Handle one change event: delete existing memories for the path, then
    /// (for added/modified files) reload through the first supporting loader.
    /// The whole sequence holds the per-path mutex.
    pub fn process_event(&self, event: &ChangeEvent) -> Result<()> {
        let lock = self.path_lock(&event.path);
        let _guard = lock.lock().expect("path mutex never poisoned");
        let source = event.path.to_string_lossy().into_owned();

        match event.kind {
            ChangeKind::Deleted => {
                self.system.delete_by_source(&source)?;
                Ok(())
            }
            ChangeKind::Added | ChangeKind::Modified => {
                // Delete first so a modified file never doubles up
                self.system.delete_by_source(&source)?;
                match self.reload(&event.path, &source) {
                    Ok(stored) => {
                        tracing::debug!(path = %source, stored, "reloaded source file");
                        Ok(())
                    }
                    Err(err) => {
                        if self.config.atomic_operations {
                            // Roll back the partial reload; the retry will
                            // start from a clean slate either way.
                            if let Err(rollback_err) = self.system.delete_by_source(&source) {
                                tracing::warn!(path = %source, %rollback_err, "rollback after failed reload also failed");
                            }
                        }
                        Err(err)
                    }
                }
            }
        }
    }

    /// Load every candidate the loader yields, wiring batch-local parent
    /// references to the ids they resolved to.
    fn reload(&self, path: &Path, source: &str) -> Result<usize> {
        let Some(loader) = self.registry.find(path) else {
            tracing::debug!(path = %source, "no loader supports this path");
            return Ok(0);
        };
        let candidates = loader.load(path)?;
        let mut stored_ids: Vec<String> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let parent_id = match candidate.parent {
                Some(index) => Some(stored_ids.get(index).cloned().ok_or_else(|| {
                    Error::Validation(format!(
                        "loader {} emitted a forward parent reference", loader.name()
                    ))
                })?),
                None => None,
            };
            let receipt = self.system.store(
                &candidate.content,
                StoreContext {
                    level_hint: Some(candidate.level),
                    kind: Some(candidate.kind),
                    parent_id,
                    source_path: Some(source.to_string()),
                    created_at: candidate.created_at,
                    dimensions_hint: candidate.dimensions_hint,
                },
            )?;
            stored_ids.push(receipt.memory_id);
        }
        Ok(stored_ids.len())
    }

    /// Process with the documented retry schedule (1 s initial, doubling,
    /// 60 s cap, 5 attempts). Blocking; async callers run it inside
    /// `spawn_blocking`. Returns whether the event eventually succeeded.
    pub fn process_with_retry(&self, event: &ChangeEvent) -> bool {
        let mut delay = RETRY_INITIAL;
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.process_event(event) {
                Ok(()) => {
                    self.health.record_success(&event.path);
                    return true;
                }
                Err(err) if attempt < RETRY_ATTEMPTS => {
                    tracing::warn!(
                        path = %event.path.display(),
                        attempt,
                        %err,
                        "sync event failed, backing off"
                    );
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(RETRY_CAP);
                }
                Err(err) => {
                    tracing::error!(
                        path = %event.path.display(),
                        %err,
                        "sync event failed after {RETRY_ATTEMPTS} attempts, marking path dirty"
                    );
                    self.health.record_failure(&event.path);
                }
            }
        }
        false
    }

    /// One synchronous poll-and-process pass. Used by the CLI one-shot mode
    /// and tests; the long-running form is [`SyncEngine::run`].
    pub fn run_once(&self, watcher: &mut DirectoryWatcher) -> Result<usize> {
        let events = watcher.poll()?;
        let mut processed = 0;
        for event in &events {
            if self.process_event(event).is_ok() {
                self.health.record_success(&event.path);
                processed += 1;
            } else {
                self.health.record_failure(&event.path);
            }
        }
        Ok(processed)
    }

    /// Long-running sync: a poller task feeding a bounded channel drained by
    /// a worker pool. Returns when `shutdown` is set.
    pub async fn run(self: Arc<Self>, shutdown: Arc<AtomicBool>) -> Result<()> {
        let root = self
            .config
            .watch_root
            .clone()
            .ok_or_else(|| Error::Validation("sync.watch_root is not configured".into()))?;

        let (tx, rx) = mpsc::channel::<ChangeEvent>(self.config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::new();
        for worker_id in 0..self.config.workers.max(1) {
            let rx = Arc::clone(&rx);
            let engine = Arc::clone(&self);
            workers.push(tokio::spawn(async move {
                loop {
                    let event = { rx.lock().await.recv().await };
                    let Some(event) = event else { break };
                    let engine = Arc::clone(&engine);
                    let outcome = tokio::task::spawn_blocking(move || {
                        engine.process_with_retry(&event)
                    })
                    .await;
                    if let Err(err) = outcome {
                        tracing::error!(worker_id, %err, "sync worker task panicked");
                    }
                }
            }));
        }

        let mut watcher = DirectoryWatcher::new(&root, &self.config.extensions);
        let period = Duration::from_secs_f64(self.config.poll_interval_seconds.max(0.1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(root = %root, period_secs = self.config.poll_interval_seconds, "file sync started");
        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            let events = match watcher.poll() {
                Ok(events) => events,
                Err(err) => {
                    tracing::warn!(%err, "poll failed, will retry next tick");
                    continue;
                }
            };
            for event in events {
                if let Err(mpsc::error::TrySendError::Full(dropped)) = tx.try_send(event) {
                    // Backpressure: drop the rest of this tick; the next
                    // poll re-detects anything still out of sync.
                    self.health.record_dropped_tick();
                    tracing::warn!(path = %dropped.path.display(), "sync queue saturated, dropping tick");
                    break;
                }
            }
        }

        drop(tx);
        for worker in workers {
            let _ = worker.await;
        }
        tracing::info!("file sync stopped");
        Ok(())
    }
}
