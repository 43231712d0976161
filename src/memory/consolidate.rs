//! Dual-memory consolidation — decay, eviction, and promotion.
//!
//! Runs as a recurring maintenance pass (and on demand). Effective importance
//! decays exponentially with idle time; episodic memories that were never
//! accessed and have decayed below the floor are evicted from both stores;
//! episodic memories with a strong recent access pattern and enough strong
//! outgoing edges are promoted to semantic, irreversibly.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::metadata::MetadataStore;
use super::store::remove_memory;
use super::types::Memory;
use super::vector::VectorStore;
use crate::config::ConsolidationConfig;
use crate::error::Result;

/// Counts from one consolidation pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ConsolidateReport {
    pub evicted: usize,
    pub promoted: usize,
    pub retained: usize,
}

/// Importance after applying time decay:
/// `importance · exp(−decay_rate · days_idle)`.
pub fn effective_importance(importance: f64, decay_rate: f64, days_idle: f64) -> f64 {
    importance * (-decay_rate * days_idle.max(0.0)).exp()
}

fn days_between(earlier: &str, now: &DateTime<Utc>) -> f64 {
    match DateTime::parse_from_rfc3339(earlier) {
        Ok(then) => (*now - then.with_timezone(&Utc)).num_seconds() as f64 / 86_400.0,
        Err(_) => 0.0,
    }
}

/// Days since this memory was last touched (falls back to creation time for
/// unparseable rows).
pub fn days_idle(memory: &Memory, now: &DateTime<Utc>) -> f64 {
    days_between(&memory.last_accessed, now)
}

/// Run one consolidation pass at time `now`.
///
/// `shutdown` is checked between memories so a long pass can be cancelled
/// cooperatively; an interrupted pass reports what it managed so far.
pub fn run_consolidation(
    vectors: &dyn VectorStore,
    meta: &MetadataStore,
    config: &ConsolidationConfig,
    now: &DateTime<Utc>,
    shutdown: Option<&AtomicBool>,
) -> Result<ConsolidateReport> {
    let mut report = ConsolidateReport::default();
    let stopped = || shutdown.map(|f| f.load(Ordering::Relaxed)).unwrap_or(false);

    // ── Eviction ──
    // Candidates: episodic, never accessed, older than the idle window.
    let cutoff = *now - chrono::Duration::days(config.eviction_idle_days as i64);
    for memory in meta.eviction_candidates(&cutoff)? {
        if stopped() {
            return Ok(report);
        }
        let effective = effective_importance(
            memory.importance_score,
            memory.decay_rate,
            days_idle(&memory, now),
        );
        if effective < config.eviction_floor {
            remove_memory(vectors, meta, &memory.id)?;
            tracing::debug!(id = %memory.id, effective, "evicted idle episodic memory");
            report.evicted += 1;
        } else {
            report.retained += 1;
        }
    }

    // ── Promotion ──
    let accessed_since = *now - chrono::Duration::days(config.promote_recency_days as i64);
    for memory in meta.promotion_candidates(config.promote_access_count, &accessed_since)? {
        if stopped() {
            return Ok(report);
        }
        let strong_edges =
            meta.strong_outgoing_edges(&memory.id, config.promote_edge_strength)?;
        if strong_edges >= config.promote_min_edges {
            if meta.promote_memory(&memory.id)? {
                tracing::info!(id = %memory.id, strong_edges, "promoted episodic memory to semantic");
                report.promoted += 1;
            }
        } else {
            report.retained += 1;
        }
    }

    Ok(report)
}

/// Recurring maintenance task. Ticks every `interval_seconds`, checks the
/// shutdown flag between passes, and logs each report.
pub async fn run_scheduler(
    vectors: Arc<dyn VectorStore>,
    meta: Arc<MetadataStore>,
    config: ConsolidationConfig,
    shutdown: Arc<AtomicBool>,
) {
    let period = std::time::Duration::from_secs(config.interval_seconds.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so startup isn't a full pass.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let vectors = Arc::clone(&vectors);
        let meta = Arc::clone(&meta);
        let config = config.clone();
        let flag = Arc::clone(&shutdown);
        let outcome = tokio::task::spawn_blocking(move || {
            run_consolidation(vectors.as_ref(), &meta, &config, &Utc::now(), Some(&flag))
        })
        .await;
        match outcome {
            Ok(Ok(report)) => tracing::info!(
                evicted = report.evicted,
                promoted = report.promoted,
                retained = report.retained,
                "consolidation pass complete"
            ),
            Ok(Err(err)) => tracing::error!(%err, "consolidation pass failed"),
            Err(err) => tracing::error!(%err, "consolidation task panicked"),
        }
    }
}
