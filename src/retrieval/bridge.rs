//! Bridge discovery — serendipity in the result set.
//!
//! A bridge is a memory that is semantically far from the query yet strongly
//! tied to what the query activated: `bridge_score = 0.6·novelty +
//! 0.4·connection_potential`. Candidates are drawn from L1/L2 outside the
//! activation set, stalest first so long-unvisited content gets a chance.
//! Results are cached per query fingerprint with a short TTL.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use super::activation::ActivatedMemory;
use super::cosine;
use crate::error::Result;
use crate::memory::metadata::MetadataStore;
use crate::memory::types::{BridgeCacheEntry, Memory, MemoryLevel};
use crate::memory::vector::VectorStore;

/// Weight of novelty vs. connection potential in the bridge score.
const NOVELTY_WEIGHT: f64 = 0.6;
const CONNECTION_WEIGHT: f64 = 0.4;

/// Knobs for one bridge-discovery pass.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Number of bridges returned.
    pub k: usize,
    /// Floor on `1 − cosine(query, candidate)`.
    pub novelty_min: f64,
    /// Floor on connection potential.
    pub cp_min: f64,
    /// Maximum candidates sampled per pass.
    pub candidate_pool: usize,
    /// Cache lifetime per fingerprint.
    pub cache_ttl: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            k: 5,
            novelty_min: 0.4,
            cp_min: 0.3,
            candidate_pool: 200,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// One discovered bridge.
#[derive(Debug, Clone)]
pub struct BridgeMemory {
    pub memory: Memory,
    pub bridge_score: f64,
    pub novelty: f64,
    pub connection_potential: f64,
}

/// Deterministic fingerprint over the fused query vector (quantized to i16
/// at 1e3 scale) and the scoring parameters. `DefaultHasher::new()` uses
/// fixed keys, so the value is stable across processes — safe as a
/// persistent cache key.
pub fn query_fingerprint(query: &[f32], config: &BridgeConfig) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for value in query {
        (((value * 1000.0).round()) as i16).hash(&mut hasher);
    }
    config.k.hash(&mut hasher);
    ((config.novelty_min * 1000.0) as i64).hash(&mut hasher);
    ((config.cp_min * 1000.0) as i64).hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Discover bridges for an activation result, reading through the cache.
///
/// Read-only except for the cache table itself; retrieval logging stays with
/// the façade.
pub fn discover_bridges(
    vectors: &dyn VectorStore,
    meta: &MetadataStore,
    query: &[f32],
    activated: &[&ActivatedMemory],
    config: &BridgeConfig,
    now: &DateTime<Utc>,
) -> Result<Vec<BridgeMemory>> {
    let fingerprint = query_fingerprint(query, config);

    if let Some(cached) = meta.bridge_cache_get(&fingerprint, now, config.cache_ttl)? {
        return hydrate_cached(meta, cached);
    }

    let exclude: HashSet<String> = activated.iter().map(|a| a.memory.id.clone()).collect();
    let candidates = meta.stalest_candidates(
        &[MemoryLevel::Context, MemoryLevel::Episode],
        &exclude,
        config.candidate_pool,
    )?;

    // Fetch the activated vectors once; every candidate is scored against them.
    let mut activated_vectors = Vec::with_capacity(activated.len());
    let activated_ids: Vec<String> = exclude.iter().cloned().collect();
    for entry in activated {
        if let Some(v) = vectors.fetch(entry.memory.level, &entry.memory.vector_ref)? {
            activated_vectors.push(v);
        }
    }

    let mut bridges = Vec::new();
    for candidate in candidates {
        let Some(candidate_vector) = vectors.fetch(candidate.level, &candidate.vector_ref)?
        else {
            continue;
        };

        let novelty = 1.0 - cosine(query, &candidate_vector);
        if novelty < config.novelty_min {
            continue;
        }

        let max_sim = activated_vectors
            .iter()
            .map(|v| cosine(v, &candidate_vector))
            .fold(0.0, f64::max);
        let max_edge = meta.max_edge_strength_between(&candidate.id, &activated_ids)?;
        let connection_potential = max_sim.max(max_edge);
        if connection_potential < config.cp_min {
            continue;
        }

        bridges.push(BridgeMemory {
            bridge_score: NOVELTY_WEIGHT * novelty + CONNECTION_WEIGHT * connection_potential,
            novelty,
            connection_potential,
            memory: candidate,
        });
    }

    bridges.sort_by(|a, b| {
        b.bridge_score
            .partial_cmp(&a.bridge_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    bridges.truncate(config.k);

    let entries: Vec<BridgeCacheEntry> = bridges
        .iter()
        .map(|b| BridgeCacheEntry {
            memory_id: b.memory.id.clone(),
            bridge_score: b.bridge_score,
            novelty_score: b.novelty,
            connection_potential: b.connection_potential,
        })
        .collect();
    meta.bridge_cache_put(&fingerprint, &entries, now)?;

    Ok(bridges)
}

/// Rebuild bridge results from cached rows. Entries whose memory has been
/// deleted since caching are dropped silently.
fn hydrate_cached(
    meta: &MetadataStore,
    cached: Vec<BridgeCacheEntry>,
) -> Result<Vec<BridgeMemory>> {
    let ids: Vec<String> = cached.iter().map(|e| e.memory_id.clone()).collect();
    let rows = meta.fetch_memories(&ids)?;
    Ok(cached
        .into_iter()
        .filter_map(|entry| {
            rows.get(&entry.memory_id).map(|memory| BridgeMemory {
                memory: memory.clone(),
                bridge_score: entry.bridge_score,
                novelty: entry.novelty_score,
                connection_potential: entry.connection_potential,
            })
        })
        .collect())
}
