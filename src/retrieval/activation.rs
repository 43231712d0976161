//! Two-phase activation spreading.
//!
//! Phase 1 seeds the working set with direct similarity hits from every
//! level collection (`seed_k` each, filtered by the activation threshold,
//! with a single documented relaxation step when too few survive). Phase 2
//! spreads activation breadth-first over the associative graph, attenuated
//! by edge strength, until the frontier drains or the caps are hit. The top
//! quartile by activation is classified as core, the rest as peripheral.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::Result;
use crate::memory::metadata::MetadataStore;
use crate::memory::types::{Memory, MemoryLevel};
use crate::memory::vector::VectorStore;

/// Knobs for one activation pass.
#[derive(Debug, Clone)]
pub struct ActivationConfig {
    /// Minimum seed similarity θ.
    pub threshold: f64,
    /// Top-k fetched per collection during seeding.
    pub seed_k: usize,
    /// Total activation cap K across seed and spread.
    pub max_activations: usize,
    /// BFS depth bound.
    pub max_depth: usize,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            seed_k: 10,
            max_activations: 50,
            max_depth: 3,
        }
    }
}

/// Minimum number of surviving seeds before the threshold is relaxed once.
const MIN_SEEDS: usize = 3;
/// Single relaxation step subtracted from θ when seeding comes up short.
const THRESHOLD_RELAXATION: f64 = 0.1;
/// Spread gate: a node joins the frontier when its propagated activation
/// reaches θ times this factor (activation decays with depth).
const SPREAD_DECAY: f64 = 0.6;

/// One activated memory with its provenance.
#[derive(Debug, Clone)]
pub struct ActivatedMemory {
    pub memory: Memory,
    /// Scalar activation in `[0, 1]`.
    pub activation: f64,
    /// Graph distance from the seed set (0 for direct hits).
    pub hops: u32,
}

/// Classified output of one activation pass.
#[derive(Debug, Clone, Default)]
pub struct ActivationResult {
    pub core: Vec<ActivatedMemory>,
    pub peripheral: Vec<ActivatedMemory>,
}

impl ActivationResult {
    /// Core and peripheral in ranked order.
    pub fn iter(&self) -> impl Iterator<Item = &ActivatedMemory> {
        self.core.iter().chain(self.peripheral.iter())
    }

    pub fn len(&self) -> usize {
        self.core.len() + self.peripheral.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty() && self.peripheral.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.iter().map(|a| a.memory.id.clone()).collect()
    }
}

/// Run seed + spread for a fused query vector. Read-only: access tracking is
/// applied separately via [`commit_access`] once the caller's deadline checks
/// have passed.
pub fn spread_activation(
    vectors: &dyn VectorStore,
    meta: &MetadataStore,
    query: &[f32],
    config: &ActivationConfig,
) -> Result<ActivationResult> {
    // ── Phase 1: seed across all three collections ──
    let searched = vectors.batch_search(&MemoryLevel::ALL, query, config.seed_k)?;
    let mut hits: Vec<(String, f64)> = searched
        .into_iter()
        .flat_map(|(_, hits)| hits)
        .map(|h| (h.vector_ref, h.score))
        .collect();
    hits.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let mut survivors: Vec<(String, f64)> = hits
        .iter()
        .filter(|(_, score)| *score >= config.threshold)
        .cloned()
        .collect();
    if survivors.len() < MIN_SEEDS {
        // Documented relaxation: drop θ by 0.1 once so small corpora still recall
        let relaxed = config.threshold - THRESHOLD_RELAXATION;
        survivors = hits
            .iter()
            .filter(|(_, score)| *score >= relaxed)
            .cloned()
            .collect();
    }
    survivors.truncate(config.max_activations);

    // Hydrate seed metadata. A vector hit without a metadata row is a write
    // in flight or an orphan — treat it as absent.
    let seed_refs: Vec<String> = survivors.iter().map(|(r, _)| r.clone()).collect();
    let seed_rows = meta.fetch_memories(&seed_refs)?;

    let mut activation: HashMap<String, (f64, u32)> = HashMap::new();
    let mut frontier: VecDeque<(String, f64, u32)> = VecDeque::new();
    for (vector_ref, score) in &survivors {
        if seed_rows.contains_key(vector_ref) {
            activation.insert(vector_ref.clone(), (*score, 0));
            frontier.push_back((vector_ref.clone(), *score, 0));
        }
    }

    // ── Phase 2: breadth-first spread over the graph ──
    let spread_gate = config.threshold * SPREAD_DECAY;
    let mut visited: HashSet<String> = activation.keys().cloned().collect();

    while let Some((node, node_activation, depth)) = frontier.pop_front() {
        if depth >= config.max_depth as u32 || visited.len() >= config.max_activations {
            continue;
        }
        for edge in meta.connections_from(&[node.clone()])? {
            let propagated = node_activation * edge.strength;
            let entry = activation
                .entry(edge.target_id.clone())
                .or_insert((0.0, depth + 1));
            if propagated > entry.0 {
                *entry = (propagated, depth + 1);
            }
            if propagated >= spread_gate
                && !visited.contains(&edge.target_id)
                && visited.len() < config.max_activations
            {
                visited.insert(edge.target_id.clone());
                frontier.push_back((edge.target_id, propagated, depth + 1));
            }
        }
    }

    // Keep only nodes that cleared the spread gate or seeded directly, and
    // that still have metadata rows.
    let reached: Vec<String> = activation
        .iter()
        .filter(|(_, (a, hops))| *hops == 0 || *a >= spread_gate)
        .map(|(id, _)| id.clone())
        .collect();
    let rows = meta.fetch_memories(&reached)?;

    let mut ranked: Vec<ActivatedMemory> = reached
        .into_iter()
        .filter_map(|id| {
            let (act, hops) = activation[&id];
            rows.get(&id).map(|memory| ActivatedMemory {
                memory: memory.clone(),
                activation: act,
                hops,
            })
        })
        .collect();

    // Descending activation, ties by importance then ascending id
    ranked.sort_by(|a, b| {
        b.activation
            .partial_cmp(&a.activation)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.memory
                    .importance_score
                    .partial_cmp(&a.memory.importance_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    ranked.truncate(config.max_activations);

    // Top quartile is core (at least one when anything activated)
    let core_len = if ranked.is_empty() {
        0
    } else {
        (ranked.len() + 3) / 4
    };
    let peripheral = ranked.split_off(core_len);

    Ok(ActivationResult {
        core: ranked,
        peripheral,
    })
}

/// Apply the importance side of a completed retrieval: bump access counts,
/// refresh `last_accessed`, recompute importance for every activated memory.
pub fn commit_access(
    meta: &MetadataStore,
    result: &ActivationResult,
    now: &DateTime<Utc>,
) -> Result<()> {
    meta.touch_memories(&result.ids(), now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::FUSED_DIM;
    use crate::memory::metadata::MetadataStore;
    use crate::memory::store::persist_memory;
    use crate::memory::types::{ConnectionKind, Memory, MemoryKind};
    use crate::memory::vector::SqliteVectorStore;

    fn setup() -> (SqliteVectorStore, MetadataStore) {
        (
            SqliteVectorStore::open_in_memory().unwrap(),
            MetadataStore::open_in_memory().unwrap(),
        )
    }

    fn unit(seed: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; FUSED_DIM];
        v[seed % FUSED_DIM] = 1.0;
        v
    }

    /// Unit vector between `a` and `b` with the given cosine to `unit(a)`.
    fn blend(a: usize, b: usize, cos_a: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; FUSED_DIM];
        v[a % FUSED_DIM] = cos_a;
        v[b % FUSED_DIM] = (1.0 - cos_a * cos_a).sqrt();
        v
    }

    fn insert(
        vectors: &SqliteVectorStore,
        meta: &MetadataStore,
        content: &str,
        level: MemoryLevel,
        vector: &[f32],
    ) -> String {
        let memory = Memory::new(level, MemoryKind::Episodic, content);
        persist_memory(vectors, meta, &memory, vector).unwrap();
        memory.id
    }

    fn config() -> ActivationConfig {
        ActivationConfig::default()
    }

    #[test]
    fn direct_hit_seeds_as_core() {
        let (vectors, meta) = setup();
        let id = insert(&vectors, &meta, "exact match", MemoryLevel::Episode, &unit(0));
        insert(&vectors, &meta, "unrelated", MemoryLevel::Episode, &unit(200));

        let result = spread_activation(&vectors, &meta, &unit(0), &config()).unwrap();
        assert!(!result.core.is_empty());
        assert_eq!(result.core[0].memory.id, id);
        assert!(result.core[0].activation > 0.95);
        assert_eq!(result.core[0].hops, 0);
    }

    #[test]
    fn seeds_come_from_every_level() {
        let (vectors, meta) = setup();
        let c = insert(&vectors, &meta, "concept", MemoryLevel::Concept, &blend(0, 1, 0.95));
        let x = insert(&vectors, &meta, "context", MemoryLevel::Context, &blend(0, 2, 0.94));
        let e = insert(&vectors, &meta, "episode", MemoryLevel::Episode, &blend(0, 3, 0.93));

        let result = spread_activation(&vectors, &meta, &unit(0), &config()).unwrap();
        let ids = result.ids();
        assert!(ids.contains(&c));
        assert!(ids.contains(&x));
        assert!(ids.contains(&e));
    }

    #[test]
    fn threshold_relaxes_once_for_sparse_corpora() {
        let (vectors, meta) = setup();
        // Similarity ~0.65: below θ=0.7 but above the relaxed 0.6
        let id = insert(&vectors, &meta, "close enough", MemoryLevel::Episode, &blend(0, 9, 0.65));

        let result = spread_activation(&vectors, &meta, &unit(0), &config()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.core[0].memory.id, id);

        // Similarity ~0.5 stays below even the relaxed threshold
        let (vectors2, meta2) = setup();
        insert(&vectors2, &meta2, "too far", MemoryLevel::Episode, &blend(0, 9, 0.5));
        let result = spread_activation(&vectors2, &meta2, &unit(0), &config()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn activation_spreads_over_strong_edges() {
        let (vectors, meta) = setup();
        let seed = insert(&vectors, &meta, "the seed", MemoryLevel::Episode, &unit(0));
        // Orthogonal to the query: only reachable through the graph
        let neighbor = insert(&vectors, &meta, "the neighbor", MemoryLevel::Episode, &unit(50));
        meta.connect(&seed, &neighbor, ConnectionKind::Associative, 0.9)
            .unwrap();

        let result = spread_activation(&vectors, &meta, &unit(0), &config()).unwrap();
        let reached: Vec<&str> = result.iter().map(|a| a.memory.id.as_str()).collect();
        assert!(reached.contains(&neighbor.as_str()));

        let spread = result
            .iter()
            .find(|a| a.memory.id == neighbor)
            .unwrap();
        assert_eq!(spread.hops, 1);
        // a_m = a_n * s ≈ 1.0 * 0.9
        assert!((spread.activation - 0.9).abs() < 0.01);
    }

    #[test]
    fn weak_edges_do_not_propagate() {
        let (vectors, meta) = setup();
        let seed = insert(&vectors, &meta, "the seed", MemoryLevel::Episode, &unit(0));
        let neighbor = insert(&vectors, &meta, "weakly linked", MemoryLevel::Episode, &unit(50));
        // 1.0 * 0.3 = 0.3 < θ·0.6 = 0.42
        meta.connect(&seed, &neighbor, ConnectionKind::Associative, 0.3)
            .unwrap();

        let result = spread_activation(&vectors, &meta, &unit(0), &config()).unwrap();
        let reached: Vec<&str> = result.iter().map(|a| a.memory.id.as_str()).collect();
        assert!(!reached.contains(&neighbor.as_str()));
    }

    #[test]
    fn depth_bound_stops_the_walk() {
        let (vectors, meta) = setup();
        // Chain: seed -> m1 -> m2 -> m3 -> m4, all strength 1.0
        let mut ids = vec![insert(&vectors, &meta, "n0", MemoryLevel::Episode, &unit(0))];
        for i in 1..5 {
            let id = insert(&vectors, &meta, &format!("n{i}"), MemoryLevel::Episode, &unit(40 + i));
            meta.connect(&ids[i - 1], &id, ConnectionKind::Causal, 1.0)
                .unwrap();
            ids.push(id);
        }

        let cfg = ActivationConfig {
            max_depth: 3,
            ..config()
        };
        let result = spread_activation(&vectors, &meta, &unit(0), &cfg).unwrap();
        let reached: Vec<&str> = result.iter().map(|a| a.memory.id.as_str()).collect();
        assert!(reached.contains(&ids[3].as_str()), "depth 3 is reachable");
        assert!(!reached.contains(&ids[4].as_str()), "depth 4 is beyond the bound");
    }

    #[test]
    fn total_activation_is_capped() {
        let (vectors, meta) = setup();
        let seed = insert(&vectors, &meta, "hub", MemoryLevel::Episode, &unit(0));
        for i in 0..30 {
            let id = insert(&vectors, &meta, &format!("spoke {i}"), MemoryLevel::Episode, &unit(10 + i));
            meta.connect(&seed, &id, ConnectionKind::Associative, 0.95)
                .unwrap();
        }

        let cfg = ActivationConfig {
            max_activations: 10,
            ..config()
        };
        let result = spread_activation(&vectors, &meta, &unit(0), &cfg).unwrap();
        assert!(result.len() <= 10);
    }

    #[test]
    fn core_is_top_quartile() {
        let (vectors, meta) = setup();
        // 8 memories at staggered similarity; all above relaxed threshold
        for i in 0..8 {
            let cos = 0.98 - 0.02 * i as f32;
            insert(&vectors, &meta, &format!("m{i}"), MemoryLevel::Episode, &blend(0, 10 + i, cos));
        }

        let result = spread_activation(&vectors, &meta, &unit(0), &config()).unwrap();
        assert_eq!(result.len(), 8);
        assert_eq!(result.core.len(), 2, "top quartile of 8");
        assert_eq!(result.peripheral.len(), 6);
        // Core activations dominate peripheral ones
        let min_core = result.core.iter().map(|a| a.activation).fold(1.0, f64::min);
        let max_peripheral = result
            .peripheral
            .iter()
            .map(|a| a.activation)
            .fold(0.0, f64::max);
        assert!(min_core >= max_peripheral);
    }

    #[test]
    fn vector_hit_without_metadata_is_invisible() {
        let (vectors, meta) = setup();
        // Vector present, no metadata row (mid-write state)
        vectors
            .insert(MemoryLevel::Episode, "phantom", &unit(0), None)
            .unwrap();

        let result = spread_activation(&vectors, &meta, &unit(0), &config()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn commit_access_updates_stats() {
        let (vectors, meta) = setup();
        let id = insert(&vectors, &meta, "tracked", MemoryLevel::Episode, &unit(0));

        let result = spread_activation(&vectors, &meta, &unit(0), &config()).unwrap();
        commit_access(&meta, &result, &Utc::now()).unwrap();

        let memory = meta.get_memory(&id).unwrap();
        assert_eq!(memory.access_count, 1);
        assert!(memory.importance_score > 0.0);
    }
}
