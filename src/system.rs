//! The cognitive system façade.
//!
//! Composes the encoder, the two stores, activation spreading, bridge
//! discovery, and consolidation into the five external operations: `store`,
//! `recall`, `consolidate`, `stats`, and `delete_by_source`. Reconciles the
//! stores on startup. Externally triggered operations accept an optional
//! timeout; on expiry the in-flight phase is abandoned and no result-side
//! mutation (access tracking, reinforcement) is applied.

use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::config::MnemaConfig;
use crate::encoding::{create_provider, CognitiveEncoder, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::memory::consolidate::{run_consolidation, ConsolidateReport};
use crate::memory::metadata::{MetadataStore, REINFORCEMENT_RATE};
use crate::memory::store::{
    delete_by_source, persist_memory, reconcile, ReconcileReport, StoreReceipt,
};
use crate::memory::types::{
    ConnectionKind, Memory, MemoryKind, MemoryLevel, RetrievalKind,
};
use crate::memory::vector::{SqliteVectorStore, VectorStore};
use crate::retrieval::activation::{
    commit_access, spread_activation, ActivatedMemory, ActivationConfig,
};
use crate::retrieval::bridge::{discover_bridges, query_fingerprint, BridgeConfig};
use crate::sync::SyncHealthState;

/// Optional hints accompanying a `store` call.
#[derive(Debug, Default, Clone)]
pub struct StoreContext {
    /// Target tier; defaults to L2 (episode).
    pub level_hint: Option<MemoryLevel>,
    /// Lifecycle class; defaults to episodic.
    pub kind: Option<MemoryKind>,
    /// Link to an existing higher-tier memory.
    pub parent_id: Option<String>,
    /// Watched file this text came from.
    pub source_path: Option<String>,
    /// Override the creation timestamp (loaders replaying history).
    pub created_at: Option<String>,
    /// Loader-supplied dimension overrides, merged over extraction.
    pub dimensions_hint: std::collections::BTreeMap<String, f64>,
}

/// Result-shaping knobs for `recall`.
#[derive(Debug, Clone)]
pub struct RecallLimits {
    pub k_core: usize,
    pub k_peripheral: usize,
    /// Overrides the configured bridge count when set.
    pub k_bridge: Option<usize>,
    /// Restrict results to these lifecycle kinds.
    pub kinds: Option<Vec<MemoryKind>>,
}

impl Default for RecallLimits {
    fn default() -> Self {
        Self {
            k_core: 10,
            k_peripheral: 25,
            k_bridge: None,
            kinds: None,
        }
    }
}

/// One memory in a recall response.
#[derive(Debug, Clone, Serialize)]
pub struct RecallItem {
    pub id: String,
    pub content: String,
    pub score: f64,
    /// Human-readable provenance ("seed similarity 0.93", ...).
    pub why: String,
    #[serde(rename = "memory_type")]
    pub kind: MemoryKind,
    pub level: MemoryLevel,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RecallResponse {
    pub core: Vec<RecallItem>,
    pub peripheral: Vec<RecallItem>,
    pub bridges: Vec<RecallItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

#[derive(Debug, Serialize)]
pub struct SystemStats {
    /// Memory counts for L0, L1, L2.
    pub by_level: [u64; 3],
    pub memory_total: u64,
    pub connection_count: u64,
    pub bridge_cache: BridgeCacheStats,
    pub db: crate::db::HealthReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<crate::sync::SyncHealth>,
}

/// The façade over the whole engine.
pub struct CognitiveSystem {
    config: MnemaConfig,
    encoder: CognitiveEncoder,
    vectors: Arc<dyn VectorStore>,
    meta: Arc<MetadataStore>,
    sync_health: OnceLock<Arc<SyncHealthState>>,
}

impl CognitiveSystem {
    /// Build the production system from config: local embedding provider,
    /// on-disk stores, startup reconciliation.
    pub fn new(config: MnemaConfig) -> Result<Self> {
        let provider = create_provider(&config.embedding)?;
        let vectors: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::open(config.resolved_vector_db_path())?);
        let meta = Arc::new(MetadataStore::open(config.resolved_meta_db_path())?);
        Self::assemble(config, provider, vectors, meta)
    }

    /// Build from injected parts (tests substitute in-memory stores and a
    /// deterministic provider).
    pub fn with_parts(
        config: MnemaConfig,
        provider: Box<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        meta: Arc<MetadataStore>,
    ) -> Result<Self> {
        Self::assemble(config, provider, vectors, meta)
    }

    fn assemble(
        config: MnemaConfig,
        provider: Box<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        meta: Arc<MetadataStore>,
    ) -> Result<Self> {
        let encoder = CognitiveEncoder::new(provider, config.encoding.dimension_scale);
        let report: ReconcileReport = reconcile(vectors.as_ref(), &meta, &encoder)?;
        if report.orphan_vectors_removed > 0 || report.memories_reembedded > 0 {
            tracing::warn!(?report, "startup reconciliation repaired store drift");
        }
        Ok(Self {
            config,
            encoder,
            vectors,
            meta,
            sync_health: OnceLock::new(),
        })
    }

    /// Wire in the sync engine's health state so `stats` can report it.
    pub fn attach_sync_health(&self, health: Arc<SyncHealthState>) {
        let _ = self.sync_health.set(health);
    }

    /// Store one experience. Encodes the text, writes the vector, then the
    /// metadata row (write-ahead with compensation), and links the parent
    /// hierarchy when given.
    pub fn store(&self, text: &str, context: StoreContext) -> Result<StoreReceipt> {
        if text.trim().is_empty() {
            return Err(Error::Validation("cannot store empty text".into()));
        }

        let level = context.level_hint.unwrap_or(MemoryLevel::Episode);
        let kind = context.kind.unwrap_or(MemoryKind::Episodic);

        let encoded = self.encoder.encode(text)?;
        let mut memory = Memory::new(level, kind, text);
        memory.dimensions = encoded.dimensions;
        for (name, score) in context.dimensions_hint {
            memory.dimensions.insert(name, score);
        }
        memory.source_path = context.source_path;
        memory.parent_id = context.parent_id.clone();
        if let Some(created_at) = context.created_at {
            memory.created_at = created_at.clone();
            memory.last_accessed = created_at;
        }

        let receipt = persist_memory(self.vectors.as_ref(), &self.meta, &memory, &encoded.vector)?;

        // Hierarchy edges let activation travel between a document and its
        // sections in both directions.
        if let Some(parent_id) = &context.parent_id {
            self.meta
                .connect(parent_id, &memory.id, ConnectionKind::Hierarchical, 0.5)?;
            self.meta
                .connect(&memory.id, parent_id, ConnectionKind::Hierarchical, 0.5)?;
        }

        tracing::debug!(id = %receipt.memory_id, %level, "stored memory");
        Ok(receipt)
    }

    /// Retrieve memories for a query: activation spreading for core and
    /// peripheral results, bridge discovery for serendipity. All result-side
    /// mutations happen only after the final deadline check.
    pub fn recall(
        &self,
        query: &str,
        limits: RecallLimits,
        timeout: Option<Duration>,
    ) -> Result<RecallResponse> {
        if query.trim().is_empty() {
            return Err(Error::Validation("cannot recall with an empty query".into()));
        }
        let started = Instant::now();
        let check = |phase: &str| -> Result<()> {
            match timeout {
                Some(budget) if started.elapsed() >= budget => {
                    tracing::warn!(phase, "recall deadline expired");
                    Err(Error::Timeout(budget))
                }
                _ => Ok(()),
            }
        };

        let encoded = self.encoder.encode(query)?;
        check("encode")?;

        let activation_config = ActivationConfig {
            threshold: self.config.retrieval.activation_threshold,
            seed_k: self.config.retrieval.seed_k,
            max_activations: self.config.retrieval.max_activations,
            max_depth: self.config.retrieval.max_depth,
        };
        let mut activation =
            spread_activation(self.vectors.as_ref(), &self.meta, &encoded.vector, &activation_config)?;
        check("activation")?;

        if let Some(kinds) = &limits.kinds {
            activation.core.retain(|a| kinds.contains(&a.memory.kind));
            activation
                .peripheral
                .retain(|a| kinds.contains(&a.memory.kind));
        }

        let bridge_config = BridgeConfig {
            k: limits.k_bridge.unwrap_or(self.config.retrieval.bridge_k),
            novelty_min: self.config.retrieval.bridge_novelty_min,
            cp_min: self.config.retrieval.bridge_cp_min,
            candidate_pool: self.config.retrieval.bridge_candidate_pool,
            cache_ttl: Duration::from_secs(self.config.retrieval.bridge_cache_ttl_seconds),
        };
        let now = Utc::now();
        let activated_refs: Vec<&ActivatedMemory> = activation.iter().collect();
        let bridges = discover_bridges(
            self.vectors.as_ref(),
            &self.meta,
            &encoded.vector,
            &activated_refs,
            &bridge_config,
            &now,
        )?;
        check("bridges")?;

        // Commit side effects: access statistics, then co-occurrence
        // reinforcement over adjacent pairs of the ranked result (winner ->
        // loser, delta = η·min(a, b)). Bounded at K−1 edge writes.
        commit_access(&self.meta, &activation, &now)?;
        let ranked: Vec<&ActivatedMemory> = activation.iter().collect();
        for pair in ranked.windows(2) {
            let delta = REINFORCEMENT_RATE * pair[0].activation.min(pair[1].activation);
            self.meta
                .reinforce(&pair[0].memory.id, &pair[1].memory.id, delta)?;
        }

        let fingerprint = query_fingerprint(&encoded.vector, &bridge_config);
        let mut log_entries: Vec<(String, RetrievalKind)> = Vec::new();
        for item in activation.core.iter().take(limits.k_core) {
            log_entries.push((item.memory.id.clone(), RetrievalKind::Core));
        }
        for item in activation.peripheral.iter().take(limits.k_peripheral) {
            log_entries.push((item.memory.id.clone(), RetrievalKind::Peripheral));
        }
        for bridge in &bridges {
            log_entries.push((bridge.memory.id.clone(), RetrievalKind::Bridge));
        }
        self.meta.record_retrieval(&fingerprint, &log_entries, &now)?;

        let describe = |item: &ActivatedMemory| -> RecallItem {
            let why = if item.hops == 0 {
                format!("seed similarity {:.2}", item.activation)
            } else {
                format!("spread {} hop(s), activation {:.2}", item.hops, item.activation)
            };
            RecallItem {
                id: item.memory.id.clone(),
                content: item.memory.content.clone(),
                score: item.activation,
                why,
                kind: item.memory.kind,
                level: item.memory.level,
            }
        };

        Ok(RecallResponse {
            core: activation
                .core
                .iter()
                .take(limits.k_core)
                .map(describe)
                .collect(),
            peripheral: activation
                .peripheral
                .iter()
                .take(limits.k_peripheral)
                .map(describe)
                .collect(),
            bridges: bridges
                .into_iter()
                .map(|b| RecallItem {
                    id: b.memory.id.clone(),
                    content: b.memory.content.clone(),
                    score: b.bridge_score,
                    why: format!(
                        "bridge: novelty {:.2}, connection {:.2}",
                        b.novelty, b.connection_potential
                    ),
                    kind: b.memory.kind,
                    level: b.memory.level,
                })
                .collect(),
        })
    }

    /// Run one consolidation pass now (also triggered by the scheduler).
    pub fn consolidate(&self) -> Result<ConsolidateReport> {
        let now = Utc::now();
        // Cache hygiene and the orphan sweep ride along with the main pass
        self.meta.bridge_cache_purge(
            &now,
            Duration::from_secs(self.config.retrieval.bridge_cache_ttl_seconds),
        )?;
        let report = run_consolidation(
            self.vectors.as_ref(),
            &self.meta,
            &self.config.consolidation,
            &now,
            None,
        )?;
        reconcile(self.vectors.as_ref(), &self.meta, &self.encoder)?;
        Ok(report)
    }

    /// Per-level counts, graph size, cache ratio, store health, sync health.
    pub fn stats(&self) -> Result<SystemStats> {
        let by_level = self.meta.count_by_level()?;
        let (hits, misses) = self.meta.bridge_cache_counters();
        let total_lookups = hits + misses;
        Ok(SystemStats {
            by_level,
            memory_total: by_level.iter().sum(),
            connection_count: self.meta.connection_count()?,
            bridge_cache: BridgeCacheStats {
                hits,
                misses,
                hit_ratio: if total_lookups == 0 {
                    0.0
                } else {
                    hits as f64 / total_lookups as f64
                },
            },
            db: self.meta.health()?,
            sync: self.sync_health.get().map(|h| h.snapshot()),
        })
    }

    /// Remove every memory loaded from `path` (both stores).
    pub fn delete_by_source(&self, path: &str) -> Result<usize> {
        delete_by_source(self.vectors.as_ref(), &self.meta, path)
    }

    pub fn config(&self) -> &MnemaConfig {
        &self.config
    }

    /// Shared handle to the vector store (scheduler wiring).
    pub fn vector_store(&self) -> Arc<dyn VectorStore> {
        Arc::clone(&self.vectors)
    }

    /// Shared handle to the metadata store (scheduler wiring).
    pub fn metadata(&self) -> Arc<MetadataStore> {
        Arc::clone(&self.meta)
    }
}
