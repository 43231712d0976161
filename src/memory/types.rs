//! Core memory type definitions.
//!
//! Defines [`MemoryLevel`] (the three hierarchy tiers), [`MemoryKind`]
//! (episodic vs. semantic lifecycle), [`ConnectionKind`], and the two record
//! types [`Memory`] and [`MemoryConnection`] that mirror the metadata schema.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The three hierarchy tiers. Each tier maps to its own vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLevel {
    /// L0 — broad concepts.
    Concept,
    /// L1 — mid-level contexts (documents, themes).
    Context,
    /// L2 — specific episodes (events, sections, commits).
    Episode,
}

impl MemoryLevel {
    pub const ALL: [MemoryLevel; 3] = [Self::Concept, Self::Context, Self::Episode];

    /// Integer form stored in the `memories.level` column.
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Concept => 0,
            Self::Context => 1,
            Self::Episode => 2,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Concept),
            1 => Some(Self::Context),
            2 => Some(Self::Episode),
            _ => None,
        }
    }

    /// Name of the vector collection backing this tier.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Concept => "concepts_l0",
            Self::Context => "contexts_l1",
            Self::Episode => "episodes_l2",
        }
    }
}

impl std::fmt::Display for MemoryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.as_i64())
    }
}

impl std::str::FromStr for MemoryLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "concept" | "L0" => Ok(Self::Concept),
            "1" | "context" | "L1" => Ok(Self::Context),
            "2" | "episode" | "L2" => Ok(Self::Episode),
            _ => Err(format!("unknown memory level: {s}")),
        }
    }
}

/// Lifecycle class of a memory. The only legal transition is
/// `Episodic -> Semantic` (promotion); there is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Short-lived, fast decay (0.1/day by default). Subject to eviction.
    Episodic,
    /// Consolidated, slow decay (0.01/day). Never evicted automatically.
    Semantic,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
        }
    }

    /// Default per-day decay coefficient for this kind.
    pub fn default_decay_rate(&self) -> f64 {
        match self {
            Self::Episodic => 0.1,
            Self::Semantic => 0.01,
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            _ => Err(format!("unknown memory kind: {s}")),
        }
    }
}

/// Category of a directed edge in the associative graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Strengthened by retrieval co-occurrence.
    Associative,
    /// Parent/child structure (document -> section).
    Hierarchical,
    /// Near-in-time events.
    Temporal,
    /// Explicit cause -> effect links.
    Causal,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Associative => "associative",
            Self::Hierarchical => "hierarchical",
            Self::Temporal => "temporal",
            Self::Causal => "causal",
        }
    }
}

impl std::str::FromStr for ConnectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "associative" => Ok(Self::Associative),
            "hierarchical" => Ok(Self::Hierarchical),
            "temporal" => Ok(Self::Temporal),
            "causal" => Ok(Self::Causal),
            _ => Err(format!("unknown connection kind: {s}")),
        }
    }
}

/// A memory record, matching the `memories` table schema.
///
/// Identity (`id`, `level`, `content`, `vector_ref`, `created_at`) is
/// immutable; statistics (`access_count`, `last_accessed`,
/// `importance_score`) and lifecycle (`kind`, `decay_rate`) are mutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    /// Hierarchy tier; also selects the vector collection.
    pub level: MemoryLevel,
    /// Verbatim source text.
    pub content: String,
    /// Extracted dimension scores by name (see `encoding::dimensions`).
    pub dimensions: BTreeMap<String, f64>,
    /// Key of this memory's vector in the collection matching `level`.
    pub vector_ref: String,
    /// Lifecycle class; transitions one-way episodic -> semantic.
    #[serde(rename = "memory_type")]
    pub kind: MemoryKind,
    /// Per-day decay coefficient applied by consolidation.
    pub decay_rate: f64,
    /// Derived importance in `[0, 1]`.
    pub importance_score: f64,
    /// Number of times this memory was activated by retrieval. Never decreases.
    pub access_count: u32,
    /// Optional link to a strictly-lower-level memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Watched file this memory was loaded from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// ISO 8601 timestamp of the most recent activation.
    pub last_accessed: String,
}

impl Memory {
    /// Build a fresh memory with derived defaults. `vector_ref` is the id
    /// itself; importance starts from the recency-only term of the
    /// importance formula (no accesses, no edges yet).
    pub fn new(level: MemoryLevel, kind: MemoryKind, content: impl Into<String>) -> Self {
        let id = uuid::Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            vector_ref: id.clone(),
            id,
            level,
            content: content.into(),
            dimensions: BTreeMap::new(),
            kind,
            decay_rate: kind.default_decay_rate(),
            importance_score: 0.3,
            access_count: 0,
            parent_id: None,
            source_path: None,
            created_at: now.clone(),
            last_accessed: now,
        }
    }
}

/// A directed edge of the associative graph, matching `memory_connections`.
///
/// `(source_id, target_id)` is the primary key; the reverse edge is an
/// independent record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConnection {
    pub source_id: String,
    pub target_id: String,
    /// Edge strength in `[0, 1]`; grows monotonically under reinforcement.
    pub strength: f64,
    pub kind: ConnectionKind,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activated: Option<String>,
    pub activation_count: u32,
}

/// A cached bridge-discovery result row.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeCacheEntry {
    pub memory_id: String,
    pub bridge_score: f64,
    pub novelty_score: f64,
    pub connection_potential: f64,
}

/// How a memory ended up in a retrieval result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalKind {
    Core,
    Peripheral,
    Bridge,
}

impl RetrievalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Peripheral => "peripheral",
            Self::Bridge => "bridge",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_round_trips_through_i64() {
        for level in MemoryLevel::ALL {
            assert_eq!(MemoryLevel::from_i64(level.as_i64()), Some(level));
        }
        assert_eq!(MemoryLevel::from_i64(3), None);
    }

    #[test]
    fn level_collections_are_distinct() {
        assert_eq!(MemoryLevel::Concept.collection(), "concepts_l0");
        assert_eq!(MemoryLevel::Context.collection(), "contexts_l1");
        assert_eq!(MemoryLevel::Episode.collection(), "episodes_l2");
    }

    #[test]
    fn kind_default_decay_rates() {
        assert_eq!(MemoryKind::Episodic.default_decay_rate(), 0.1);
        assert_eq!(MemoryKind::Semantic.default_decay_rate(), 0.01);
    }

    #[test]
    fn new_memory_uses_id_as_vector_ref() {
        let m = Memory::new(MemoryLevel::Episode, MemoryKind::Episodic, "a note");
        assert_eq!(m.id, m.vector_ref);
        assert_eq!(m.access_count, 0);
        assert_eq!(m.decay_rate, 0.1);
        assert!(m.parent_id.is_none());
    }

    #[test]
    fn connection_kind_parses() {
        assert_eq!(
            "hierarchical".parse::<ConnectionKind>().unwrap(),
            ConnectionKind::Hierarchical
        );
        assert!("sideways".parse::<ConnectionKind>().is_err());
    }
}
