use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MnemaConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub encoding: EncodingConfig,
    pub retrieval: RetrievalConfig,
    pub consolidation: ConsolidationConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Metadata database (memories, graph, caches). Source of truth.
    pub meta_db_path: String,
    /// Vector database holding the three level collections.
    pub vector_db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EncodingConfig {
    /// Scale applied to the 16 dimensional slots before fusion, in `[0, 1]`.
    /// Keeps the semantic component dominant in cosine space.
    pub dimension_scale: f32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub activation_threshold: f64,
    pub seed_k: usize,
    pub max_activations: usize,
    pub max_depth: usize,
    pub bridge_k: usize,
    pub bridge_novelty_min: f64,
    pub bridge_cp_min: f64,
    pub bridge_candidate_pool: usize,
    pub bridge_cache_ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub episodic_decay: f64,
    pub semantic_decay: f64,
    pub eviction_floor: f64,
    pub eviction_idle_days: u64,
    pub promote_access_count: u32,
    pub promote_recency_days: u64,
    pub promote_min_edges: usize,
    pub promote_edge_strength: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub poll_interval_seconds: f64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub extensions: Vec<String>,
    pub atomic_operations: bool,
    pub watch_root: Option<String>,
}

impl Default for MnemaConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            encoding: EncodingConfig::default(),
            retrieval: RetrievalConfig::default(),
            consolidation: ConsolidationConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = default_mnema_dir();
        Self {
            meta_db_path: dir.join("meta.db").to_string_lossy().into_owned(),
            vector_db_path: dir.join("vectors.db").to_string_lossy().into_owned(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_mnema_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
        }
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            dimension_scale: 0.5,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            activation_threshold: 0.7,
            seed_k: 10,
            max_activations: 50,
            max_depth: 3,
            bridge_k: 5,
            bridge_novelty_min: 0.4,
            bridge_cp_min: 0.3,
            bridge_candidate_pool: 200,
            bridge_cache_ttl_seconds: 300,
        }
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 3600,
            episodic_decay: 0.1,
            semantic_decay: 0.01,
            eviction_floor: 0.05,
            eviction_idle_days: 30,
            promote_access_count: 5,
            promote_recency_days: 7,
            promote_min_edges: 2,
            promote_edge_strength: 0.5,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_seconds: 5.0,
            workers: 4,
            queue_capacity: 64,
            extensions: vec!["md".into(), "markdown".into()],
            atomic_operations: true,
            watch_root: None,
        }
    }
}

/// Returns `~/.mnema/`
pub fn default_mnema_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".mnema")
}

/// Returns the default config file path: `~/.mnema/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnema_dir().join("config.toml")
}

impl MnemaConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemaConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Retrieval and consolidation knobs use their bare documented names
    /// (`ACTIVATION_THRESHOLD`, `BRIDGE_K`, ...); paths and logging are
    /// namespaced under `MNEMA_`.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMA_META_DB") {
            self.storage.meta_db_path = val;
        }
        if let Ok(val) = std::env::var("MNEMA_VECTOR_DB") {
            self.storage.vector_db_path = val;
        }
        if let Ok(val) = std::env::var("MNEMA_LOG_LEVEL") {
            self.server.log_level = val;
        }
        override_parse(&mut self.retrieval.activation_threshold, "ACTIVATION_THRESHOLD");
        override_parse(&mut self.retrieval.max_activations, "MAX_ACTIVATIONS");
        override_parse(&mut self.retrieval.bridge_k, "BRIDGE_K");
        override_parse(&mut self.retrieval.bridge_novelty_min, "BRIDGE_NOVELTY_MIN");
        override_parse(&mut self.retrieval.bridge_cp_min, "BRIDGE_CP_MIN");
        override_parse(&mut self.consolidation.episodic_decay, "EPISODIC_DECAY");
        override_parse(&mut self.consolidation.semantic_decay, "SEMANTIC_DECAY");
        override_parse(&mut self.consolidation.promote_access_count, "PROMOTE_ACCESS_COUNT");
        override_parse(&mut self.sync.enabled, "MONITORING_ENABLED");
        override_parse(&mut self.sync.poll_interval_seconds, "MONITORING_INTERVAL_SECONDS");
        override_parse(&mut self.sync.atomic_operations, "SYNC_ATOMIC_OPERATIONS");
    }

    /// Resolve the metadata database path, expanding `~` if needed.
    pub fn resolved_meta_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.meta_db_path)
    }

    /// Resolve the vector database path, expanding `~` if needed.
    pub fn resolved_vector_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.vector_db_path)
    }
}

/// Overwrite `target` from an environment variable when it parses cleanly.
fn override_parse<T: std::str::FromStr>(target: &mut T, var: &str) {
    if let Ok(raw) = std::env::var(var) {
        if let Ok(parsed) = raw.parse::<T>() {
            *target = parsed;
        } else {
            tracing::warn!(var, value = %raw, "ignoring unparseable env override");
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
