#![allow(dead_code)]

use std::sync::Arc;

use mnema::config::MnemaConfig;
use mnema::encoding::{l2_normalize, EmbeddingProvider, SEMANTIC_DIM};
use mnema::error::Result;
use mnema::memory::metadata::MetadataStore;
use mnema::memory::vector::SqliteVectorStore;
use mnema::system::CognitiveSystem;

/// Deterministic bag-of-words embedding: each token contributes weight at a
/// hashed position, normalized. Texts sharing tokens overlap in cosine,
/// which is enough structure for retrieval tests without a model.
pub struct HashEmbedding;

impl EmbeddingProvider for HashEmbedding {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; SEMANTIC_DIM];
        for token in text.to_lowercase().split_whitespace() {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            token.hash(&mut hasher);
            v[(hasher.finish() % SEMANTIC_DIM as u64) as usize] += 1.0;
        }
        Ok(l2_normalize(&v))
    }
}

/// Test config: in-memory-friendly, with the activation threshold relaxed
/// because hash embeddings overlap less than a real model's.
pub fn test_config() -> MnemaConfig {
    let mut config = MnemaConfig::default();
    config.retrieval.activation_threshold = 0.3;
    config
}

/// A full system over in-memory stores, plus handles to both stores for
/// direct inspection.
pub struct TestSystem {
    pub system: Arc<CognitiveSystem>,
    pub vectors: Arc<SqliteVectorStore>,
    pub meta: Arc<MetadataStore>,
}

pub fn build_system(config: MnemaConfig) -> TestSystem {
    let vectors = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
    let meta = Arc::new(MetadataStore::open_in_memory().unwrap());
    let shared: Arc<dyn mnema::memory::vector::VectorStore> =
        vectors.clone() as Arc<dyn mnema::memory::vector::VectorStore>;
    let system = Arc::new(
        CognitiveSystem::with_parts(config, Box::new(HashEmbedding), shared, Arc::clone(&meta))
            .unwrap(),
    );
    TestSystem {
        system,
        vectors,
        meta,
    }
}

pub fn default_system() -> TestSystem {
    build_system(test_config())
}

/// RFC 3339 timestamp `days` in the past.
pub fn days_ago(days: i64) -> String {
    (chrono_now() - chrono::Duration::days(days)).to_rfc3339()
}

fn chrono_now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
