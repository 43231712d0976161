//! Text encoding: semantic embedding fused with cognitive dimensions.
//!
//! [`EmbeddingProvider`] turns text into a 384-dim semantic vector;
//! [`DimensionExtractor`](dimensions::DimensionExtractor) derives 16 named
//! feature slots from the same text; [`CognitiveEncoder`] concatenates the
//! two (dimensions scaled by α so the semantic part dominates cosine
//! similarity) and L2-normalizes the result into the canonical 400-dim form
//! stored in every collection.

pub mod dimensions;
pub mod local;

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use dimensions::{DimensionExtractor, DIMENSION_SLOTS};

/// Number of dimensions in the semantic embedding (all-MiniLM-L6-v2).
pub const SEMANTIC_DIM: usize = 384;

/// Width of the fused vector held by the vector store.
pub const FUSED_DIM: usize = SEMANTIC_DIM + DIMENSION_SLOTS;

/// Trait for embedding text into semantic vectors.
///
/// Implementations produce L2-normalized vectors of exactly [`SEMANTIC_DIM`]
/// dimensions, deterministically for a given model, truncating oversize input
/// internally. All methods are synchronous — callers in async contexts should
/// use `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, returned in input order. Implementations may
    /// override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        SEMANTIC_DIM
    }
}

/// Create an embedding provider from config.
///
/// Currently only `"local"` is supported (ONNX Runtime + all-MiniLM-L6-v2).
/// Model-load problems are fatal: nothing downstream can run without vectors.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = local::OnnxEmbedder::new(config)?;
            Ok(Box::new(provider))
        }
        other => Err(Error::Fatal(format!(
            "unknown embedding provider: {other}. Supported: local"
        ))),
    }
}

/// A fused encoding: the stored vector plus the named dimension map kept as
/// side-data on the memory record.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub vector: Vec<f32>,
    pub dimensions: BTreeMap<String, f64>,
}

/// Composes an embedding provider and the dimension extractor into the final
/// fused representation.
pub struct CognitiveEncoder {
    provider: Box<dyn EmbeddingProvider>,
    extractor: DimensionExtractor,
    /// Scale α applied to the dimensional slots before fusion.
    scale: f32,
}

impl CognitiveEncoder {
    pub fn new(provider: Box<dyn EmbeddingProvider>, scale: f32) -> Self {
        Self {
            provider,
            extractor: DimensionExtractor::new(),
            scale: scale.clamp(0.0, 1.0),
        }
    }

    /// Encode one text into the fused 400-dim vector plus its dimension map.
    pub fn encode(&self, text: &str) -> Result<Encoded> {
        let semantic = self.provider.embed(text)?;
        Ok(self.fuse(text, semantic))
    }

    /// Encode a batch of texts, preserving input order.
    pub fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Encoded>> {
        let semantics = self.provider.embed_batch(texts)?;
        Ok(texts
            .iter()
            .zip(semantics)
            .map(|(text, semantic)| self.fuse(text, semantic))
            .collect())
    }

    fn fuse(&self, text: &str, semantic: Vec<f32>) -> Encoded {
        let profile = self.extractor.extract(text);

        let mut fused = Vec::with_capacity(FUSED_DIM);
        fused.extend(l2_normalize(&semantic));
        fused.extend(profile.slots().iter().map(|s| s * self.scale));

        Encoded {
            vector: l2_normalize(&fused),
            dimensions: profile.named(),
        }
    }
}

/// L2-normalize a vector. Returns the input unchanged if its norm is zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
