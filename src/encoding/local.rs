//! Local ONNX Runtime embedding provider.
//!
//! Runs all-MiniLM-L6-v2 through `ort`: tokenize with truncation, batched
//! inference, attention-masked mean pooling, L2 normalization. Model files
//! are expected under the configured cache directory.

use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, EmbeddingProvider, SEMANTIC_DIM};
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Maximum sequence length for all-MiniLM-L6-v2 (trained at 256). Longer
/// input is truncated by the tokenizer so callers always get one vector.
const MAX_SEQ_LEN: usize = 256;

/// ONNX-backed embedding provider.
#[derive(Debug)]
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

// Safety: Tokenizer is Send+Sync; Session is only touched under the Mutex,
// which guarantees exclusive access during run().
unsafe impl Send for OnnxEmbedder {}
unsafe impl Sync for OnnxEmbedder {}

impl OnnxEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = crate::config::expand_tilde(&config.cache_dir);
        let model_path = cache_dir.join("model.onnx");
        let tokenizer_path = cache_dir.join("tokenizer.json");

        if !model_path.exists() || !tokenizer_path.exists() {
            return Err(Error::Fatal(format!(
                "embedding model files not found under {} (expected model.onnx and tokenizer.json for {})",
                cache_dir.display(),
                config.model,
            )));
        }

        let session = Session::builder()
            .and_then(|b| {
                b.with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            })
            .and_then(|b| b.with_intra_threads(4))
            .and_then(|b| b.commit_from_file(&model_path))
            .map_err(|e| Error::Fatal(format!("failed to load ONNX model: {e}")))?;

        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::Fatal(format!("failed to load tokenizer: {e}")))?;

        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| Error::Fatal(format!("failed to set truncation: {e}")))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }
}

impl EmbeddingProvider for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.embed_batch(&[text])?;
        Ok(results.pop().expect("batch of one yields one vector"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::Transient(format!("tokenization failed: {e}")))?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        // Flat i64 tensors: input ids, attention mask, and zeroed segment ids.
        let mut input_ids = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask = Vec::with_capacity(batch_size * seq_len);
        for encoding in &encodings {
            input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }
        let mask_f32: Vec<f32> = attention_mask.iter().map(|&m| m as f32).collect();

        let shape = vec![batch_size as i64, seq_len as i64];
        let ids_tensor = Tensor::from_array((shape.clone(), input_ids.into_boxed_slice()))
            .map_err(onnx_err)?;
        let mask_tensor =
            Tensor::from_array((shape.clone(), attention_mask.into_boxed_slice()))
                .map_err(onnx_err)?;
        let segment_tensor = Tensor::from_array((
            shape,
            vec![0i64; batch_size * seq_len].into_boxed_slice(),
        ))
        .map_err(onnx_err)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| Error::Fatal(format!("embedding session lock poisoned: {e}")))?;

        let outputs = session
            .run(ort::inputs! {
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                "token_type_ids" => segment_tensor,
            })
            .map_err(onnx_err)?;

        // Token embeddings come out as [batch, seq, 384]; the output name
        // varies by export, so fall back to the first output.
        let token_embeddings = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);

        let (out_shape, data) = token_embeddings
            .try_extract_tensor::<f32>()
            .map_err(onnx_err)?;

        let dims: &[i64] = &out_shape;
        if dims.len() != 3 || dims[2] != SEMANTIC_DIM as i64 {
            return Err(Error::Fatal(format!(
                "unexpected token embedding shape {dims:?}, expected [batch, seq, {SEMANTIC_DIM}]"
            )));
        }
        let hidden = dims[2] as usize;
        let out_seq_len = dims[1] as usize;

        // Attention-masked mean pooling per batch row, then normalize.
        let mut vectors = Vec::with_capacity(batch_size);
        for b in 0..batch_size {
            let mut pooled = vec![0.0f32; hidden];
            let mut token_count = 0.0f32;
            for s in 0..out_seq_len {
                let mask = mask_f32[b * seq_len + s];
                if mask == 0.0 {
                    continue;
                }
                let offset = (b * out_seq_len + s) * hidden;
                for (d, slot) in pooled.iter_mut().enumerate() {
                    *slot += data[offset + d] * mask;
                }
                token_count += mask;
            }
            if token_count > 0.0 {
                for slot in &mut pooled {
                    *slot /= token_count;
                }
            }
            vectors.push(l2_normalize(&pooled));
        }

        Ok(vectors)
    }
}

fn onnx_err(e: ort::Error) -> Error {
    Error::StoreUnavailable(format!("onnx inference failed: {e}"))
}
