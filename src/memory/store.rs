//! Cross-store write path — the consistency seam between the two stores.
//!
//! Writes follow a write-ahead pattern: the vector lands first, then the
//! metadata row that references it; if the metadata insert fails the vector
//! is deleted again (compensating action). Deletes remove metadata first so
//! readers never see a row without its vector; any vector left dangling by a
//! crash is reaped by [`reconcile`].

use std::collections::HashSet;

use super::metadata::MetadataStore;
use super::types::{Memory, MemoryLevel};
use super::vector::VectorStore;
use crate::encoding::CognitiveEncoder;
use crate::error::{Error, Result};

/// Outcome of a successful store operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreReceipt {
    pub memory_id: String,
    pub level: MemoryLevel,
    pub dimensions: std::collections::BTreeMap<String, f64>,
}

/// Persist one memory across both stores.
///
/// Step order matters: (1) vector insert, (2) metadata insert referencing it,
/// (3) done. A failure at (2) deletes the vector before surfacing the error.
pub fn persist_memory(
    vectors: &dyn VectorStore,
    meta: &MetadataStore,
    memory: &Memory,
    vector: &[f32],
) -> Result<StoreReceipt> {
    vectors.insert(
        memory.level,
        &memory.vector_ref,
        vector,
        memory.source_path.as_deref(),
    )?;

    if let Err(err) = meta.insert_memory(memory) {
        // Compensate: the metadata store is the source of truth, so a vector
        // without a row must not survive.
        if let Err(cleanup_err) = vectors.delete(memory.level, &memory.vector_ref) {
            tracing::warn!(
                memory_id = %memory.id,
                %cleanup_err,
                "failed to remove vector after metadata insert failure; reconcile will reap it"
            );
        }
        return Err(err);
    }

    Ok(StoreReceipt {
        memory_id: memory.id.clone(),
        level: memory.level,
        dimensions: memory.dimensions.clone(),
    })
}

/// Delete one memory from both stores. Metadata goes first; a reader that
/// races the vector delete treats the vector-only hit as absent. Idempotent.
pub fn remove_memory(
    vectors: &dyn VectorStore,
    meta: &MetadataStore,
    id: &str,
) -> Result<bool> {
    let Some(memory) = meta.find_memory(id)? else {
        return Ok(false);
    };
    meta.delete_memory(id)?;
    vectors.delete(memory.level, &memory.vector_ref)?;
    Ok(true)
}

/// Delete every memory loaded from `path`, across both stores. Returns the
/// number of memories removed.
pub fn delete_by_source(
    vectors: &dyn VectorStore,
    meta: &MetadataStore,
    path: &str,
) -> Result<usize> {
    let memories = meta.memories_by_source(path)?;
    let mut deleted = 0;
    for memory in &memories {
        meta.delete_memory(&memory.id)?;
        vectors.delete(memory.level, &memory.vector_ref)?;
        deleted += 1;
    }
    if deleted > 0 {
        tracing::info!(path, deleted, "removed memories for source path");
    }
    Ok(deleted)
}

/// Counts from a startup reconciliation pass.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct ReconcileReport {
    /// Vectors with no metadata row — deleted.
    pub orphan_vectors_removed: usize,
    /// Metadata rows with no vector — re-embedded from content.
    pub memories_reembedded: usize,
}

/// Reconcile the two stores after a restart.
///
/// Vector refs without a metadata row are orphans from interrupted writes and
/// are removed; metadata rows without a vector still have their content, so
/// the vector is rebuilt through the encoder.
pub fn reconcile(
    vectors: &dyn VectorStore,
    meta: &MetadataStore,
    encoder: &CognitiveEncoder,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    let known: HashSet<(MemoryLevel, String)> = meta.all_vector_refs()?.into_iter().collect();

    // Sweep 1: vectors the metadata store has never heard of
    for level in MemoryLevel::ALL {
        for vector_ref in vectors.list_refs(level)? {
            if !known.contains(&(level, vector_ref.clone())) {
                tracing::warn!(%vector_ref, %level, "removing orphan vector");
                vectors.delete(level, &vector_ref)?;
                report.orphan_vectors_removed += 1;
            }
        }
    }

    // Sweep 2: metadata rows whose vector went missing
    for (level, vector_ref) in &known {
        if vectors.fetch(*level, vector_ref)?.is_none() {
            let Some(memory) = meta.find_by_vector_ref(vector_ref)? else {
                continue;
            };
            let encoded = encoder.encode(&memory.content)?;
            vectors.insert(
                *level,
                vector_ref,
                &encoded.vector,
                memory.source_path.as_deref(),
            )?;
            tracing::warn!(%vector_ref, %level, "re-embedded memory with missing vector");
            report.memories_reembedded += 1;
        }
    }

    if report.orphan_vectors_removed > 0 || report.memories_reembedded > 0 {
        tracing::info!(
            orphans = report.orphan_vectors_removed,
            reembedded = report.memories_reembedded,
            "store reconciliation repaired inconsistencies"
        );
    }
    Ok(report)
}

/// Verify invariant: every memory has exactly one vector in the collection
/// matching its level, and no collection holds unknown refs.
pub fn verify_consistency(vectors: &dyn VectorStore, meta: &MetadataStore) -> Result<()> {
    let known: HashSet<(MemoryLevel, String)> = meta.all_vector_refs()?.into_iter().collect();
    for (level, vector_ref) in &known {
        if vectors.fetch(*level, vector_ref)?.is_none() {
            return Err(Error::Inconsistent(format!(
                "memory vector {vector_ref} missing from {level}"
            )));
        }
    }
    for level in MemoryLevel::ALL {
        for vector_ref in vectors.list_refs(level)? {
            if !known.contains(&(level, vector_ref.clone())) {
                return Err(Error::Inconsistent(format!(
                    "vector {vector_ref} in {level} has no metadata row"
                )));
            }
        }
    }
    Ok(())
}
