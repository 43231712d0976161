//! Core memory engine — the two stores, the cross-store write path, and the
//! consolidation lifecycle.
//!
//! [`vector`] holds the fused vectors across the three level collections;
//! [`metadata`] is the source of truth for records, the associative graph,
//! the bridge cache, and retrieval statistics; [`store`] glues the two with
//! the write-ahead/compensation protocol; [`consolidate`] runs decay,
//! eviction, and promotion. Type definitions live in [`types`].

pub mod consolidate;
pub mod metadata;
pub mod store;
pub mod types;
pub mod vector;

/// Convert an f32 vector slice to raw bytes for sqlite-vec.
pub fn vector_to_bytes(vector: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            vector.as_ptr() as *const u8,
            std::mem::size_of_val(vector),
        )
    }
}

/// Convert raw little-endian bytes back to an f32 vector.
pub fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// Convert sqlite-vec L2 distance to cosine similarity.
///
/// For L2-normalized vectors: `d² = 2·(1 − cos)`, so `cos = 1 − d²/2`.
pub fn l2_to_cosine(distance: f64) -> f64 {
    1.0 - distance * distance / 2.0
}
