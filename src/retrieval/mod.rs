//! Retrieval — activation spreading over the graph plus bridge discovery.
//!
//! [`activation`] implements the two-phase (seed, spread) algorithm;
//! [`bridge`] surfaces semantically distant but well-connected memories.
//! Both operate read-only; the mutations they imply (access tracking,
//! reinforcement, cache writes) are committed by the façade after the
//! deadline checks pass.

pub mod activation;
pub mod bridge;

/// Cosine similarity of two equal-length vectors. Inputs are expected to be
/// L2-normalized, making this a plain dot product; un-normalized input is
/// handled anyway.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.6f32, 0.8];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
