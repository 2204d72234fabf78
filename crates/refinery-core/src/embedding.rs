//! Vector helpers for embedding comparison and storage.
//!
//! - [`cosine_similarity`]: closeness of two embeddings, used by the
//!   rewrite engine's threshold gate
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` encoding for
//!   the artifact `vector` column

/// Cosine similarity of two vectors.
///
/// Returns `0.0` instead of dividing by zero whenever either vector has
/// zero magnitude, is empty, or the lengths differ. Accumulates in `f64`
/// so long embeddings (4096+ dims) keep their precision.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
        (0.0f64, 0.0f64, 0.0f64),
        |(dot, na, nb), (&x, &y)| {
            let (x, y) = (x as f64, y as f64);
            (dot + x * y, na + x * x, nb + y * y)
        },
    );

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Encode a vector as `len × 4` little-endian bytes.
///
/// ```rust
/// use refinery_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.5f32, -1.0];
/// assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a blob written by [`vec_to_blob`]. Trailing partial words are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|w| f32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}
