//! Vector similarity functions.

use ndarray::{Array2, ArrayView1};

/// Full pairwise cosine-similarity matrix. All vectors must share one
/// dimension. Zero vectors are similar to nothing, themselves included.
pub fn similarity_matrix(vectors: &[Vec<f32>]) -> Array2<f32> {
    let n = vectors.len();
    let dims = vectors.first().map_or(0, Vec::len);

    let mut normalized = Array2::<f32>::zeros((n, dims));
    for (i, vector) in vectors.iter().enumerate() {
        let row = ArrayView1::from(vector.as_slice());
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 && vector.len() == dims {
            normalized.row_mut(i).assign(&row.mapv(|x| x / norm));
        }
    }

    let mut similarity = normalized.dot(&normalized.t());
    similarity.mapv_inplace(|s| if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 });
    similarity
}

/// `distance = 1 - similarity`, with the diagonal pinned to zero.
pub fn distance_matrix(similarity: &Array2<f32>) -> Array2<f32> {
    let mut distance = similarity.mapv(|s| 1.0 - s);
    for i in 0..distance.nrows().min(distance.ncols()) {
        distance[[i, i]] = 0.0;
    }
    distance
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    #[test]
    fn test_matrix_matches_pairwise_cosine() {
        let vectors = vec![vec![3.0, 4.0], vec![4.0, 3.0], vec![-3.0, -4.0]];
        let sim = similarity_matrix(&vectors);

        assert_eq!(sim.dim(), (3, 3));
        assert!(approx_eq(sim[[0, 1]], 0.96));
        assert!(approx_eq(sim[[1, 0]], 0.96));
        assert!(approx_eq(sim[[0, 2]], -1.0));
        assert!(approx_eq(sim[[0, 0]], 1.0));
    }

    #[test]
    fn test_distance_matrix() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 0.0]];
        let dist = distance_matrix(&similarity_matrix(&vectors));

        assert!(approx_eq(dist[[0, 1]], 1.0));
        assert_eq!(dist[[0, 0]], 0.0);
        assert_eq!(dist[[2, 2]], 0.0);
        assert!(approx_eq(dist[[0, 2]], 1.0));
    }
}
