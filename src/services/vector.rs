//! Pure embedding-vector math used by the clustering sync step: cosine
//! similarity for the graph edges, and mean/weighted-mean for recomputing a
//! cluster's centroid as members are added or merged in.

use pgvector::Vector;

pub fn cosine_similarity(a: &Vector, b: &Vector) -> f64 {
    let a = a.as_slice();
    let b = b.as_slice();
    debug_assert_eq!(a.len(), b.len());

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Unweighted mean, used when seeding a cluster centroid from its members.
pub fn mean(vectors: &[Vector]) -> Option<Vector> {
    let first = vectors.first()?;
    let dims = first.as_slice().len();
    let mut sums = vec![0.0f32; dims];
    for v in vectors {
        for (s, x) in sums.iter_mut().zip(v.as_slice()) {
            *s += *x;
        }
    }
    let n = vectors.len() as f32;
    for s in sums.iter_mut() {
        *s /= n;
    }
    Some(Vector::from(sums))
}

/// Weighted running mean, used to fold a new member into an existing
/// centroid without recomputing from every member on every insert:
/// `(centroid * count + new) / (count + 1)`.
pub fn weighted_fold(centroid: &Vector, count: i32, new: &Vector) -> Vector {
    let centroid = centroid.as_slice();
    let new = new.as_slice();
    debug_assert_eq!(centroid.len(), new.len());

    if count <= 0 {
        return Vector::from(new.to_vec());
    }
    let count = count as f32;
    let folded: Vec<f32> = centroid
        .iter()
        .zip(new.iter())
        .map(|(c, n)| (c * count + n) / (count + 1.0))
        .collect();
    Vector::from(folded)
}

/// Recompute a centroid after two clusters merge: the member-count-weighted
/// average of the two centroids.
pub fn merge_centroids(a: &Vector, a_count: i32, b: &Vector, b_count: i32) -> Vector {
    let a = a.as_slice();
    let b = b.as_slice();
    debug_assert_eq!(a.len(), b.len());

    let total = (a_count + b_count).max(1) as f32;
    let wa = a_count as f32 / total;
    let wb = b_count as f32 / total;
    let merged: Vec<f32> = a.iter().zip(b.iter()).map(|(x, y)| x * wa + y * wb).collect();
    Vector::from(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_is_symmetric() {
        let a = Vector::from(vec![1.0, 2.0, 3.0]);
        let b = Vector::from(vec![4.0, -1.0, 2.0]);
        assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let a = Vector::from(vec![1.0, 2.0, 3.0]);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_handles_zero_vector_without_dividing_by_zero() {
        let a = Vector::from(vec![0.0, 0.0, 0.0]);
        let b = Vector::from(vec![1.0, 2.0, 3.0]);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn mean_of_two_vectors_is_their_midpoint() {
        let vs = vec![Vector::from(vec![0.0, 0.0]), Vector::from(vec![2.0, 4.0])];
        let m = mean(&vs).unwrap();
        assert_eq!(m.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn weighted_fold_with_zero_count_returns_the_new_vector_unchanged() {
        let centroid = Vector::from(vec![9.0, 9.0]);
        let new = Vector::from(vec![1.0, 3.0]);
        let folded = weighted_fold(&centroid, 0, &new);
        assert_eq!(folded.as_slice(), new.as_slice());
    }

    #[test]
    fn weighted_fold_moves_centroid_toward_the_new_member() {
        let centroid = Vector::from(vec![0.0, 0.0]);
        let new = Vector::from(vec![4.0, 0.0]);
        let folded = weighted_fold(&centroid, 1, &new);
        assert_eq!(folded.as_slice(), &[2.0, 0.0]);
    }

    #[test]
    fn merge_centroids_weights_by_member_count() {
        let a = Vector::from(vec![0.0, 0.0]);
        let b = Vector::from(vec![10.0, 0.0]);
        let merged = merge_centroids(&a, 3, &b, 1);
        assert!((merged.as_slice()[0] - 2.5).abs() < 1e-5);
    }
}
