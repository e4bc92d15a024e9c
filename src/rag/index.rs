//! In-memory vector index over the segments of one document.
//!
//! Queries are a brute-force cosine scan. An index is rebuilt wholesale and
//! never edited in place; once built it is shared behind an `Arc` and only
//! read, so concurrent queries need no locking.

use std::cmp::Ordering;

use serde::Serialize;

use super::chunker::Segment;
use crate::core::errors::PipelineError;

/// A segment returned from a query together with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredSegment {
    pub segment: Segment,
    /// Cosine similarity in `[-1, 1]` (higher = better).
    pub score: f32,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    segment: Segment,
    vector: Vec<f32>,
    norm: f64,
}

#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    dimension: usize,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(
        segments: Vec<Segment>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, PipelineError> {
        let mut index = Self::new();
        index.build(segments, vectors)?;
        Ok(index)
    }

    /// Replaces the contents with `segments` paired by position with
    /// `vectors`.
    ///
    /// On error the index is left empty.
    pub fn build(
        &mut self,
        segments: Vec<Segment>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<(), PipelineError> {
        self.entries.clear();
        self.dimension = 0;

        if segments.len() != vectors.len() {
            return Err(PipelineError::Index(format!(
                "segment/vector count mismatch: {} != {}",
                segments.len(),
                vectors.len()
            )));
        }

        let dimension = vectors.first().map(Vec::len).unwrap_or(0);
        if !vectors.is_empty() && dimension == 0 {
            return Err(PipelineError::Index(
                "vectors must not be empty".to_string(),
            ));
        }
        if let Some((position, vector)) = vectors
            .iter()
            .enumerate()
            .find(|(_, vector)| vector.len() != dimension)
        {
            return Err(PipelineError::Index(format!(
                "vector {} has dimension {}, expected {}",
                position,
                vector.len(),
                dimension
            )));
        }

        self.entries = segments
            .into_iter()
            .zip(vectors)
            .map(|(segment, vector)| {
                let norm = l2_norm(&vector);
                IndexEntry {
                    segment,
                    vector,
                    norm,
                }
            })
            .collect();
        self.dimension = dimension;

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vector dimension of the stored entries, `0` while empty.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns at most `min(k, len)` segments by descending similarity to
    /// `vector`; equal scores keep insertion order.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredSegment>, PipelineError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimension {
            return Err(PipelineError::Index(format!(
                "query vector has dimension {}, index expects {}",
                vector.len(),
                self.dimension
            )));
        }

        let query_norm = l2_norm(vector);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let score = cosine_with_norms(vector, query_norm, &entry.vector, entry.norm);
                (idx, score)
            })
            .collect();

        scored.sort_by(|left, right| {
            rank_key(right.1)
                .partial_cmp(&rank_key(left.1))
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.0.cmp(&right.0))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(idx, score)| ScoredSegment {
                segment: self.entries[idx].segment.clone(),
                score,
            })
            .collect())
    }
}

fn cosine_with_norms(a: &[f32], norm_a: f64, b: &[f32], norm_b: f64) -> f32 {
    let denom = norm_a * norm_b;
    if denom <= f64::EPSILON || !denom.is_finite() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();

    (dot / denom).clamp(-1.0, 1.0) as f32
}

fn l2_norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt()
}

// NaN sorts last.
fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx_eq(left: f32, right: f32) -> bool {
        (left - right).abs() < 1e-5
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        cosine_with_norms(a, l2_norm(a), b, l2_norm(b))
    }

    fn segment(position: usize) -> Segment {
        Segment {
            text: format!("segment {}", position),
            document: "uploads/doc.pdf".to_string(),
            position,
            start_offset: position * 10,
            overlap: 0,
        }
    }

    fn segments(count: usize) -> Vec<Segment> {
        (0..count).map(segment).collect()
    }

    #[test]
    fn cosine_is_one_for_identical_vectors() {
        let vec = vec![1.0, 2.0, 3.0, 4.0];
        assert!(approx_eq(cosine_similarity(&vec, &vec), 1.0));
    }

    #[test]
    fn cosine_is_zero_for_orthogonal_and_zero_vectors() {
        assert!(approx_eq(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0));
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn query_returns_highest_similarity_first() {
        let index = VectorIndex::from_pairs(
            segments(3),
            vec![vec![0.8, 0.2], vec![0.1, 0.9], vec![0.9, 0.0]],
        )
        .unwrap();

        let results = index.query(&[1.0, 0.0], 3).unwrap();

        let order: Vec<usize> = results.iter().map(|r| r.segment.position).collect();
        assert_eq!(order, vec![2, 0, 1]);
        assert!(results[0].score >= results[1].score);
        assert!(results[1].score >= results[2].score);
    }

    #[test]
    fn k_larger_than_index_returns_every_entry() {
        let index = VectorIndex::from_pairs(
            segments(3),
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
        )
        .unwrap();

        assert_eq!(index.query(&[1.0, 0.0], 5).unwrap().len(), 3);
        assert!(index.query(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = VectorIndex::from_pairs(
            segments(4),
            vec![
                vec![1.0, 0.0],
                vec![2.0, 0.0],
                vec![0.0, 1.0],
                vec![3.0, 0.0],
            ],
        )
        .unwrap();

        let order: Vec<usize> = index
            .query(&[1.0, 0.0], 4)
            .unwrap()
            .iter()
            .map(|r| r.segment.position)
            .collect();
        assert_eq!(order, vec![0, 1, 3, 2]);
    }

    #[test]
    fn zero_vectors_score_zero_instead_of_nan() {
        let index =
            VectorIndex::from_pairs(segments(2), vec![vec![0.0, 0.0], vec![1.0, 0.0]]).unwrap();

        let results = index.query(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results[0].segment.position, 1);
        assert_eq!(results[1].score, 0.0);

        let zero_query = index.query(&[0.0, 0.0], 2).unwrap();
        assert!(zero_query.iter().all(|r| r.score == 0.0));
        assert_eq!(zero_query[0].segment.position, 0);
    }

    #[test]
    fn build_rejects_mismatched_inputs_and_leaves_index_empty() {
        let mut index =
            VectorIndex::from_pairs(segments(1), vec![vec![1.0, 0.0]]).unwrap();

        let err = index.build(segments(2), vec![vec![1.0, 0.0]]).unwrap_err();
        assert!(matches!(err, PipelineError::Index(_)));
        assert!(index.is_empty());

        let err = index
            .build(segments(2), vec![vec![1.0, 0.0], vec![1.0]])
            .unwrap_err();
        assert!(matches!(err, PipelineError::Index(_)));
        assert_eq!(index.dimension(), 0);

        assert!(index.build(segments(1), vec![vec![]]).is_err());
    }

    #[test]
    fn build_replaces_previous_contents() {
        let mut index =
            VectorIndex::from_pairs(segments(3), vec![vec![1.0]; 3]).unwrap();
        index.build(segments(1), vec![vec![0.5, 0.5]]).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.dimension(), 2);
    }

    #[test]
    fn query_rejects_wrong_dimension() {
        let index = VectorIndex::from_pairs(segments(1), vec![vec![1.0, 0.0]]).unwrap();
        assert!(matches!(
            index.query(&[1.0, 0.0, 0.0], 1),
            Err(PipelineError::Index(_))
        ));
    }

    #[test]
    fn empty_index_returns_no_results() {
        let index = VectorIndex::new();
        assert!(index.query(&[1.0, 2.0], 4).unwrap().is_empty());
    }

    fn arb_vector(dim: usize) -> impl Strategy<Value = Vec<f32>> {
        proptest::collection::vec(-1.0f32..1.0f32, dim)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn query_is_bounded_ordered_and_deterministic(
            vectors in proptest::collection::vec(arb_vector(8), 0..20),
            query in arb_vector(8),
            k in 0usize..25,
        ) {
            let count = vectors.len();
            let first = VectorIndex::from_pairs(segments(count), vectors.clone()).unwrap();
            let second = VectorIndex::from_pairs(segments(count), vectors).unwrap();

            let results = first.query(&query, k).unwrap();
            prop_assert!(results.len() <= k.min(count));
            prop_assert_eq!(results.len(), k.min(count));
            for pair in results.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
                if pair[0].score == pair[1].score {
                    prop_assert!(pair[0].segment.position < pair[1].segment.position);
                }
            }
            prop_assert_eq!(results, second.query(&query, k).unwrap());
        }
    }
}
