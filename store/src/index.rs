//! HNSW index over one owner's memories, using instant-distance.

use instant_distance::{Builder, HnswMap, Point, Search};
use ordered_float::OrderedFloat;
use std::collections::HashMap;

/// A point wrapper for instant-distance that stores an embedding vector.
#[derive(Clone, Debug)]
struct EmbeddingPoint {
    embedding: Vec<f32>,
}

impl Point for EmbeddingPoint {
    fn distance(&self, other: &Self) -> f32 {
        // Cosine distance = 1 - cosine_similarity, so smaller is closer.
        1.0 - cosine_similarity(&self.embedding, &other.embedding)
    }
}

/// Computes cosine similarity between two vectors.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (lhs, rhs) in a.iter().zip(b) {
        dot += lhs * rhs;
        norm_a += lhs * lhs;
        norm_b += rhs * rhs;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Approximate-nearest-neighbor index over the memories of a single owner.
///
/// Writes mark the index dirty; the next search rebuilds the HNSW graph.
/// Memory ids are the stable identities, positions are internal.
pub(crate) struct UserIndex {
    entries: Vec<(i64, Vec<f32>)>,
    id_to_pos: HashMap<i64, usize>,
    hnsw: Option<HnswMap<EmbeddingPoint, usize>>,
    dirty: bool,
}

impl UserIndex {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            id_to_pos: HashMap::new(),
            hnsw: None,
            dirty: false,
        }
    }

    /// Inserts a new embedding or replaces the embedding of an existing id.
    pub(crate) fn upsert(&mut self, id: i64, embedding: Vec<f32>) {
        if let Some(&pos) = self.id_to_pos.get(&id) {
            self.entries[pos].1 = embedding;
        } else {
            self.id_to_pos.insert(id, self.entries.len());
            self.entries.push((id, embedding));
        }
        self.dirty = true;
    }

    /// Returns up to `top_k` memory ids whose similarity to the query
    /// strictly exceeds `min_similarity`, best first.
    pub(crate) fn search(
        &mut self,
        query: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> Vec<(i64, f32)> {
        if self.entries.is_empty() || top_k == 0 {
            return Vec::new();
        }

        if self.dirty || self.hnsw.is_none() {
            self.rebuild();
        }

        let Some(ref hnsw) = self.hnsw else {
            return Vec::new();
        };

        let query_point = EmbeddingPoint {
            embedding: query.to_vec(),
        };

        let mut search = Search::default();
        let mut results = Vec::new();
        for candidate in hnsw.search(&query_point, &mut search).take(top_k) {
            let id = self.entries[*candidate.value].0;
            let similarity = 1.0 - candidate.distance;
            if similarity > min_similarity {
                results.push((id, similarity));
            }
        }

        results.sort_by_key(|&(_, similarity)| std::cmp::Reverse(OrderedFloat(similarity)));
        results
    }

    fn rebuild(&mut self) {
        if self.entries.is_empty() {
            self.hnsw = None;
            self.dirty = false;
            return;
        }

        let points: Vec<EmbeddingPoint> = self
            .entries
            .iter()
            .map(|(_, embedding)| EmbeddingPoint {
                embedding: embedding.clone(),
            })
            .collect();
        let positions: Vec<usize> = (0..self.entries.len()).collect();

        self.hnsw = Some(Builder::default().build(points, positions));
        self.dirty = false;
    }
}
