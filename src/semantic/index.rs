//! Flat inner-product vector index with a position -> document id map.
//!
//! Vectors are L2-normalised on insert so that the inner product equals
//! cosine similarity. Positions are assigned sequentially in insertion order
//! and the id map is kept inside the index, so the two can never drift apart.

use std::cmp::Ordering;
use std::collections::HashMap;

use rayon::prelude::*;

/// Below this many vectors scoring runs on the calling thread.
const PARALLEL_THRESHOLD: usize = 10_000;

/// Norm floor used by [`normalize`].
const NORM_EPSILON: f32 = 1e-10;

/// Divide `v` by its L2 norm, clamped to `1e-10`. A zero vector stays zero.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(NORM_EPSILON);
    v.iter().map(|x| x / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Search result from the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub position: usize,
    pub id: String,
    /// Cosine similarity, -1.0 to 1.0
    pub score: f32,
}

pub struct VectorIndex {
    dimensions: usize,
    /// Position -> document id
    ids: Vec<String>,
    /// Document id -> position
    positions: HashMap<String, usize>,
    /// Row-major normalised vectors, `ids.len() * dimensions` values
    vectors: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self::with_capacity(dimensions, 0)
    }

    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            dimensions,
            ids: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
            vectors: Vec::with_capacity(capacity * dimensions),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Append a vector for `id`, returning its position.
    pub fn add(&mut self, id: &str, vector: &[f32]) -> Result<usize, IndexError> {
        if self.dimensions == 0 {
            return Err(IndexError::InvalidDimension);
        }
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::NonFiniteValue(id.to_string()));
        }
        if self.positions.contains_key(id) {
            return Err(IndexError::DuplicateId(id.to_string()));
        }

        let position = self.ids.len();
        self.vectors.extend(normalize(vector));
        self.ids.push(id.to_string());
        self.positions.insert(id.to_string(), position);
        Ok(position)
    }

    #[cfg(test)]
    /// Document id stored at `position`.
    pub fn id_at(&self, position: usize) -> Option<&str> {
        self.ids.get(position).map(String::as_str)
    }

    #[cfg(test)]
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Normalised vector stored at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimensions)?;
        self.vectors.get(start..start + self.dimensions)
    }

    /// Iterate over `(id, normalised vector)` in position order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.ids
            .iter()
            .map(String::as_str)
            .zip(self.vectors.chunks_exact(self.dimensions.max(1)))
    }

    /// Return up to `top_k` nearest vectors by inner product with the
    /// normalised query, best first. Ties keep position order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }
        if self.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query = normalize(query);
        let score = |(position, vector): (usize, &[f32])| (position, dot(&query, vector));

        let mut scored: Vec<(usize, f32)> = if self.len() >= PARALLEL_THRESHOLD {
            self.vectors
                .par_chunks_exact(self.dimensions)
                .enumerate()
                .map(score)
                .collect()
        } else {
            self.vectors
                .chunks_exact(self.dimensions)
                .enumerate()
                .map(score)
                .collect()
        };

        let by_score = |a: &(usize, f32), b: &(usize, f32)| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        };

        let k = top_k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_score);
            scored.truncate(k);
        }
        scored.sort_by(by_score);

        Ok(scored
            .into_iter()
            .map(|(position, score)| SearchResult {
                position,
                id: self.ids[position].clone(),
                score,
            })
            .collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Duplicate document id '{0}'")]
    DuplicateId(String),

    #[error("Vector for '{0}' contains NaN or infinite values")]
    NonFiniteValue(String),

    #[error("Index dimension must be greater than zero")]
    InvalidDimension,
}
