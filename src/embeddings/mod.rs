// Embeddings module
// Sequence-to-vector training over playlist track sequences

pub mod skipgram;


use std::collections::HashMap;

use crate::Result;
use crate::pipeline::models::{PlaylistSequence, TrackId};

pub use skipgram::SkipGramTrainer;

/// Trains one fixed-length vector per frequent track from a sequence corpus
pub trait SequenceEmbedder: Send + Sync {
    fn train(&self, corpus: &[PlaylistSequence]) -> Result<EmbeddingModel>;
}

/// Trained vocabulary-to-vector mapping
#[derive(Debug, Clone, Default)]
pub struct EmbeddingModel {
    dimension: usize,
    index: HashMap<TrackId, usize>,
    vectors: Vec<f32>,
}

impl EmbeddingModel {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            index: HashMap::new(),
            vectors: Vec::new(),
        }
    }

    /// Build a model from a vocabulary and its row-major vectors
    #[inline]
    pub fn from_parts(
        dimension: usize,
        vocabulary: Vec<TrackId>,
        vectors: Vec<f32>,
    ) -> Result<Self> {
        if vectors.len() != vocabulary.len() * dimension {
            return Err(crate::RecsError::Embedding(format!(
                "{} values cannot hold {} vectors of dimension {}",
                vectors.len(),
                vocabulary.len(),
                dimension
            )));
        }

        let index = vocabulary
            .into_iter()
            .enumerate()
            .map(|(row, token)| (token, row))
            .collect();

        Ok(Self {
            dimension,
            index,
            vectors,
        })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of trained vectors
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub fn contains(&self, track_id: &str) -> bool {
        self.index.contains_key(track_id)
    }

    /// Vector for a track, `None` when the track did not reach the minimum frequency
    #[inline]
    pub fn get(&self, track_id: &str) -> Option<&[f32]> {
        let row = *self.index.get(track_id)?;
        let start = row * self.dimension;
        self.vectors.get(start..start + self.dimension)
    }
}

/// Cosine similarity of two equally sized vectors, 0.0 when either is all zeros
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (x, y) in a.iter().zip(b) {
        dot = x.mul_add(*y, dot);
        norm_a = x.mul_add(*x, norm_a);
        norm_b = y.mul_add(*y, norm_b);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
