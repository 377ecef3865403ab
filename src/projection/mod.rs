// Projection module
// Reduces trained embeddings to 2-D coordinates for visualization

pub mod tsne;

use crate::Result;

pub use tsne::TsneProjector;

/// Maps a batch of equally sized vectors to 2-D points.
///
/// Output is position-aligned with the input: point `i` belongs to vector `i`.
pub trait Projector: Send + Sync {
    fn project(&self, vectors: &[Vec<f32>]) -> Result<Vec<[f32; 2]>>;
}
