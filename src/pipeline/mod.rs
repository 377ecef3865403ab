// Pipeline module
// Turns filtered playlist rows into the published "one big table": sequences,
// popularity ranking, embeddings, 2-D projection, metadata join, publish.

pub mod join;
pub mod models;
pub mod popularity;
pub mod sequences;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::RecsError;
use crate::config::PipelineConfig;
use crate::database::lancedb::PublishReport;
use crate::embeddings::{EmbeddingModel, SequenceEmbedder};
use crate::projection::Projector;

pub use join::{JoinOutcome, dedupe_metadata, join_records};
pub use models::{
    PlaylistRow, PlaylistSequence, TrackMetadata, TrackPopularity, TrackProjection, TrackRecord,
    TrackVector,
};
pub use popularity::{count_tracks, rank_popular_tracks};
pub use sequences::extract_sequences;

/// Where filtered playlist rows and track metadata come from
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn playlist_rows(&self, filter: &str) -> crate::Result<Vec<PlaylistRow>>;
    async fn track_metadata(&self, filter: &str) -> crate::Result<Vec<TrackMetadata>>;
}

/// Materializes the joined records as a table, replacing what was there
#[async_trait]
pub trait TableSink: Send + Sync {
    async fn replace_records(&self, table: &str, records: &[TrackRecord]) -> crate::Result<usize>;
}

/// Publishes the joined records for similarity search
#[async_trait]
pub trait RecordPublisher: Send + Sync {
    async fn publish(&self, records: &[TrackRecord]) -> crate::Result<PublishReport>;
}

/// What a pipeline run did, stage by stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub playlist_rows: usize,
    pub sequences: usize,
    pub ranked_tracks: usize,
    pub vocabulary: usize,
    /// Ranked tracks that never reached the trainer's minimum frequency
    pub missing_vectors: usize,
    pub records: usize,
    pub dropped_in_join: usize,
    pub publish: PublishReport,
    pub table_rows: usize,
}

pub struct Pipeline {
    config: PipelineConfig,
    output_table: String,
    source: Arc<dyn PlaylistSource>,
    sink: Arc<dyn TableSink>,
    embedder: Arc<dyn SequenceEmbedder>,
    projector: Arc<dyn Projector>,
    publisher: Arc<dyn RecordPublisher>,
}

impl Pipeline {
    #[inline]
    pub fn new(
        config: PipelineConfig,
        output_table: impl Into<String>,
        source: Arc<dyn PlaylistSource>,
        sink: Arc<dyn TableSink>,
        embedder: Arc<dyn SequenceEmbedder>,
        projector: Arc<dyn Projector>,
        publisher: Arc<dyn RecordPublisher>,
    ) -> Self {
        Self {
            config,
            output_table: output_table.into(),
            source,
            sink,
            embedder,
            projector,
            publisher,
        }
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage once, stopping at the first failure
    #[inline]
    pub async fn run(&self) -> Result<PipelineReport> {
        let filter = self.config.filter_expression();
        info!("Reading playlists where {}", filter);

        let rows = self
            .source
            .playlist_rows(&filter)
            .await
            .context("Failed to read playlist rows")?;
        let sequences = extract_sequences(&rows);
        info!(
            "Extracted {} playlist sequences from {} rows",
            sequences.len(),
            rows.len()
        );

        let ranked = rank_popular_tracks(&sequences, self.config.top_k)
            .context("Failed to rank popular tracks")?;
        if let Some(top) = ranked.first() {
            debug!("Top track {} has {} occurrences", top.track_id, top.count);
        }

        let sequence_count = sequences.len();
        let embedder = Arc::clone(&self.embedder);
        let model = tokio::task::spawn_blocking(move || embedder.train(&sequences))
            .await
            .context("Embedding task failed to complete")?
            .context("Failed to train track embeddings")?;
        info!("Trained {} track vectors", model.len());

        let vectors = select_vectors(&model, &ranked)?;
        let missing_vectors = ranked.len() - vectors.len();

        let projector = Arc::clone(&self.projector);
        let (vectors, projections) = tokio::task::spawn_blocking(move || {
            let projections = project_vectors(projector.as_ref(), &vectors);
            (vectors, projections)
        })
        .await
        .context("Projection task failed to complete")?;
        let projections = projections.context("Failed to project track vectors")?;

        let metadata = self
            .source
            .track_metadata(&filter)
            .await
            .context("Failed to read track metadata")?;
        let metadata = dedupe_metadata(metadata);

        let outcome = join_records(&vectors, &projections, &ranked, &metadata)
            .context("Failed to join track records")?;

        let publish = self
            .publisher
            .publish(&outcome.records)
            .await
            .context("Failed to publish track vectors")?;

        let table_rows = self
            .sink
            .replace_records(&self.output_table, &outcome.records)
            .await
            .with_context(|| format!("Failed to write table {}", self.output_table))?;

        info!(
            "Pipeline finished: {} records published to {}, {} rows in {}",
            publish.inserted, publish.collection, table_rows, self.output_table
        );

        Ok(PipelineReport {
            playlist_rows: rows.len(),
            sequences: sequence_count,
            ranked_tracks: ranked.len(),
            vocabulary: model.len(),
            missing_vectors,
            records: outcome.records.len(),
            dropped_in_join: outcome.dropped(),
            publish,
            table_rows,
        })
    }
}

/// Vectors for the ranked tracks, in rank order.
///
/// Ranked tracks the model has no vector for are dropped and logged. An
/// empty result is an error: there would be nothing to project or publish.
#[inline]
pub fn select_vectors(
    model: &EmbeddingModel,
    ranked: &[TrackPopularity],
) -> crate::Result<Vec<TrackVector>> {
    let vectors: Vec<TrackVector> = ranked
        .iter()
        .filter_map(|track| {
            model.get(&track.track_id).map(|embedding| TrackVector {
                track_id: track.track_id.clone(),
                embedding: embedding.to_vec(),
            })
        })
        .collect();

    let missing = ranked.len() - vectors.len();
    if missing > 0 {
        warn!(
            "{} of the {} top tracks have no vector and were dropped",
            missing,
            ranked.len()
        );
    }

    if vectors.is_empty() {
        return Err(RecsError::Precondition(
            "none of the top tracks received a vector, lower min_count or lower top_k".to_string(),
        ));
    }

    Ok(vectors)
}

/// Project `vectors` to 2-D and pair each point with its track by position
#[inline]
pub fn project_vectors(
    projector: &dyn Projector,
    vectors: &[TrackVector],
) -> crate::Result<Vec<TrackProjection>> {
    let embeddings: Vec<Vec<f32>> = vectors.iter().map(|v| v.embedding.clone()).collect();
    let points = projector.project(&embeddings)?;

    if points.len() != vectors.len() {
        return Err(RecsError::Projection(format!(
            "projector returned {} points for {} vectors",
            points.len(),
            vectors.len()
        )));
    }

    Ok(vectors
        .iter()
        .zip(points)
        .map(|(vector, two_d_coords)| TrackProjection {
            track_id: vector.track_id.clone(),
            two_d_coords,
        })
        .collect())
}
