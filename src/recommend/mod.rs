// Recommendation module
// Similarity queries over the published collection, gated on index readiness

pub mod explore;


use std::sync::Arc;

use tracing::{debug, info};

use crate::database::lancedb::{SearchHit, VectorStore};
use crate::{RecsError, Result};

pub use explore::{ArtistGroup, HIGHLIGHTED_ARTISTS, UNKNOWN_ARTIST, group_by_artist};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady { reason: String },
}

impl Readiness {
    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
    pub search_score: f32,
}

impl From<SearchHit> for Recommendation {
    #[inline]
    fn from(hit: SearchHit) -> Self {
        Self {
            track_id: hit.track_id,
            track_name: hit.track_name,
            artist_name: hit.artist_name,
            search_score: hit.score,
        }
    }
}

/// Result of a recommendation request. `NotReady` is a normal answer, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RecommendationOutcome {
    Ready(Vec<Recommendation>),
    NotReady(String),
}

pub struct RecommendationService {
    store: Arc<VectorStore>,
    limit: usize,
}

impl RecommendationService {
    #[inline]
    pub fn new(store: Arc<VectorStore>, limit: usize) -> Self {
        Self { store, limit }
    }

    #[inline]
    pub fn default_limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub async fn readiness(&self) -> Result<Readiness> {
        let readiness = match self.store.index_status().await? {
            None => Readiness::NotReady {
                reason: "no search index has been published yet".to_string(),
            },
            Some(status) if !status.queryable => Readiness::NotReady {
                reason: format!("search index {} is still building", status.index_name),
            },
            Some(status) => {
                debug!(
                    "Index {} is queryable ({} over {})",
                    status.index_name, status.index_kind, status.physical_table
                );
                Readiness::Ready
            }
        };
        Ok(readiness)
    }

    /// Tracks closest to `query`, `limit` defaults to the configured one
    #[inline]
    pub async fn recommend(
        &self,
        query: &[f32],
        limit: Option<usize>,
    ) -> Result<RecommendationOutcome> {
        if let Readiness::NotReady { reason } = self.readiness().await? {
            return Ok(RecommendationOutcome::NotReady(reason));
        }

        let limit = limit.unwrap_or(self.limit);
        let hits = self.store.search(query, limit).await?;
        info!("Found {} recommendations", hits.len());
        Ok(RecommendationOutcome::Ready(
            hits.into_iter().map(Recommendation::from).collect(),
        ))
    }

    /// Tracks similar to a published track, never the track itself
    #[inline]
    pub async fn recommend_for_track(
        &self,
        track_id: &str,
        limit: Option<usize>,
    ) -> Result<RecommendationOutcome> {
        if let Readiness::NotReady { reason } = self.readiness().await? {
            return Ok(RecommendationOutcome::NotReady(reason));
        }

        let record = self.store.get_record(track_id).await?.ok_or_else(|| {
            RecsError::NotFound(format!("track {} is not in the published collection", track_id))
        })?;

        let limit = limit.unwrap_or(self.limit);
        let mut hits = self.store.search(&record.embedding, limit + 1).await?;
        hits.retain(|hit| hit.track_id != track_id);
        hits.truncate(limit);

        Ok(RecommendationOutcome::Ready(
            hits.into_iter().map(Recommendation::from).collect(),
        ))
    }
}
