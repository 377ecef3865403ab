#[cfg(test)]
mod tests;

use std::collections::HashMap;

use itertools::Itertools;
use tracing::{info, warn};

use super::models::{
    TrackMetadata, TrackPopularity, TrackProjection, TrackRecord, TrackVector,
};
use crate::RecsError;

/// Result of joining vectors with popularity and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub records: Vec<TrackRecord>,
    pub missing_popularity: usize,
    pub missing_metadata: usize,
}

impl JoinOutcome {
    #[inline]
    pub fn dropped(&self) -> usize {
        self.missing_popularity + self.missing_metadata
    }
}

/// Keep one metadata row per track id; the first row seen wins.
#[inline]
pub fn dedupe_metadata(rows: Vec<TrackMetadata>) -> Vec<TrackMetadata> {
    let total = rows.len();
    let unique: Vec<TrackMetadata> = rows
        .into_iter()
        .unique_by(|row| row.track_id.clone())
        .collect();

    if unique.len() < total {
        info!(
            "Deduplicated track metadata from {} to {} rows",
            total,
            unique.len()
        );
    }

    unique
}

/// Inner join vectors, their projections, popularity and metadata on track id.
///
/// `projections` must be position-aligned with `vectors`. Records keep the
/// order of `vectors`; tracks without a popularity or metadata match are
/// dropped and counted.
#[inline]
pub fn join_records(
    vectors: &[TrackVector],
    projections: &[TrackProjection],
    popularity: &[TrackPopularity],
    metadata: &[TrackMetadata],
) -> Result<JoinOutcome, RecsError> {
    if vectors.len() != projections.len() {
        return Err(RecsError::Projection(format!(
            "{} projections for {} vectors",
            projections.len(),
            vectors.len()
        )));
    }

    let counts: HashMap<&str, u64> = popularity
        .iter()
        .map(|p| (p.track_id.as_str(), p.count))
        .collect();
    let names: HashMap<&str, &TrackMetadata> = metadata
        .iter()
        .map(|m| (m.track_id.as_str(), m))
        .collect();

    let mut outcome = JoinOutcome {
        records: Vec::with_capacity(vectors.len()),
        missing_popularity: 0,
        missing_metadata: 0,
    };

    for (vector, projection) in vectors.iter().zip(projections) {
        if vector.track_id != projection.track_id {
            return Err(RecsError::Projection(format!(
                "projection for {} is aligned with vector for {}",
                projection.track_id, vector.track_id
            )));
        }

        let Some(&count) = counts.get(vector.track_id.as_str()) else {
            outcome.missing_popularity += 1;
            continue;
        };
        let Some(meta) = names.get(vector.track_id.as_str()) else {
            outcome.missing_metadata += 1;
            continue;
        };

        outcome.records.push(TrackRecord {
            track_id: vector.track_id.clone(),
            embedding: vector.embedding.clone(),
            two_d_coords: projection.two_d_coords,
            popularity_count: count,
            track_name: meta.track_name.clone(),
            artist_name: meta.artist_name.clone(),
        });
    }

    if outcome.dropped() > 0 {
        warn!(
            "Dropped {} of {} tracks during join ({} without popularity, {} without metadata)",
            outcome.dropped(),
            vectors.len(),
            outcome.missing_popularity,
            outcome.missing_metadata
        );
    }

    Ok(outcome)
}
