
use itertools::Itertools;
use tracing::debug;

use super::models::{PlaylistSequence, TrackPopularity};
use crate::RecsError;

/// Count every track occurrence across all sequences.
#[inline]
pub fn count_tracks(sequences: &[PlaylistSequence]) -> Vec<TrackPopularity> {
    sequences
        .iter()
        .flat_map(|sequence| sequence.track_ids.iter())
        .counts()
        .into_iter()
        .map(|(track_id, count)| TrackPopularity {
            track_id: track_id.clone(),
            count: count as u64,
        })
        .collect()
}

/// Select exactly `top_k` tracks by descending occurrence count.
///
/// Equal counts are ordered by ascending track id so rankings are
/// reproducible. Asking for more tracks than exist is an error; the
/// result is never padded.
#[inline]
pub fn rank_popular_tracks(
    sequences: &[PlaylistSequence],
    top_k: usize,
) -> Result<Vec<TrackPopularity>, RecsError> {
    if top_k == 0 {
        return Err(RecsError::Precondition(
            "top_k must be a positive integer".to_string(),
        ));
    }

    let counts = count_tracks(sequences);
    debug!("Counted {} distinct tracks", counts.len());

    if counts.len() < top_k {
        return Err(RecsError::Precondition(format!(
            "requested the top {} tracks but only {} distinct tracks are available",
            top_k,
            counts.len()
        )));
    }

    let ranked: Vec<TrackPopularity> = counts
        .into_iter()
        .sorted_unstable_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.track_id.cmp(&b.track_id))
        })
        .take(top_k)
        .collect();

    Ok(ranked)
}
