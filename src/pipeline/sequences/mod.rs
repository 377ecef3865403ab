
use std::collections::BTreeMap;

use super::models::{PlaylistRow, PlaylistSequence};

/// Group playlist rows into one sequence per playlist.
///
/// Sequences come out ordered by `playlist_id`, and the tracks inside each
/// sequence are ordered by `position`. Rows sharing a position keep their
/// input order.
#[inline]
pub fn extract_sequences(rows: &[PlaylistRow]) -> Vec<PlaylistSequence> {
    let mut grouped: BTreeMap<i64, Vec<&PlaylistRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.playlist_id).or_default().push(row);
    }

    grouped
        .into_iter()
        .map(|(playlist_id, mut tracks)| {
            tracks.sort_by_key(|row| row.position);
            PlaylistSequence {
                playlist_id,
                track_ids: tracks.into_iter().map(|row| row.track_id.clone()).collect(),
            }
        })
        .collect()
}
