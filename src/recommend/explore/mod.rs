
use crate::pipeline::models::TrackRecord;

/// Artists whose tracks are called out in the 2-D map
pub const HIGHLIGHTED_ARTISTS: [&str; 5] =
    ["Drake", "Kanye West", "Justin Bieber", "Ed Sheeran", "Eminem"];

pub const UNKNOWN_ARTIST: &str = "unknown";

/// Points of one artist label in the 2-D projection
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistGroup {
    pub artist: String,
    pub count: usize,
    pub centroid: [f32; 2],
}

fn label(artist_name: &str) -> &str {
    HIGHLIGHTED_ARTISTS
        .iter()
        .find(|highlighted| **highlighted == artist_name)
        .copied()
        .unwrap_or(UNKNOWN_ARTIST)
}

/// Group projected points by highlighted artist, everything else is "unknown".
///
/// Groups follow [`HIGHLIGHTED_ARTISTS`] order with "unknown" last; labels
/// without points are left out.
#[inline]
pub fn group_by_artist(records: &[TrackRecord]) -> Vec<ArtistGroup> {
    let labels: Vec<&str> = HIGHLIGHTED_ARTISTS
        .iter()
        .copied()
        .chain(std::iter::once(UNKNOWN_ARTIST))
        .collect();

    labels
        .into_iter()
        .filter_map(|artist| {
            let (count, sx, sy) = records
                .iter()
                .filter(|record| label(&record.artist_name) == artist)
                .fold((0_usize, 0.0_f32, 0.0_f32), |(n, sx, sy), record| {
                    (n + 1, sx + record.two_d_coords[0], sy + record.two_d_coords[1])
                });
            (count > 0).then(|| ArtistGroup {
                artist: artist.to_string(),
                count,
                centroid: [sx / count as f32, sy / count as f32],
            })
        })
        .collect()
}
