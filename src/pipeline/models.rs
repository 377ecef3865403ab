use serde::{Deserialize, Serialize};

/// Track identifier, the dataset's `track_uri`
pub type TrackId = String;

/// One track slot of one playlist, as read from the lakehouse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRow {
    pub playlist_id: i64,
    pub track_id: TrackId,
    pub position: i64,
}

/// A playlist's tracks in playlist order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSequence {
    pub playlist_id: i64,
    pub track_ids: Vec<TrackId>,
}

/// Number of occurrences of a track across all sequences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPopularity {
    pub track_id: TrackId,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackVector {
    pub track_id: TrackId,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackProjection {
    pub track_id: TrackId,
    pub two_d_coords: [f32; 2],
}

/// Display metadata for a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub track_id: TrackId,
    pub track_name: String,
    pub artist_name: String,
}

/// A row of the published "one big table"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    #[serde(rename = "_id")]
    pub track_id: TrackId,
    #[serde(rename = "embeddings")]
    pub embedding: Vec<f32>,
    #[serde(rename = "two_d_vectors")]
    pub two_d_coords: [f32; 2],
    #[serde(rename = "popularity")]
    pub popularity_count: u64,
    pub track_name: String,
    pub artist_name: String,
}
