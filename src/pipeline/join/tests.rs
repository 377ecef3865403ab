use super::*;

fn meta(id: &str, name: &str, artist: &str) -> TrackMetadata {
    TrackMetadata {
        track_id: id.to_string(),
        track_name: name.to_string(),
        artist_name: artist.to_string(),
    }
}

fn vector(id: &str, seed: f32) -> TrackVector {
    TrackVector {
        track_id: id.to_string(),
        embedding: vec![seed, seed + 1.0, seed + 2.0],
    }
}

fn projection(id: &str, x: f32) -> TrackProjection {
    TrackProjection {
        track_id: id.to_string(),
        two_d_coords: [x, -x],
    }
}

fn popular(id: &str, count: u64) -> TrackPopularity {
    TrackPopularity {
        track_id: id.to_string(),
        count,
    }
}

#[test]
fn duplicate_metadata_collapses_to_first_row() {
    let rows = vec![meta("1", "A", "X"), meta("1", "A-dup", "X")];
    let unique = dedupe_metadata(rows);
    assert_eq!(unique, vec![meta("1", "A", "X")]);
}

#[test]
fn dedupe_keeps_first_seen_order() {
    let rows = vec![
        meta("2", "B", "Y"),
        meta("1", "A", "X"),
        meta("2", "B-late", "Y"),
        meta("3", "C", "Z"),
    ];
    let ids: Vec<String> = dedupe_metadata(rows)
        .into_iter()
        .map(|m| m.track_id)
        .collect();
    assert_eq!(ids, vec!["2", "1", "3"]);
}

#[test]
fn well_formed_join_keeps_every_track() {
    let vectors = vec![vector("3", 0.0), vector("1", 1.0)];
    let projections = vec![projection("3", 0.5), projection("1", 1.5)];
    let popularity = vec![popular("3", 3), popular("1", 2)];
    let metadata = vec![meta("1", "One", "Drake"), meta("3", "Three", "Eminem")];

    let outcome =
        join_records(&vectors, &projections, &popularity, &metadata).expect("join succeeds");

    assert_eq!(outcome.dropped(), 0);
    assert_eq!(outcome.records.len(), 2);
    let first = &outcome.records[0];
    assert_eq!(first.track_id, "3");
    assert_eq!(first.popularity_count, 3);
    assert_eq!(first.track_name, "Three");
    assert_eq!(first.artist_name, "Eminem");
    assert_eq!(first.two_d_coords, [0.5, -0.5]);
    assert_eq!(first.embedding, vec![0.0, 1.0, 2.0]);
}

#[test]
fn rows_without_metadata_or_popularity_are_dropped() {
    let vectors = vec![vector("a", 0.0), vector("b", 1.0), vector("c", 2.0)];
    let projections = vec![projection("a", 0.0), projection("b", 1.0), projection("c", 2.0)];
    let popularity = vec![popular("a", 5), popular("b", 4)];
    let metadata = vec![meta("a", "A", "X"), meta("c", "C", "Z")];

    let outcome =
        join_records(&vectors, &projections, &popularity, &metadata).expect("join succeeds");

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].track_id, "a");
    assert_eq!(outcome.missing_metadata, 1);
    assert_eq!(outcome.missing_popularity, 1);
    assert!(outcome.records.len() <= popularity.len());
}

#[test]
fn every_output_row_is_in_all_sources() {
    let vectors: Vec<TrackVector> = (0..10).map(|i| vector(&i.to_string(), i as f32)).collect();
    let projections: Vec<TrackProjection> = (0..10)
        .map(|i| projection(&i.to_string(), i as f32))
        .collect();
    let popularity: Vec<TrackPopularity> = (0..10)
        .filter(|i| i % 2 == 0)
        .map(|i| popular(&i.to_string(), 10 - i))
        .collect();
    let metadata: Vec<TrackMetadata> = (0..10)
        .filter(|i| i % 3 != 0)
        .map(|i| meta(&i.to_string(), "n", "a"))
        .collect();

    let outcome =
        join_records(&vectors, &projections, &popularity, &metadata).expect("join succeeds");

    assert!(outcome.records.len() <= popularity.len());
    for record in &outcome.records {
        assert!(vectors.iter().any(|v| v.track_id == record.track_id));
        assert!(popularity.iter().any(|p| p.track_id == record.track_id));
        assert!(metadata.iter().any(|m| m.track_id == record.track_id));
    }
    let ids: Vec<&str> = outcome.records.iter().map(|r| r.track_id.as_str()).collect();
    assert_eq!(ids, vec!["2", "4", "8"]);
}

#[test]
fn misaligned_projection_is_rejected() {
    let vectors = vec![vector("a", 0.0), vector("b", 1.0)];
    let projections = vec![projection("b", 0.0), projection("a", 1.0)];
    let result = join_records(&vectors, &projections, &[], &[]);
    assert!(matches!(result, Err(RecsError::Projection(_))));
}

#[test]
fn projection_length_mismatch_is_rejected() {
    let vectors = vec![vector("a", 0.0)];
    let result = join_records(&vectors, &[], &[popular("a", 1)], &[meta("a", "A", "X")]);
    assert!(matches!(result, Err(RecsError::Projection(_))));
}
