use super::*;
use crate::database::sqlite::models::IndexKind;
use std::collections::BTreeMap;
use std::sync::Mutex;

const DIMS: usize = 3;

struct FakeSource {
    rows: Vec<PlaylistRow>,
    metadata: Vec<TrackMetadata>,
    filters: Mutex<Vec<String>>,
}

#[async_trait]
impl PlaylistSource for FakeSource {
    async fn playlist_rows(&self, filter: &str) -> crate::Result<Vec<PlaylistRow>> {
        self.filters
            .lock()
            .expect("lock")
            .push(filter.to_string());
        Ok(self.rows.clone())
    }

    async fn track_metadata(&self, _filter: &str) -> crate::Result<Vec<TrackMetadata>> {
        Ok(self.metadata.clone())
    }
}

#[derive(Default)]
struct RecordingSink {
    tables: Mutex<BTreeMap<String, Vec<TrackRecord>>>,
}

#[async_trait]
impl TableSink for RecordingSink {
    async fn replace_records(&self, table: &str, records: &[TrackRecord]) -> crate::Result<usize> {
        self.tables
            .lock()
            .expect("lock")
            .insert(table.to_string(), records.to_vec());
        Ok(records.len())
    }
}

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<Vec<TrackRecord>>>,
    fail: bool,
}

#[async_trait]
impl RecordPublisher for RecordingPublisher {
    async fn publish(&self, records: &[TrackRecord]) -> crate::Result<PublishReport> {
        if self.fail {
            return Err(RecsError::Database("store unavailable".to_string()));
        }
        self.published.lock().expect("lock").push(records.to_vec());
        Ok(PublishReport {
            collection: "track_vectors".to_string(),
            physical_table: "track_vectors__test".to_string(),
            index_name: "idx".to_string(),
            index_kind: IndexKind::Flat,
            inserted: records.len(),
            replaced: None,
        })
    }
}

/// Gives every track seen at least twice a vector derived from its name
struct CountingEmbedder;

impl SequenceEmbedder for CountingEmbedder {
    fn train(&self, corpus: &[PlaylistSequence]) -> crate::Result<EmbeddingModel> {
        let frequent: Vec<String> = count_tracks(corpus)
            .into_iter()
            .filter(|t| t.count >= 2)
            .map(|t| t.track_id)
            .collect();
        let vectors = frequent
            .iter()
            .flat_map(|id| {
                let seed = id.len() as f32;
                [seed, 1.0, -seed]
            })
            .collect();
        EmbeddingModel::from_parts(DIMS, frequent, vectors)
    }
}

/// Places point `i` at `(i, -i)`
struct IndexProjector;

impl Projector for IndexProjector {
    fn project(&self, vectors: &[Vec<f32>]) -> crate::Result<Vec<[f32; 2]>> {
        Ok((0..vectors.len())
            .map(|i| [i as f32, -(i as f32)])
            .collect())
    }
}

/// Loses the last point
struct ShortProjector;

impl Projector for ShortProjector {
    fn project(&self, vectors: &[Vec<f32>]) -> crate::Result<Vec<[f32; 2]>> {
        Ok(vec![[0.0, 0.0]; vectors.len().saturating_sub(1)])
    }
}

fn row(playlist_id: i64, track: &str, position: i64) -> PlaylistRow {
    PlaylistRow {
        playlist_id,
        track_id: track.to_string(),
        position,
    }
}

fn meta(track: &str, name: &str) -> TrackMetadata {
    TrackMetadata {
        track_id: track.to_string(),
        track_name: name.to_string(),
        artist_name: "Artist".to_string(),
    }
}

fn source() -> FakeSource {
    FakeSource {
        rows: vec![
            row(1, "t:aa", 0),
            row(1, "t:b", 1),
            row(1, "t:ccc", 2),
            row(2, "t:aa", 0),
            row(2, "t:b", 1),
            row(3, "t:aa", 0),
            row(3, "t:z", 1),
        ],
        metadata: vec![
            meta("t:aa", "First"),
            meta("t:b", "Second"),
            meta("t:aa", "Duplicate"),
            meta("t:z", "Last"),
        ],
        filters: Mutex::new(Vec::new()),
    }
}

struct Harness {
    source: Arc<FakeSource>,
    sink: Arc<RecordingSink>,
    publisher: Arc<RecordingPublisher>,
}

fn pipeline_with(
    top_k: usize,
    projector: Arc<dyn Projector>,
    publisher: RecordingPublisher,
) -> (Pipeline, Harness) {
    let harness = Harness {
        source: Arc::new(source()),
        sink: Arc::new(RecordingSink::default()),
        publisher: Arc::new(publisher),
    };
    let pipeline = Pipeline::new(
        PipelineConfig {
            top_k,
            num_followers: 1,
            num_tracks: 4,
        },
        "obt",
        Arc::clone(&harness.source) as Arc<dyn PlaylistSource>,
        Arc::clone(&harness.sink) as Arc<dyn TableSink>,
        Arc::new(CountingEmbedder),
        projector,
        Arc::clone(&harness.publisher) as Arc<dyn RecordPublisher>,
    );
    (pipeline, harness)
}

#[tokio::test]
async fn run_publishes_joined_records() {
    let (pipeline, harness) = pipeline_with(2, Arc::new(IndexProjector), RecordingPublisher::default());

    let report = pipeline.run().await.expect("pipeline succeeds");

    assert_eq!(report.playlist_rows, 7);
    assert_eq!(report.sequences, 3);
    assert_eq!(report.ranked_tracks, 2);
    assert_eq!(report.records, 2);
    assert_eq!(report.missing_vectors, 0);
    assert_eq!(report.publish.inserted, 2);
    assert_eq!(report.table_rows, 2);

    let published = harness.publisher.published.lock().expect("lock");
    let records = &published[0];
    assert_eq!(records[0].track_id, "t:aa");
    assert_eq!(records[0].popularity_count, 3);
    assert_eq!(records[0].track_name, "First");
    assert_eq!(records[0].two_d_coords, [0.0, 0.0]);
    assert_eq!(records[1].track_id, "t:b");
    assert_eq!(records[1].two_d_coords, [1.0, -1.0]);
    assert_eq!(records[1].embedding.len(), DIMS);

    let tables = harness.sink.tables.lock().expect("lock");
    assert_eq!(tables.get("obt"), Some(records));

    let filters = harness.source.filters.lock().expect("lock");
    assert_eq!(filters[0], "num_followers > 1 and num_tracks > 4");
}

#[tokio::test]
async fn tracks_without_vectors_are_dropped() {
    // t:ccc and t:z appear once, so only two of the four ranked tracks train
    let (pipeline, _harness) =
        pipeline_with(4, Arc::new(IndexProjector), RecordingPublisher::default());

    let report = pipeline.run().await.expect("pipeline succeeds");
    assert_eq!(report.ranked_tracks, 4);
    assert_eq!(report.vocabulary, 2);
    assert_eq!(report.missing_vectors, 2);
    assert_eq!(report.records, 2);
}

#[tokio::test]
async fn oversized_top_k_is_a_precondition_error() {
    let (pipeline, harness) =
        pipeline_with(50, Arc::new(IndexProjector), RecordingPublisher::default());

    let err = pipeline.run().await.expect_err("too few tracks");
    assert!(matches!(
        err.downcast_ref::<RecsError>(),
        Some(RecsError::Precondition(_))
    ));
    assert!(harness.publisher.published.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn misaligned_projection_stops_before_publish() {
    let (pipeline, harness) =
        pipeline_with(2, Arc::new(ShortProjector), RecordingPublisher::default());

    let err = pipeline.run().await.expect_err("length mismatch");
    assert!(matches!(
        err.downcast_ref::<RecsError>(),
        Some(RecsError::Projection(_))
    ));
    assert!(harness.publisher.published.lock().expect("lock").is_empty());
    assert!(harness.sink.tables.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn publish_failure_leaves_table_untouched() {
    let (pipeline, harness) = pipeline_with(
        2,
        Arc::new(IndexProjector),
        RecordingPublisher {
            fail: true,
            ..RecordingPublisher::default()
        },
    );

    assert!(pipeline.run().await.is_err());
    assert!(harness.sink.tables.lock().expect("lock").is_empty());
}

#[test]
fn select_vectors_keeps_rank_order() {
    let model = EmbeddingModel::from_parts(
        1,
        vec!["b".to_string(), "a".to_string()],
        vec![2.0, 1.0],
    )
    .expect("model");
    let ranked = vec![
        TrackPopularity {
            track_id: "a".to_string(),
            count: 5,
        },
        TrackPopularity {
            track_id: "missing".to_string(),
            count: 4,
        },
        TrackPopularity {
            track_id: "b".to_string(),
            count: 3,
        },
    ];

    let vectors = select_vectors(&model, &ranked).expect("some vectors");
    let ids: Vec<&str> = vectors.iter().map(|v| v.track_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(vectors[0].embedding, vec![1.0]);
}

#[test]
fn select_vectors_errors_when_nothing_trained() {
    let ranked = vec![TrackPopularity {
        track_id: "a".to_string(),
        count: 1,
    }];
    let result = select_vectors(&EmbeddingModel::new(4), &ranked);
    match result {
        Err(RecsError::Precondition(message)) => {
            assert!(message.contains("lower top_k"), "{}", message);
        }
        other => panic!("expected a precondition error, got {:?}", other),
    }
}

#[test]
fn project_vectors_checks_lengths() {
    let vectors = vec![
        TrackVector {
            track_id: "a".to_string(),
            embedding: vec![1.0],
        },
        TrackVector {
            track_id: "b".to_string(),
            embedding: vec![2.0],
        },
    ];

    let projected = project_vectors(&IndexProjector, &vectors).expect("aligned");
    assert_eq!(projected[1].track_id, "b");
    assert_eq!(projected[1].two_d_coords, [1.0, -1.0]);

    let result = project_vectors(&ShortProjector, &vectors);
    assert!(matches!(result, Err(RecsError::Projection(_))));
}
