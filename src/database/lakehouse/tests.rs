use super::*;
use arrow::array::StringArray;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::writer::FileWriter;
use tempfile::TempDir;

const SOURCE: &str = "spotify_playlists";

async fn create_test_lakehouse() -> (TempDir, Lakehouse) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let lakehouse = Lakehouse::open(temp_dir.path().join("lake"), Duration::from_secs(300))
        .await
        .expect("Failed to open lakehouse");
    (temp_dir, lakehouse)
}

/// (playlist_id, track_uri, pos, num_followers, num_tracks, track_name, artist_name)
type Row = (i64, &'static str, i64, i64, i64, &'static str, &'static str);

fn playlist_batch(rows: &[Row]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("playlist_id", DataType::Int64, false),
        Field::new("track_uri", DataType::Utf8, false),
        Field::new("pos", DataType::Int64, false),
        Field::new("num_followers", DataType::Int64, false),
        Field::new("num_tracks", DataType::Int64, false),
        Field::new("track_name", DataType::Utf8, false),
        Field::new("artist_name", DataType::Utf8, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(rows.iter().map(|r| r.0).collect::<Vec<_>>())),
            Arc::new(StringArray::from(rows.iter().map(|r| r.1).collect::<Vec<_>>())),
            Arc::new(Int64Array::from(rows.iter().map(|r| r.2).collect::<Vec<_>>())),
            Arc::new(Int64Array::from(rows.iter().map(|r| r.3).collect::<Vec<_>>())),
            Arc::new(Int64Array::from(rows.iter().map(|r| r.4).collect::<Vec<_>>())),
            Arc::new(StringArray::from(rows.iter().map(|r| r.5).collect::<Vec<_>>())),
            Arc::new(StringArray::from(rows.iter().map(|r| r.6).collect::<Vec<_>>())),
        ],
    )
    .expect("batch builds")
}

fn sample_rows() -> Vec<Row> {
    vec![
        (1, "t:a", 0, 5, 10, "A", "Drake"),
        (1, "t:b", 1, 5, 10, "B", "Eminem"),
        (2, "t:a", 0, 0, 10, "A", "Drake"),
        (3, "t:c", 0, 9, 2, "C", "Adele"),
    ]
}

async fn seed_source(lakehouse: &Lakehouse, branch: &str) {
    let batch = playlist_batch(&sample_rows());
    lakehouse
        .write_batches(branch, SOURCE, batch.schema(), vec![batch])
        .await
        .expect("seed source table");
}

fn track(id: &str, popularity: u64) -> TrackRecord {
    TrackRecord {
        track_id: id.to_string(),
        embedding: vec![0.5, 0.5],
        two_d_coords: [0.0, 1.0],
        popularity_count: popularity,
        track_name: id.to_uppercase(),
        artist_name: "Someone".to_string(),
    }
}

#[test]
fn branch_names_are_validated() {
    assert!(validate_branch_name("main").is_ok());
    assert!(validate_branch_name("spotify_ingestion").is_ok());
    assert!(validate_branch_name("user.feature-1").is_ok());
    assert!(validate_branch_name("").is_err());
    assert!(validate_branch_name(".hidden").is_err());
    assert!(validate_branch_name("a/b").is_err());
    assert!(validate_branch_name("a..b").is_err());
}

#[tokio::test]
async fn open_creates_main_branch() {
    let (_temp_dir, lakehouse) = create_test_lakehouse().await;
    assert_eq!(
        lakehouse.list_branches().await.expect("list"),
        vec!["main".to_string()]
    );
    assert!(lakehouse.has_branch(MAIN_BRANCH).await.expect("has"));
    assert!(!lakehouse.has_branch("dev").await.expect("has"));
}

#[tokio::test]
async fn filter_pushdown_on_playlist_rows() {
    let (_temp_dir, lakehouse) = create_test_lakehouse().await;
    seed_source(&lakehouse, MAIN_BRANCH).await;

    let mut rows = lakehouse
        .read_playlist_rows(MAIN_BRANCH, SOURCE, "num_followers > 1 and num_tracks > 4")
        .await
        .expect("read rows");
    rows.sort_by_key(|r| (r.playlist_id, r.position));

    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.playlist_id == 1));
    assert_eq!(rows[1].track_id, "t:b");

    let metadata = lakehouse
        .read_track_metadata(MAIN_BRANCH, SOURCE, "num_followers > 1 and num_tracks > 4")
        .await
        .expect("read metadata");
    assert_eq!(metadata.len(), 2);
}

#[tokio::test]
async fn missing_branch_and_table_are_not_found() {
    let (_temp_dir, lakehouse) = create_test_lakehouse().await;

    let result = lakehouse.read_track_table("nope", "any").await;
    assert!(matches!(result, Err(RecsError::NotFound(_))));

    let result = lakehouse.read_track_table(MAIN_BRANCH, "missing").await;
    assert!(matches!(result, Err(RecsError::NotFound(_))));
}

#[tokio::test]
async fn branches_are_isolated_until_merged() {
    let (_temp_dir, lakehouse) = create_test_lakehouse().await;
    seed_source(&lakehouse, MAIN_BRANCH).await;

    lakehouse
        .create_branch("dev", MAIN_BRANCH)
        .await
        .expect("create branch");
    assert!(lakehouse.has_table("dev", SOURCE).await.expect("has table"));

    lakehouse
        .replace_records("dev", "out", &[track("x", 1)], 2)
        .await
        .expect("write on dev");
    assert!(!lakehouse.has_table(MAIN_BRANCH, "out").await.expect("has table"));

    let merged = lakehouse
        .merge_branch("dev", MAIN_BRANCH)
        .await
        .expect("merge");
    assert!(merged.contains(&"out".to_string()));
    assert!(lakehouse.has_table(MAIN_BRANCH, "out").await.expect("has table"));
}

#[tokio::test]
async fn duplicate_branch_is_rejected() {
    let (_temp_dir, lakehouse) = create_test_lakehouse().await;
    lakehouse
        .create_branch("dev", MAIN_BRANCH)
        .await
        .expect("create branch");

    assert!(lakehouse.create_branch("dev", MAIN_BRANCH).await.is_err());
    assert!(lakehouse.create_branch("other", "missing").await.is_err());
}

#[tokio::test]
async fn main_cannot_be_deleted() {
    let (_temp_dir, lakehouse) = create_test_lakehouse().await;
    lakehouse
        .create_branch("dev", MAIN_BRANCH)
        .await
        .expect("create branch");

    assert!(lakehouse.delete_branch(MAIN_BRANCH).await.is_err());
    lakehouse.delete_branch("dev").await.expect("delete");
    assert!(!lakehouse.has_branch("dev").await.expect("has"));
}

#[tokio::test]
async fn track_table_is_ordered_and_cached() {
    let (_temp_dir, lakehouse) = create_test_lakehouse().await;
    lakehouse
        .replace_records(
            MAIN_BRANCH,
            "obt",
            &[track("low", 1), track("high", 9), track("mid", 5)],
            2,
        )
        .await
        .expect("write");

    let first = lakehouse
        .read_track_table(MAIN_BRANCH, "obt")
        .await
        .expect("read");
    let ids: Vec<&str> = first.iter().map(|r| r.track_id.as_str()).collect();
    assert_eq!(ids, vec!["high", "mid", "low"]);

    let second = lakehouse
        .read_track_table(MAIN_BRANCH, "obt")
        .await
        .expect("read");
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn replace_invalidates_cached_reads() {
    let (_temp_dir, lakehouse) = create_test_lakehouse().await;
    lakehouse
        .replace_records(MAIN_BRANCH, "obt", &[track("a", 1)], 2)
        .await
        .expect("write");
    let before = lakehouse
        .read_track_table(MAIN_BRANCH, "obt")
        .await
        .expect("read");
    assert_eq!(before.len(), 1);

    lakehouse
        .replace_records(MAIN_BRANCH, "obt", &[track("a", 1), track("b", 2)], 2)
        .await
        .expect("rewrite");
    let after = lakehouse
        .read_track_table(MAIN_BRANCH, "obt")
        .await
        .expect("read");
    assert_eq!(after.len(), 2);
}

#[tokio::test]
async fn import_replaces_table_from_ipc_files() {
    let (temp_dir, lakehouse) = create_test_lakehouse().await;

    let mut files = Vec::new();
    for (i, rows) in sample_rows().chunks(2).enumerate() {
        let batch = playlist_batch(rows);
        let path = temp_dir.path().join(format!("slice{}.arrow", i));
        let mut writer = FileWriter::try_new(File::create(&path).expect("create file"), &batch.schema())
            .expect("writer");
        writer.write(&batch).expect("write batch");
        writer.finish().expect("finish");
        files.push(path);
    }

    let imported = lakehouse
        .import_files(MAIN_BRANCH, SOURCE, &files)
        .await
        .expect("import");
    assert_eq!(imported, 4);

    let reimported = lakehouse
        .import_files(MAIN_BRANCH, SOURCE, &files[..1])
        .await
        .expect("reimport");
    assert_eq!(reimported, 2);

    assert!(lakehouse.import_files(MAIN_BRANCH, SOURCE, &[]).await.is_err());
}

#[tokio::test]
async fn branch_view_implements_source_and_sink() {
    let (_temp_dir, lakehouse) = create_test_lakehouse().await;
    seed_source(&lakehouse, MAIN_BRANCH).await;
    let lakehouse = Arc::new(lakehouse);
    let view = LakehouseBranch::new(Arc::clone(&lakehouse), MAIN_BRANCH, SOURCE, 2);

    let rows = view.playlist_rows("num_tracks > 4").await.expect("rows");
    assert_eq!(rows.len(), 3);

    let written = view
        .replace_records("obt", &[track("a", 3)])
        .await
        .expect("sink");
    assert_eq!(written, 1);
    assert_eq!(view.branch(), MAIN_BRANCH);
}

fn track_ids(records: &[TrackRecord]) -> Vec<&str> {
    records.iter().map(|r| r.track_id.as_str()).collect()
}

#[tokio::test]
async fn failed_overwrite_keeps_previous_table() {
    let (_temp_dir, lakehouse) = create_test_lakehouse().await;
    lakehouse
        .replace_records(MAIN_BRANCH, "obt", &[track("old", 1)], 2)
        .await
        .expect("write");
    let cached = lakehouse
        .read_track_table(MAIN_BRANCH, "obt")
        .await
        .expect("read");
    assert_eq!(track_ids(&cached), vec!["old"]);

    // the second batch never arrives, so the new version is never committed
    let batch = records_to_batch(&[track("new", 5)], 2).expect("batch");
    let result = lakehouse
        .overwrite_table(
            MAIN_BRANCH,
            "obt",
            track_record_schema(2),
            vec![
                Ok(batch),
                Err(ArrowError::ComputeError("source went away".to_string())),
            ],
        )
        .await;
    assert!(matches!(result, Err(RecsError::Lakehouse(_))));

    assert!(lakehouse.has_table(MAIN_BRANCH, "obt").await.expect("has table"));
    let after = lakehouse
        .read_track_table(MAIN_BRANCH, "obt")
        .await
        .expect("previous table still readable");
    assert!(!Arc::ptr_eq(&cached, &after));
    assert_eq!(track_ids(&after), vec!["old"]);
}

#[tokio::test]
async fn rejected_records_leave_table_untouched() {
    let (_temp_dir, lakehouse) = create_test_lakehouse().await;
    lakehouse
        .replace_records(MAIN_BRANCH, "obt", &[track("old", 1)], 2)
        .await
        .expect("write");

    let mut wide = track("wide", 3);
    wide.embedding = vec![0.1, 0.2, 0.3];
    assert!(
        lakehouse
            .replace_records(MAIN_BRANCH, "obt", &[wide], 2)
            .await
            .is_err()
    );

    let table = lakehouse
        .read_track_table(MAIN_BRANCH, "obt")
        .await
        .expect("read");
    assert_eq!(track_ids(&table), vec!["old"]);
}

#[tokio::test]
async fn merge_with_missing_table_changes_nothing() {
    let (_temp_dir, lakehouse) = create_test_lakehouse().await;
    lakehouse
        .replace_records(MAIN_BRANCH, "obt", &[track("main", 1)], 2)
        .await
        .expect("write on main");
    lakehouse
        .create_branch("dev", MAIN_BRANCH)
        .await
        .expect("create branch");
    lakehouse
        .replace_records("dev", "obt", &[track("dev", 2)], 2)
        .await
        .expect("write on dev");

    let result = lakehouse
        .merge_tables("dev", MAIN_BRANCH, &["obt", "missing"])
        .await;
    assert!(matches!(result, Err(RecsError::NotFound(_))));

    let table = lakehouse
        .read_track_table(MAIN_BRANCH, "obt")
        .await
        .expect("read");
    assert_eq!(track_ids(&table), vec!["main"]);
}

#[tokio::test]
async fn merge_tables_only_copies_named_tables() {
    let (_temp_dir, lakehouse) = create_test_lakehouse().await;
    lakehouse
        .create_branch("dev", MAIN_BRANCH)
        .await
        .expect("create branch");
    seed_source(&lakehouse, "dev").await;
    lakehouse
        .replace_records("dev", "obt", &[track("stale", 1)], 2)
        .await
        .expect("write on dev");
    lakehouse
        .replace_records(MAIN_BRANCH, "obt", &[track("fresh", 7)], 2)
        .await
        .expect("write on main");

    let merged = lakehouse
        .merge_tables("dev", MAIN_BRANCH, &[SOURCE])
        .await
        .expect("merge");
    assert_eq!(merged, vec![SOURCE.to_string()]);

    assert!(lakehouse.has_table(MAIN_BRANCH, SOURCE).await.expect("has table"));
    let table = lakehouse
        .read_track_table(MAIN_BRANCH, "obt")
        .await
        .expect("read");
    assert_eq!(track_ids(&table), vec!["fresh"]);
}
