// Ingest module
// Flattens dataset slice files into per-track rows, stages them as Arrow IPC
// files and loads them into the lakehouse through an ingestion branch


use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::RecsError;
use crate::config::LakehouseConfig;
use crate::database::lakehouse::Lakehouse;

/// One dataset slice file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceFile {
    pub playlists: Vec<RawPlaylist>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPlaylist {
    pub name: String,
    pub pid: i64,
    pub num_followers: i64,
    pub modified_at: i64,
    pub num_tracks: i64,
    pub num_albums: i64,
    pub tracks: Vec<RawTrack>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTrack {
    pub pos: i64,
    pub artist_name: String,
    pub track_uri: String,
    pub artist_uri: String,
    pub track_name: String,
    pub album_uri: String,
    pub album_name: String,
    pub duration_ms: i64,
}

/// Playlist fields merged with one of its tracks; one source table row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatTrackRow {
    pub playlist_name: String,
    pub playlist_id: i64,
    pub num_followers: i64,
    pub modified_at: i64,
    pub num_tracks: i64,
    pub num_albums: i64,
    pub pos: i64,
    pub artist_name: String,
    pub track_uri: String,
    pub artist_uri: String,
    pub track_name: String,
    pub album_uri: String,
    pub album_name: String,
    pub duration_ms: i64,
}

#[inline]
pub fn flatten_playlist(playlist: &RawPlaylist) -> Vec<FlatTrackRow> {
    playlist
        .tracks
        .iter()
        .map(|track| FlatTrackRow {
            playlist_name: playlist.name.clone(),
            playlist_id: playlist.pid,
            num_followers: playlist.num_followers,
            modified_at: playlist.modified_at,
            num_tracks: playlist.num_tracks,
            num_albums: playlist.num_albums,
            pos: track.pos,
            artist_name: track.artist_name.clone(),
            track_uri: track.track_uri.clone(),
            artist_uri: track.artist_uri.clone(),
            track_name: track.track_name.clone(),
            album_uri: track.album_uri.clone(),
            album_name: track.album_name.clone(),
            duration_ms: track.duration_ms,
        })
        .collect()
}

#[inline]
pub fn flat_rows_schema() -> SchemaRef {
    let text = |name: &str| Field::new(name, DataType::Utf8, false);
    let int = |name: &str| Field::new(name, DataType::Int64, false);
    Arc::new(Schema::new(vec![
        text("playlist_name"),
        int("playlist_id"),
        int("num_followers"),
        int("modified_at"),
        int("num_tracks"),
        int("num_albums"),
        int("pos"),
        text("artist_name"),
        text("track_uri"),
        text("artist_uri"),
        text("track_name"),
        text("album_uri"),
        text("album_name"),
        int("duration_ms"),
    ]))
}

#[inline]
pub fn rows_to_batch(rows: &[FlatTrackRow]) -> crate::Result<RecordBatch> {
    fn text<'a>(rows: &'a [FlatTrackRow], f: impl Fn(&'a FlatTrackRow) -> &'a str) -> ArrayRef {
        Arc::new(StringArray::from(rows.iter().map(f).collect::<Vec<_>>()))
    }
    fn int(rows: &[FlatTrackRow], f: impl Fn(&FlatTrackRow) -> i64) -> ArrayRef {
        Arc::new(Int64Array::from(rows.iter().map(f).collect::<Vec<_>>()))
    }

    let columns = vec![
        text(rows, |r| r.playlist_name.as_str()),
        int(rows, |r| r.playlist_id),
        int(rows, |r| r.num_followers),
        int(rows, |r| r.modified_at),
        int(rows, |r| r.num_tracks),
        int(rows, |r| r.num_albums),
        int(rows, |r| r.pos),
        text(rows, |r| r.artist_name.as_str()),
        text(rows, |r| r.track_uri.as_str()),
        text(rows, |r| r.artist_uri.as_str()),
        text(rows, |r| r.track_name.as_str()),
        text(rows, |r| r.album_uri.as_str()),
        text(rows, |r| r.album_name.as_str()),
        int(rows, |r| r.duration_ms),
    ];

    RecordBatch::try_new(flat_rows_schema(), columns)
        .map_err(|e| RecsError::Ingest(format!("Failed to build row batch: {}", e)))
}

/// A slice file converted to one staged Arrow IPC file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub source: PathBuf,
    pub staged: PathBuf,
    pub playlists: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub source: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub staged: Vec<StagedFile>,
    pub failed: Vec<FailedFile>,
    pub imported_rows: usize,
    pub ingestion_branch: String,
    pub merged_into: String,
}

/// Parse one slice file and write its flattened rows to `staging_dir`
#[inline]
pub fn parse_and_stage(json_file: &Path, staging_dir: &Path) -> crate::Result<StagedFile> {
    let file = File::open(json_file)?;
    let slice: SliceFile = serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| RecsError::Ingest(format!("{}: {}", json_file.display(), e)))?;

    let rows: Vec<FlatTrackRow> = slice.playlists.iter().flat_map(flatten_playlist).collect();
    let batch = rows_to_batch(&rows)?;

    let stem = json_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| RecsError::Ingest(format!("{} has no file name", json_file.display())))?;
    let staged = staging_dir.join(format!("{}.arrow", stem));

    let mut writer = FileWriter::try_new(File::create(&staged)?, &flat_rows_schema())
        .map_err(|e| RecsError::Ingest(format!("Failed to open {}: {}", staged.display(), e)))?;
    writer
        .write(&batch)
        .map_err(|e| RecsError::Ingest(format!("Failed to write {}: {}", staged.display(), e)))?;
    writer
        .finish()
        .map_err(|e| RecsError::Ingest(format!("Failed to finish {}: {}", staged.display(), e)))?;

    debug!(
        "Staged {} rows from {} as {}",
        rows.len(),
        json_file.display(),
        staged.display()
    );

    Ok(StagedFile {
        source: json_file.to_path_buf(),
        staged,
        playlists: slice.playlists.len(),
        rows: rows.len(),
    })
}

/// `*.json` files directly inside `dir`, sorted by name
#[inline]
pub async fn list_slice_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub struct Ingestor {
    lakehouse: Arc<Lakehouse>,
    config: LakehouseConfig,
    staging_root: PathBuf,
}

impl Ingestor {
    #[inline]
    pub fn new(lakehouse: Arc<Lakehouse>, config: LakehouseConfig, staging_root: PathBuf) -> Self {
        Self {
            lakehouse,
            config,
            staging_root,
        }
    }

    /// Stage every file on a bounded pool; a failing file never stops the others
    #[inline]
    pub async fn stage_files(
        &self,
        files: &[PathBuf],
        staging_dir: &Path,
    ) -> (Vec<StagedFile>, Vec<FailedFile>) {
        let semaphore = Arc::new(Semaphore::new(self.config.ingest_workers.max(1)));
        let mut tasks = JoinSet::new();

        let bar = if console::user_attended_stderr() {
            ProgressBar::new(files.len() as u64).with_style(
                ProgressStyle::with_template("{bar:40} [{pos}/{len}] Staging {msg}")
                    .expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        };

        for file in files {
            let source = file.clone();
            let staging_dir = staging_dir.to_path_buf();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        let path = source.clone();
                        tokio::task::spawn_blocking(move || parse_and_stage(&path, &staging_dir))
                            .await
                            .unwrap_or_else(|e| {
                                Err(RecsError::Ingest(format!("staging task failed: {}", e)))
                            })
                    }
                    Err(e) => Err(RecsError::Ingest(format!("worker pool closed: {}", e))),
                };
                (source, result)
            });
        }

        let mut staged = Vec::new();
        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            bar.inc(1);
            match joined {
                Ok((_, Ok(file))) => {
                    bar.set_message(file.source.display().to_string());
                    staged.push(file);
                }
                Ok((source, Err(e))) => {
                    error!("Failed to stage {}: {}", source.display(), e);
                    failed.push(FailedFile {
                        source,
                        error: e.to_string(),
                    });
                }
                Err(e) => error!("Staging worker panicked: {}", e),
            }
        }
        bar.finish_and_clear();

        staged.sort_by(|a, b| a.source.cmp(&b.source));
        failed.sort_by(|a, b| a.source.cmp(&b.source));
        (staged, failed)
    }

    /// Load every slice file in `dir` into the source table on the main branch.
    ///
    /// Rows land on the ingestion branch first and reach the main branch by merge.
    #[inline]
    pub async fn ingest_directory(&self, dir: &Path) -> Result<IngestReport> {
        let files = list_slice_files(dir).await?;
        if files.is_empty() {
            anyhow::bail!("No .json slice files found in {}", dir.display());
        }
        info!("Ingesting {} slice files from {}", files.len(), dir.display());

        let staging_dir = self
            .staging_root
            .join(Uuid::new_v4().simple().to_string());
        tokio::fs::create_dir_all(&staging_dir)
            .await
            .with_context(|| format!("Failed to create {}", staging_dir.display()))?;

        let (staged, failed) = self.stage_files(&files, &staging_dir).await;
        if !failed.is_empty() {
            warn!("{} of {} files failed to stage", failed.len(), files.len());
        }

        let result = self.load_staged(&staged).await;
        if let Err(e) = tokio::fs::remove_dir_all(&staging_dir).await {
            warn!("Failed to clean up {}: {}", staging_dir.display(), e);
        }
        let imported_rows = result?;

        Ok(IngestReport {
            staged,
            failed,
            imported_rows,
            ingestion_branch: self.config.ingestion_branch.clone(),
            merged_into: self.config.branch.clone(),
        })
    }

    async fn load_staged(&self, staged: &[StagedFile]) -> Result<usize> {
        if staged.is_empty() {
            return Err(RecsError::Ingest("no files were staged, nothing to import".to_string()).into());
        }

        let branch = &self.config.ingestion_branch;
        if !self.lakehouse.has_branch(branch).await? {
            self.lakehouse
                .create_branch(branch, &self.config.branch)
                .await
                .with_context(|| format!("Failed to create ingestion branch {}", branch))?;
        }

        let paths: Vec<PathBuf> = staged.iter().map(|s| s.staged.clone()).collect();
        let rows = self
            .lakehouse
            .import_files(branch, &self.config.source_table, &paths)
            .await
            .with_context(|| format!("Failed to import into {}", self.config.source_table))?;

        // only the freshly imported table goes back; outputs the ingestion
        // branch may hold from earlier runs stay where they are
        self.lakehouse
            .merge_tables(branch, &self.config.branch, &[self.config.source_table.as_str()])
            .await
            .with_context(|| format!("Failed to merge {} into {}", branch, self.config.branch))?;

        info!(
            "Imported {} rows into {} and merged {} into {}",
            rows, self.config.source_table, branch, self.config.branch
        );
        Ok(rows)
    }
}
