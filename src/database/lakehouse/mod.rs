// Lakehouse module
// Branch-scoped columnar tables. Each branch is its own LanceDB directory
// under the lakehouse root, so writes on one branch never leak into another.

#[cfg(test)]
mod tests;

pub mod cache;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Array, Int64Array, RecordBatchIterator};
use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::ipc::reader::FileReader;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use lancedb::database::CreateTableMode;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, Table};
use tracing::{debug, info};

use crate::config::Config;
use crate::database::lancedb::{
    POPULARITY_FIELD, batch_to_records, collect_batches, records_to_batch, string_column,
    track_record_schema,
};
use crate::pipeline::models::{PlaylistRow, TrackMetadata, TrackRecord};
use crate::pipeline::{PlaylistSource, TableSink};
use crate::{RecsError, Result};

pub use cache::QueryCache;

pub const MAIN_BRANCH: &str = "main";

pub const PLAYLIST_ID_COLUMN: &str = "playlist_id";
pub const TRACK_URI_COLUMN: &str = "track_uri";
pub const POSITION_COLUMN: &str = "pos";
pub const TRACK_NAME_COLUMN: &str = "track_name";
pub const ARTIST_NAME_COLUMN: &str = "artist_name";

/// Branch names are directory names: alphanumeric start, then `[A-Za-z0-9._-]`
#[inline]
pub fn validate_branch_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid_start && valid_rest && !name.contains("..") {
        Ok(())
    } else {
        Err(RecsError::Lakehouse(format!("invalid branch name '{}'", name)))
    }
}

pub struct Lakehouse {
    root: PathBuf,
    cache: QueryCache<Vec<TrackRecord>>,
}

impl Lakehouse {
    /// Open the lakehouse at `root`, creating it with an empty `main` branch
    #[inline]
    pub async fn open<P: Into<PathBuf>>(root: P, cache_ttl: Duration) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(MAIN_BRANCH))
            .await
            .map_err(|e| {
                RecsError::Lakehouse(format!(
                    "Failed to create lakehouse at {}: {}",
                    root.display(),
                    e
                ))
            })?;

        debug!("Lakehouse opened at {}", root.display());
        Ok(Self {
            root,
            cache: QueryCache::new(cache_ttl),
        })
    }

    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::open(
            config.lakehouse_root(),
            Duration::from_secs(config.lakehouse.cache_ttl_seconds),
        )
        .await
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn cache(&self) -> &QueryCache<Vec<TrackRecord>> {
        &self.cache
    }

    fn branch_dir(&self, branch: &str) -> Result<PathBuf> {
        validate_branch_name(branch)?;
        Ok(self.root.join(branch))
    }

    #[inline]
    pub async fn has_branch(&self, branch: &str) -> Result<bool> {
        let dir = self.branch_dir(branch)?;
        Ok(tokio::fs::metadata(&dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false))
    }

    #[inline]
    pub async fn list_branches(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut branches = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_branch_name(&name).is_ok() {
                branches.push(name);
            }
        }
        branches.sort();
        Ok(branches)
    }

    async fn require_branch(&self, branch: &str) -> Result<PathBuf> {
        if self.has_branch(branch).await? {
            self.branch_dir(branch)
        } else {
            Err(RecsError::NotFound(format!(
                "branch '{}' does not exist",
                branch
            )))
        }
    }

    /// Fork `from` into a new branch holding copies of all its tables
    #[inline]
    pub async fn create_branch(&self, branch: &str, from: &str) -> Result<()> {
        if self.has_branch(branch).await? {
            return Err(RecsError::Lakehouse(format!(
                "branch '{}' already exists",
                branch
            )));
        }
        self.require_branch(from).await?;

        let dir = self.branch_dir(branch)?;
        tokio::fs::create_dir_all(&dir).await?;
        let names = self.table_names(from).await?;
        let copied = self.copy_tables(from, branch, &names).await?;
        info!(
            "Created branch {} from {} with {} tables",
            branch,
            from,
            copied.len()
        );
        Ok(())
    }

    /// Replace every table of `into` that also exists on `source` with the
    /// source's version and add the ones `into` lacks. Returns merged names.
    #[inline]
    pub async fn merge_branch(&self, source: &str, into: &str) -> Result<Vec<String>> {
        let names = self.table_names(source).await?;
        self.merge_tables(source, into, &names).await
    }

    /// Merge only `tables` from `source` into `into`; other tables of `into` are untouched
    #[inline]
    pub async fn merge_tables<S: AsRef<str>>(
        &self,
        source: &str,
        into: &str,
        tables: &[S],
    ) -> Result<Vec<String>> {
        self.require_branch(source).await?;
        self.require_branch(into).await?;

        let merged = self.copy_tables(source, into, tables).await?;
        self.cache.invalidate_branch(into);
        info!("Merged {} tables from {} into {}", merged.len(), source, into);
        Ok(merged)
    }

    #[inline]
    pub async fn delete_branch(&self, branch: &str) -> Result<()> {
        if branch == MAIN_BRANCH {
            return Err(RecsError::Lakehouse(
                "the main branch cannot be deleted".to_string(),
            ));
        }
        let dir = self.require_branch(branch).await?;
        tokio::fs::remove_dir_all(&dir).await?;
        self.cache.invalidate_branch(branch);
        info!("Deleted branch {}", branch);
        Ok(())
    }

    /// Every source table is read before the first write, so a failed read
    /// leaves `to` unchanged. Each table is then overwritten on its own.
    async fn copy_tables<S: AsRef<str>>(
        &self,
        from: &str,
        to: &str,
        tables: &[S],
    ) -> Result<Vec<String>> {
        let mut contents = Vec::with_capacity(tables.len());
        for name in tables {
            let name = name.as_ref();
            let table = self.open_table(from, name).await?;
            let schema = table
                .schema()
                .await
                .map_err(|e| RecsError::Lakehouse(format!("Failed to read schema: {}", e)))?;
            let batches = self.scan_table(&table, None, None).await?;
            contents.push((name.to_string(), schema, batches));
        }

        let mut copied = Vec::with_capacity(contents.len());
        for (name, schema, batches) in contents {
            self.write_batches(to, &name, schema, batches).await?;
            copied.push(name);
        }
        Ok(copied)
    }

    async fn connect(&self, branch: &str) -> Result<Connection> {
        let dir = self.require_branch(branch).await?;
        let uri = format!("file://{}", dir.display());
        lancedb::connect(&uri).execute().await.map_err(|e| {
            RecsError::Lakehouse(format!("Failed to open branch {}: {}", branch, e))
        })
    }

    #[inline]
    pub async fn table_names(&self, branch: &str) -> Result<Vec<String>> {
        self.connect(branch)
            .await?
            .table_names()
            .execute()
            .await
            .map_err(|e| RecsError::Lakehouse(format!("Failed to list tables: {}", e)))
    }

    #[inline]
    pub async fn has_table(&self, branch: &str, table: &str) -> Result<bool> {
        Ok(self.table_names(branch).await?.iter().any(|t| t == table))
    }

    async fn open_table(&self, branch: &str, table: &str) -> Result<Table> {
        let connection = self.connect(branch).await?;
        let names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RecsError::Lakehouse(format!("Failed to list tables: {}", e)))?;
        if !names.iter().any(|t| t == table) {
            return Err(RecsError::NotFound(format!(
                "table '{}' does not exist on branch '{}'",
                table, branch
            )));
        }
        connection
            .open_table(table)
            .execute()
            .await
            .map_err(|e| RecsError::Lakehouse(format!("Failed to open table {}: {}", table, e)))
    }

    async fn scan_table(
        &self,
        table: &Table,
        filter: Option<&str>,
        columns: Option<&[&str]>,
    ) -> Result<Vec<RecordBatch>> {
        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| RecsError::Lakehouse(format!("Failed to count rows: {}", e)))?;
        if rows == 0 {
            return Ok(Vec::new());
        }

        let mut query = table.query().limit(rows);
        if let Some(filter) = filter {
            query = query.only_if(filter);
        }
        if let Some(columns) = columns {
            query = query.select(Select::columns(columns));
        }
        let stream = query
            .execute()
            .await
            .map_err(|e| RecsError::Lakehouse(format!("Query failed: {}", e)))?;
        collect_batches(stream).await
    }

    /// Read `columns` of `table` on `branch`, optionally filtered
    #[inline]
    pub async fn scan(
        &self,
        branch: &str,
        table: &str,
        filter: Option<&str>,
        columns: Option<&[&str]>,
    ) -> Result<Vec<RecordBatch>> {
        let handle = self.open_table(branch, table).await?;
        self.scan_table(&handle, filter, columns).await
    }

    async fn write_batches(
        &self,
        branch: &str,
        table: &str,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<usize> {
        let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
        self.overwrite_table(branch, table, schema, batches.into_iter().map(Ok))
            .await?;
        debug!("Wrote {} rows to {} on {}", rows, table, branch);
        Ok(rows)
    }

    /// Write `source` as the new version of `table`.
    ///
    /// The version is committed only once every batch is written; if the
    /// source or the write fails, readers keep seeing the previous version.
    async fn overwrite_table<I>(
        &self,
        branch: &str,
        table: &str,
        schema: SchemaRef,
        source: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = std::result::Result<RecordBatch, ArrowError>> + Send,
        I::IntoIter: Send + 'static,
    {
        let connection = self.connect(branch).await?;
        let reader = RecordBatchIterator::new(source, schema);
        let result = connection
            .create_table(table, reader)
            .mode(CreateTableMode::Overwrite)
            .execute()
            .await;

        // a failed write may still have left uncommitted files behind
        self.cache.invalidate_branch(branch);
        result
            .map(|_| ())
            .map_err(|e| RecsError::Lakehouse(format!("Failed to write {}: {}", table, e)))
    }

    /// Playlist membership rows of the source table matching `filter`
    #[inline]
    pub async fn read_playlist_rows(
        &self,
        branch: &str,
        table: &str,
        filter: &str,
    ) -> Result<Vec<PlaylistRow>> {
        let batches = self
            .scan(
                branch,
                table,
                Some(filter),
                Some(&[PLAYLIST_ID_COLUMN, TRACK_URI_COLUMN, POSITION_COLUMN]),
            )
            .await?;

        let mut rows = Vec::new();
        for batch in &batches {
            let playlist_ids = int64_column(batch, PLAYLIST_ID_COLUMN)?;
            let track_ids = string_column(batch, TRACK_URI_COLUMN)?;
            let positions = int64_column(batch, POSITION_COLUMN)?;
            for row in 0..batch.num_rows() {
                rows.push(PlaylistRow {
                    playlist_id: playlist_ids.value(row),
                    track_id: track_ids.value(row).to_string(),
                    position: positions.value(row),
                });
            }
        }
        debug!("Read {} playlist rows from {}@{}", rows.len(), table, branch);
        Ok(rows)
    }

    /// Track display metadata of the source table matching `filter`, duplicates included
    #[inline]
    pub async fn read_track_metadata(
        &self,
        branch: &str,
        table: &str,
        filter: &str,
    ) -> Result<Vec<TrackMetadata>> {
        let batches = self
            .scan(
                branch,
                table,
                Some(filter),
                Some(&[TRACK_NAME_COLUMN, ARTIST_NAME_COLUMN, TRACK_URI_COLUMN]),
            )
            .await?;

        let mut metadata = Vec::new();
        for batch in &batches {
            let names = string_column(batch, TRACK_NAME_COLUMN)?;
            let artists = string_column(batch, ARTIST_NAME_COLUMN)?;
            let track_ids = string_column(batch, TRACK_URI_COLUMN)?;
            for row in 0..batch.num_rows() {
                metadata.push(TrackMetadata {
                    track_id: track_ids.value(row).to_string(),
                    track_name: names.value(row).to_string(),
                    artist_name: artists.value(row).to_string(),
                });
            }
        }
        Ok(metadata)
    }

    /// Materialize `records` as `table`, replacing any previous contents
    #[inline]
    pub async fn replace_records(
        &self,
        branch: &str,
        table: &str,
        records: &[TrackRecord],
        dimensions: usize,
    ) -> Result<usize> {
        let batches = if records.is_empty() {
            Vec::new()
        } else {
            vec![records_to_batch(records, dimensions)?]
        };
        let rows = self
            .write_batches(branch, table, track_record_schema(dimensions), batches)
            .await?;
        info!("Replaced {}@{} with {} records", table, branch, rows);
        Ok(rows)
    }

    /// The one big table ordered by popularity descending, memoized per branch
    #[inline]
    pub async fn read_track_table(
        &self,
        branch: &str,
        table: &str,
    ) -> Result<Arc<Vec<TrackRecord>>> {
        let query = format!("SELECT * FROM {} ORDER BY {} DESC", table, POPULARITY_FIELD);
        if let Some(cached) = self.cache.get(&query, branch) {
            return Ok(cached);
        }

        let mut records = Vec::new();
        for batch in self.scan(branch, table, None, None).await? {
            records.extend(batch_to_records(&batch)?);
        }
        records.sort_by(|a, b| {
            b.popularity_count
                .cmp(&a.popularity_count)
                .then_with(|| a.track_id.cmp(&b.track_id))
        });

        Ok(self.cache.insert(&query, branch, records))
    }

    /// Replace `table` on `branch` with the contents of Arrow IPC files
    #[inline]
    pub async fn import_files(&self, branch: &str, table: &str, files: &[PathBuf]) -> Result<usize> {
        if files.is_empty() {
            return Err(RecsError::Lakehouse(format!(
                "no files to import into {}",
                table
            )));
        }

        let paths = files.to_vec();
        let (schema, batches) = tokio::task::spawn_blocking(move || read_ipc_files(&paths))
            .await
            .map_err(|e| RecsError::Lakehouse(format!("Import task failed: {}", e)))??;

        let rows = self.write_batches(branch, table, schema, batches).await?;
        info!(
            "Imported {} rows from {} files into {}@{}",
            rows,
            files.len(),
            table,
            branch
        );
        Ok(rows)
    }
}

fn int64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RecsError::Lakehouse(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| RecsError::Lakehouse(format!("Invalid {} column type", name)))
}

fn read_ipc_files(files: &[PathBuf]) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let mut schema: Option<SchemaRef> = None;
    let mut batches = Vec::new();

    for path in files {
        let reader = FileReader::try_new(File::open(path)?, None).map_err(|e| {
            RecsError::Lakehouse(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let file_schema = reader.schema();
        match &schema {
            Some(expected) if expected.fields() != file_schema.fields() => {
                return Err(RecsError::Lakehouse(format!(
                    "{} does not match the schema of the other staged files",
                    path.display()
                )));
            }
            Some(_) => {}
            None => schema = Some(file_schema),
        }

        for batch in reader {
            batches.push(batch.map_err(|e| {
                RecsError::Lakehouse(format!("Corrupt batch in {}: {}", path.display(), e))
            })?);
        }
    }

    let schema = schema.ok_or_else(|| RecsError::Lakehouse("no files to import".to_string()))?;
    Ok((schema, batches))
}

/// One branch of the lakehouse seen as the pipeline's input and output
#[derive(Clone)]
pub struct LakehouseBranch {
    lakehouse: Arc<Lakehouse>,
    branch: String,
    source_table: String,
    dimensions: usize,
}

impl LakehouseBranch {
    #[inline]
    pub fn new(
        lakehouse: Arc<Lakehouse>,
        branch: impl Into<String>,
        source_table: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            lakehouse,
            branch: branch.into(),
            source_table: source_table.into(),
            dimensions,
        }
    }

    #[inline]
    pub fn branch(&self) -> &str {
        &self.branch
    }
}

#[async_trait]
impl PlaylistSource for LakehouseBranch {
    async fn playlist_rows(&self, filter: &str) -> Result<Vec<PlaylistRow>> {
        self.lakehouse
            .read_playlist_rows(&self.branch, &self.source_table, filter)
            .await
    }

    async fn track_metadata(&self, filter: &str) -> Result<Vec<TrackMetadata>> {
        self.lakehouse
            .read_track_metadata(&self.branch, &self.source_table, filter)
            .await
    }
}

#[async_trait]
impl TableSink for LakehouseBranch {
    async fn replace_records(&self, table: &str, records: &[TrackRecord]) -> Result<usize> {
        self.lakehouse
            .replace_records(&self.branch, table, records, self.dimensions)
            .await
    }
}
