
use super::{
    ARTIST_NAME_FIELD, EMBEDDING_FIELD, ID_FIELD, TRACK_NAME_FIELD, batch_to_records,
    collect_batches, records_to_batch, sql_literal, string_column, track_record_schema,
    vector_at, vector_column,
};
use crate::database::sqlite::Catalog;
use crate::database::sqlite::models::{AliasSwap, IndexKind, NewPublishRun};
use crate::embeddings::cosine_similarity;
use crate::pipeline::RecordPublisher;
use crate::pipeline::models::TrackRecord;
use crate::{RecsError, config::Config, config::StoreConfig};
use arrow::array::RecordBatchIterator;
use async_trait::async_trait;
use lancedb::index::Index;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use std::cmp::Ordering;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Below this row count an ANN index cannot be trained; the table is searched flat
pub const MIN_ROWS_FOR_ANN_INDEX: usize = 256;

/// Published track collection with atomic republish.
///
/// Every publish writes a fresh physical table, indexes it, and only then
/// repoints the collection alias in the catalog. Readers always resolve the
/// alias, so they see either the old complete collection or the new one.
pub struct VectorStore {
    connection: Connection,
    catalog: Catalog,
    database: String,
    collection: String,
    index_name: String,
    dimensions: usize,
    num_candidates: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
    /// Cosine similarity to the query, higher is closer
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub collection: String,
    pub physical_table: String,
    pub index_name: String,
    pub index_kind: IndexKind,
    pub inserted: usize,
    /// Physical table the alias pointed at before this publish
    pub replaced: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStatus {
    pub index_name: String,
    pub physical_table: String,
    pub index_kind: IndexKind,
    pub num_dimensions: usize,
    pub queryable: bool,
}

impl VectorStore {
    /// Open the store described by the application configuration
    #[inline]
    pub async fn new(config: &Config) -> Result<Self, RecsError> {
        let catalog = Catalog::new(config.catalog_database_path()).await?;
        Self::open(&config.vector_store_uri(), catalog, &config.store).await
    }

    #[inline]
    pub async fn open(
        uri: &str,
        catalog: Catalog,
        store: &StoreConfig,
    ) -> Result<Self, RecsError> {
        debug!("Connecting to vector store at {}", uri);

        let local_path = uri
            .strip_prefix("file://")
            .or_else(|| (!uri.contains("://")).then_some(uri));
        if let Some(path) = local_path {
            std::fs::create_dir_all(path).map_err(|e| {
                RecsError::Database(format!("Failed to create vector store directory: {}", e))
            })?;
        }

        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| RecsError::Database(format!("Failed to connect to LanceDB: {}", e)))?;

        Ok(Self {
            connection,
            catalog,
            database: store.database.clone(),
            collection: store.collection.clone(),
            index_name: store.index_name.clone(),
            dimensions: store.dimensions as usize,
            num_candidates: store.num_candidates,
        })
    }

    #[inline]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Replace the collection's contents with `records`.
    ///
    /// On any failure before the alias swap the previous collection stays
    /// untouched and queryable, and the half-built table is discarded.
    #[inline]
    pub async fn publish(&self, records: &[TrackRecord]) -> Result<PublishReport, RecsError> {
        if let Some(bad) = records
            .iter()
            .find(|record| record.embedding.len() != self.dimensions)
        {
            return Err(RecsError::Database(format!(
                "Track {} has a {}-dimensional embedding but the index expects {}",
                bad.track_id,
                bad.embedding.len(),
                self.dimensions
            )));
        }

        let run_id = Uuid::new_v4().simple().to_string();
        let shadow = format!("{}__{}", self.collection, run_id);
        info!(
            "Publishing {} records to {}.{} via {}",
            records.len(),
            self.database,
            self.collection,
            shadow
        );

        self.catalog
            .begin_publish(NewPublishRun {
                id: run_id.clone(),
                database_name: self.database.clone(),
                alias: self.collection.clone(),
                shadow_table: shadow.clone(),
                record_count: records.len() as i64,
            })
            .await?;

        let index_kind = match self.build_shadow(&shadow, records).await {
            Ok(kind) => kind,
            Err(e) => {
                self.abandon(&run_id, &shadow, &e).await;
                return Err(e);
            }
        };

        let swap = AliasSwap {
            run_id: run_id.clone(),
            database_name: self.database.clone(),
            alias: self.collection.clone(),
            physical_table: shadow.clone(),
            record_count: records.len() as i64,
            index_name: self.index_name.clone(),
            field_path: EMBEDDING_FIELD.to_string(),
            num_dimensions: self.dimensions as i64,
            index_kind,
        };

        let replaced = match self.catalog.swap_alias(&swap).await {
            Ok(previous) => previous,
            Err(e) => {
                let e = RecsError::from(e);
                self.abandon(&run_id, &shadow, &e).await;
                return Err(e);
            }
        };

        // Readers that resolved the alias before the swap may still be using
        // the replaced table, so it is only retired by the next publish
        let mut keep = vec![shadow.as_str()];
        keep.extend(replaced.as_deref());
        self.retire_tables(&keep).await;

        info!(
            "Published {} records to {} with {} index {}",
            records.len(),
            self.collection,
            index_kind,
            self.index_name
        );

        Ok(PublishReport {
            collection: self.collection.clone(),
            physical_table: shadow,
            index_name: self.index_name.clone(),
            index_kind,
            inserted: records.len(),
            replaced,
        })
    }

    async fn build_shadow(
        &self,
        shadow: &str,
        records: &[TrackRecord],
    ) -> Result<IndexKind, RecsError> {
        let schema = track_record_schema(self.dimensions);
        let table = self
            .connection
            .create_empty_table(shadow, schema.clone())
            .execute()
            .await
            .map_err(|e| RecsError::Database(format!("Failed to create table {}: {}", shadow, e)))?;

        if !records.is_empty() {
            let batch = records_to_batch(records, self.dimensions)?;
            let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
            table
                .add(reader)
                .execute()
                .await
                .map_err(|e| RecsError::Database(format!("Failed to insert records: {}", e)))?;
        }

        let stored = table
            .count_rows(None)
            .await
            .map_err(|e| RecsError::Database(format!("Failed to count rows: {}", e)))?;
        if stored != records.len() {
            return Err(RecsError::Database(format!(
                "Table {} holds {} rows after inserting {}",
                shadow,
                stored,
                records.len()
            )));
        }

        if stored < MIN_ROWS_FOR_ANN_INDEX {
            debug!(
                "{} rows is too few for an ANN index, {} will be searched flat",
                stored, shadow
            );
            return Ok(IndexKind::Flat);
        }

        table
            .create_index(
                &[EMBEDDING_FIELD],
                Index::IvfPq(IvfPqIndexBuilder::default().distance_type(DistanceType::Cosine)),
            )
            .execute()
            .await
            .map_err(|e| RecsError::Database(format!("Failed to create vector index: {}", e)))?;

        Ok(IndexKind::IvfPq)
    }

    async fn abandon(&self, run_id: &str, shadow: &str, cause: &RecsError) {
        error!("Publish {} failed: {}", run_id, cause);
        if let Err(e) = self.drop_table(shadow).await {
            warn!("Failed to discard shadow table {}: {}", shadow, e);
        }
        if let Err(e) = self.catalog.fail_publish(run_id, &cause.to_string()).await {
            warn!("Failed to record publish failure for {}: {}", run_id, e);
        }
    }

    /// Drop this collection's physical tables except `keep`. Failures are
    /// logged only; the new collection is already live.
    async fn retire_tables(&self, keep: &[&str]) {
        let prefix = format!("{}__", self.collection);
        let names = match self.table_names().await {
            Ok(names) => names,
            Err(e) => {
                warn!("Failed to list tables to retire: {}", e);
                return;
            }
        };

        for name in names
            .iter()
            .filter(|name| name.starts_with(&prefix) && !keep.contains(&name.as_str()))
        {
            if let Err(e) = self.drop_table(name).await {
                warn!("Failed to drop retired table {}: {}", name, e);
            }
        }
    }

    async fn drop_table(&self, name: &str) -> Result<(), RecsError> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RecsError::Database(format!("Failed to list tables: {}", e)))?;

        if table_names.iter().any(|t| t == name) {
            debug!("Dropping table {}", name);
            self.connection
                .drop_table(name)
                .await
                .map_err(|e| RecsError::Database(format!("Failed to drop table: {}", e)))?;
        }
        Ok(())
    }

    /// Physical table names currently in the LanceDB database
    #[inline]
    pub async fn table_names(&self) -> Result<Vec<String>, RecsError> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RecsError::Database(format!("Failed to list tables: {}", e)))
    }

    /// Registration of the search index, if a publish ever completed
    #[inline]
    pub async fn index_status(&self) -> Result<Option<IndexStatus>, RecsError> {
        let Some(entry) = self
            .catalog
            .get_search_index(&self.database, &self.index_name)
            .await?
        else {
            return Ok(None);
        };

        let mut queryable = entry.queryable;
        if queryable && entry.index_kind == IndexKind::IvfPq {
            let table = self.open_physical(&entry.physical_table).await?;
            let indices = table
                .list_indices()
                .await
                .map_err(|e| RecsError::Database(format!("Failed to list indices: {}", e)))?;
            queryable = indices
                .iter()
                .any(|index| index.columns.iter().any(|c| c == EMBEDDING_FIELD));
        }

        Ok(Some(IndexStatus {
            index_name: entry.index_name,
            physical_table: entry.physical_table,
            index_kind: entry.index_kind,
            num_dimensions: entry.num_dimensions as usize,
            queryable,
        }))
    }

    async fn open_physical(&self, name: &str) -> Result<Table, RecsError> {
        self.connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| RecsError::Database(format!("Failed to open table {}: {}", name, e)))
    }

    async fn open_collection(&self) -> Result<Table, RecsError> {
        let alias = self
            .catalog
            .get_alias(&self.database, &self.collection)
            .await?
            .ok_or_else(|| {
                RecsError::NotFound(format!(
                    "collection {}.{} has not been published",
                    self.database, self.collection
                ))
            })?;
        self.open_physical(&alias.physical_table).await
    }

    #[inline]
    pub async fn count_documents(&self) -> Result<usize, RecsError> {
        self.open_collection()
            .await?
            .count_rows(None)
            .await
            .map_err(|e| RecsError::Database(format!("Failed to count documents: {}", e)))
    }

    /// Nearest tracks to `query` by cosine similarity.
    ///
    /// Pulls `num_candidates` neighbours from the index, re-scores them exactly
    /// and keeps the best `limit`.
    #[inline]
    pub async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>, RecsError> {
        if query.len() != self.dimensions {
            return Err(RecsError::Database(format!(
                "Query vector has {} dimensions, expected {}",
                query.len(),
                self.dimensions
            )));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let table = self.open_collection().await?;
        let candidates = self.num_candidates.max(limit);

        let stream = table
            .vector_search(query)
            .map_err(|e| RecsError::Database(format!("Failed to create vector search: {}", e)))?
            .column(EMBEDDING_FIELD)
            .distance_type(DistanceType::Cosine)
            .limit(candidates)
            .select(Select::columns(&[
                ID_FIELD,
                TRACK_NAME_FIELD,
                ARTIST_NAME_FIELD,
                EMBEDDING_FIELD,
            ]))
            .execute()
            .await
            .map_err(|e| RecsError::Database(format!("Failed to execute search: {}", e)))?;

        let mut hits = Vec::new();
        for batch in collect_batches(stream).await? {
            let ids = string_column(&batch, ID_FIELD)?;
            let names = string_column(&batch, TRACK_NAME_FIELD)?;
            let artists = string_column(&batch, ARTIST_NAME_FIELD)?;
            let (embeddings, values) = vector_column(&batch, EMBEDDING_FIELD)?;

            for row in 0..batch.num_rows() {
                let embedding = vector_at(embeddings, values, row);
                hits.push(SearchHit {
                    track_id: ids.value(row).to_string(),
                    track_name: names.value(row).to_string(),
                    artist_name: artists.value(row).to_string(),
                    score: cosine_similarity(query, &embedding),
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.track_id.cmp(&b.track_id))
        });
        hits.truncate(limit);

        debug!("Search returned {} hits", hits.len());
        Ok(hits)
    }

    /// Look up one published record by track id
    #[inline]
    pub async fn get_record(&self, track_id: &str) -> Result<Option<TrackRecord>, RecsError> {
        let table = self.open_collection().await?;
        let stream = table
            .query()
            .only_if(format!("{} = {}", ID_FIELD, sql_literal(track_id)))
            .limit(1)
            .execute()
            .await
            .map_err(|e| RecsError::Database(format!("Failed to query record: {}", e)))?;

        let mut records = Vec::new();
        for batch in collect_batches(stream).await? {
            records.extend(batch_to_records(&batch)?);
        }
        Ok(records.into_iter().next())
    }
}

#[async_trait]
impl RecordPublisher for VectorStore {
    async fn publish(&self, records: &[TrackRecord]) -> Result<PublishReport, RecsError> {
        VectorStore::publish(self, records).await
    }
}
