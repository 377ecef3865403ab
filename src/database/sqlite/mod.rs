use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::models::{
    AliasSwap, CollectionAlias, NewPublishRun, PublishRun, SearchIndexEntry,
};
use crate::database::sqlite::queries::{AliasQueries, PublishRunQueries, SearchIndexQueries};


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

/// Alias catalog for the vector store.
///
/// Readers resolve a collection name through this catalog, so repointing an
/// alias inside one transaction is what makes a publish atomic.
#[derive(Debug, Clone)]
pub struct Catalog {
    pool: DbPool,
}

impl Catalog {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let database_path = database_path.as_ref();
        if let Some(parent) = database_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create catalog directory: {}", parent.display())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to create catalog connection pool")?;

        let catalog = Self { pool };
        catalog.run_migrations().await?;

        Ok(catalog)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running catalog migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run catalog migration")?;

        debug!("Catalog migrations completed successfully");
        Ok(())
    }

    // Alias operations
    #[inline]
    pub async fn get_alias(
        &self,
        database_name: &str,
        alias: &str,
    ) -> Result<Option<CollectionAlias>> {
        AliasQueries::get(&self.pool, database_name, alias).await
    }

    #[inline]
    pub async fn list_aliases(&self, database_name: &str) -> Result<Vec<CollectionAlias>> {
        AliasQueries::list(&self.pool, database_name).await
    }

    #[inline]
    pub async fn swap_alias(&self, swap: &AliasSwap) -> Result<Option<String>> {
        AliasQueries::swap(&self.pool, swap).await
    }

    // Search index operations
    #[inline]
    pub async fn get_search_index(
        &self,
        database_name: &str,
        index_name: &str,
    ) -> Result<Option<SearchIndexEntry>> {
        SearchIndexQueries::get(&self.pool, database_name, index_name).await
    }

    // Publish run operations
    #[inline]
    pub async fn begin_publish(&self, run: NewPublishRun) -> Result<PublishRun> {
        PublishRunQueries::create(&self.pool, run).await
    }

    #[inline]
    pub async fn fail_publish(&self, run_id: &str, error_message: &str) -> Result<()> {
        PublishRunQueries::mark_failed(&self.pool, run_id, error_message).await
    }

    #[inline]
    pub async fn get_publish_run(&self, run_id: &str) -> Result<Option<PublishRun>> {
        PublishRunQueries::get_by_id(&self.pool, run_id).await
    }

    #[inline]
    pub async fn recent_publish_runs(
        &self,
        database_name: &str,
        alias: &str,
        limit: i64,
    ) -> Result<Vec<PublishRun>> {
        PublishRunQueries::list_recent(&self.pool, database_name, alias, limit).await
    }
}
