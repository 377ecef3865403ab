
use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, warn};

pub struct AliasQueries;

impl AliasQueries {
    #[inline]
    pub async fn get(
        pool: &SqlitePool,
        database_name: &str,
        alias: &str,
    ) -> Result<Option<CollectionAlias>> {
        let result = sqlx::query_as::<_, CollectionAlias>(
            r#"
            SELECT database_name, alias, physical_table, record_count, published_at
            FROM collection_aliases
            WHERE database_name = ? AND alias = ?
            "#,
        )
        .bind(database_name)
        .bind(alias)
        .fetch_optional(pool)
        .await
        .context("Failed to get collection alias")?;

        Ok(result)
    }

    #[inline]
    pub async fn list(pool: &SqlitePool, database_name: &str) -> Result<Vec<CollectionAlias>> {
        let aliases = sqlx::query_as::<_, CollectionAlias>(
            r#"
            SELECT database_name, alias, physical_table, record_count, published_at
            FROM collection_aliases
            WHERE database_name = ?
            ORDER BY alias
            "#,
        )
        .bind(database_name)
        .fetch_all(pool)
        .await
        .context("Failed to list collection aliases")?;

        Ok(aliases)
    }

    /// Point the alias and its search index at a new physical table and mark the
    /// run completed, all in one transaction. Returns the table the alias used to
    /// point at, if any.
    #[inline]
    pub async fn swap(pool: &SqlitePool, swap: &AliasSwap) -> Result<Option<String>> {
        let now = Utc::now();
        let mut tx = pool
            .begin()
            .await
            .context("Failed to begin alias swap transaction")?;

        let previous: Option<String> = sqlx::query_scalar(
            "SELECT physical_table FROM collection_aliases WHERE database_name = ? AND alias = ?",
        )
        .bind(&swap.database_name)
        .bind(&swap.alias)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to read current alias target")?;

        sqlx::query(
            r#"
            INSERT INTO collection_aliases (database_name, alias, physical_table, record_count, published_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(database_name, alias) DO UPDATE SET
                physical_table = excluded.physical_table,
                record_count = excluded.record_count,
                published_at = excluded.published_at
            "#,
        )
        .bind(&swap.database_name)
        .bind(&swap.alias)
        .bind(&swap.physical_table)
        .bind(swap.record_count)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to update collection alias")?;

        sqlx::query(
            r#"
            INSERT INTO search_indexes
                (database_name, index_name, alias, physical_table, field_path,
                 num_dimensions, similarity, index_kind, queryable, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, TRUE, ?)
            ON CONFLICT(database_name, index_name) DO UPDATE SET
                alias = excluded.alias,
                physical_table = excluded.physical_table,
                field_path = excluded.field_path,
                num_dimensions = excluded.num_dimensions,
                similarity = excluded.similarity,
                index_kind = excluded.index_kind,
                queryable = excluded.queryable,
                created_at = excluded.created_at
            "#,
        )
        .bind(&swap.database_name)
        .bind(&swap.index_name)
        .bind(&swap.alias)
        .bind(&swap.physical_table)
        .bind(&swap.field_path)
        .bind(swap.num_dimensions)
        .bind(COSINE_SIMILARITY)
        .bind(swap.index_kind)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to register search index")?;

        let updated = sqlx::query(
            "UPDATE publish_runs SET status = 'completed', finished_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(&swap.run_id)
        .execute(&mut *tx)
        .await
        .context("Failed to complete publish run")?
        .rows_affected();

        if updated == 0 {
            warn!("No publish run recorded for {}", swap.run_id);
        }

        tx.commit()
            .await
            .context("Failed to commit alias swap transaction")?;

        debug!(
            "Alias {}.{} now points at {}",
            swap.database_name, swap.alias, swap.physical_table
        );
        Ok(previous)
    }
}

pub struct SearchIndexQueries;

impl SearchIndexQueries {
    #[inline]
    pub async fn get(
        pool: &SqlitePool,
        database_name: &str,
        index_name: &str,
    ) -> Result<Option<SearchIndexEntry>> {
        let result = sqlx::query_as::<_, SearchIndexEntry>(
            r#"
            SELECT database_name, index_name, alias, physical_table, field_path,
                   num_dimensions, similarity, index_kind, queryable, created_at
            FROM search_indexes
            WHERE database_name = ? AND index_name = ?
            "#,
        )
        .bind(database_name)
        .bind(index_name)
        .fetch_optional(pool)
        .await
        .context("Failed to get search index")?;

        Ok(result)
    }
}

pub struct PublishRunQueries;

impl PublishRunQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, run: NewPublishRun) -> Result<PublishRun> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO publish_runs (id, database_name, alias, shadow_table, status, record_count, started_at)
            VALUES (?, ?, ?, ?, 'building', ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.database_name)
        .bind(&run.alias)
        .bind(&run.shadow_table)
        .bind(run.record_count)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create publish run")?;

        Self::get_by_id(pool, &run.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created publish run"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<PublishRun>> {
        let result = sqlx::query_as::<_, PublishRun>(
            r#"
            SELECT id, database_name, alias, shadow_table, status, record_count,
                   error_message, started_at, finished_at
            FROM publish_runs WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get publish run")?;

        Ok(result)
    }

    #[inline]
    pub async fn mark_failed(pool: &SqlitePool, id: &str, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE publish_runs SET status = 'failed', error_message = ?, finished_at = ? WHERE id = ?",
        )
        .bind(error_message)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to mark publish run as failed")?;

        Ok(())
    }

    /// Most recent runs first
    #[inline]
    pub async fn list_recent(
        pool: &SqlitePool,
        database_name: &str,
        alias: &str,
        limit: i64,
    ) -> Result<Vec<PublishRun>> {
        let runs = sqlx::query_as::<_, PublishRun>(
            r#"
            SELECT id, database_name, alias, shadow_table, status, record_count,
                   error_message, started_at, finished_at
            FROM publish_runs
            WHERE database_name = ? AND alias = ?
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(database_name)
        .bind(alias)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to list publish runs")?;

        Ok(runs)
    }
}
