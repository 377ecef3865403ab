
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

/// Cosine is the only similarity the store builds indexes for
pub const COSINE_SIMILARITY: &str = "cosine";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CollectionAlias {
    pub database_name: String,
    pub alias: String,
    pub physical_table: String,
    pub record_count: i64,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Approximate nearest neighbour index over the embedding column
    IvfPq,
    /// No ANN index, queries scan the table
    Flat,
}

impl std::fmt::Display for IndexKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            IndexKind::IvfPq => write!(f, "IVF-PQ"),
            IndexKind::Flat => write!(f, "flat"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SearchIndexEntry {
    pub database_name: String,
    pub index_name: String,
    pub alias: String,
    pub physical_table: String,
    pub field_path: String,
    pub num_dimensions: i64,
    pub similarity: String,
    pub index_kind: IndexKind,
    pub queryable: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum PublishStatus {
    Building,
    Completed,
    Failed,
}

impl std::fmt::Display for PublishStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            PublishStatus::Building => write!(f, "Building"),
            PublishStatus::Completed => write!(f, "Completed"),
            PublishStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PublishRun {
    pub id: String,
    pub database_name: String,
    pub alias: String,
    pub shadow_table: String,
    pub status: PublishStatus,
    pub record_count: i64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPublishRun {
    pub id: String,
    pub database_name: String,
    pub alias: String,
    pub shadow_table: String,
    pub record_count: i64,
}

/// Everything the catalog needs to point an alias at a freshly built table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasSwap {
    pub run_id: String,
    pub database_name: String,
    pub alias: String,
    pub physical_table: String,
    pub record_count: i64,
    pub index_name: String,
    pub field_path: String,
    pub num_dimensions: i64,
    pub index_kind: IndexKind,
}
