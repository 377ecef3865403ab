#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Embedding width published to the vector store and its search index
pub const DEFAULT_VECTOR_SIZE: u32 = 48;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub lakehouse: LakehouseConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Playlist filter thresholds and the size of the ranked track set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub top_k: usize,
    /// Playlists must have strictly more followers than this
    pub num_followers: u32,
    /// Playlists must have strictly more tracks than this
    pub num_tracks: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: 1000,
            num_followers: 1,
            num_tracks: 4,
        }
    }
}

impl PipelineConfig {
    /// Predicate pushed down to the lakehouse scan
    #[inline]
    pub fn filter_expression(&self) -> String {
        format!(
            "num_followers > {} and num_tracks > {}",
            self.num_followers, self.num_tracks
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub vector_size: u32,
    pub window: u32,
    pub min_count: u32,
    pub workers: u32,
    pub epochs: u32,
    pub negative: u32,
    pub learning_rate: f32,
    pub seed: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            vector_size: DEFAULT_VECTOR_SIZE,
            window: 5,
            min_count: 2,
            workers: 12,
            epochs: 5,
            negative: 5,
            learning_rate: 0.025,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProjectionConfig {
    pub perplexity: f32,
    pub iterations: u32,
    pub learning_rate: f32,
    pub seed: u64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            perplexity: 50.0,
            iterations: 1000,
            learning_rate: 200.0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Location of the vector store, `<base_dir>/vectors` when unset
    pub uri: Option<String>,
    pub database: String,
    pub collection: String,
    pub index_name: String,
    pub dimensions: u32,
    pub num_candidates: usize,
    pub limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: None,
            database: "my_bauplan_db".to_string(),
            collection: "track_vectors".to_string(),
            index_name: "bauplan_recs_index".to_string(),
            dimensions: DEFAULT_VECTOR_SIZE,
            num_candidates: 50,
            limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LakehouseConfig {
    /// Root directory holding one database per branch, `<base_dir>/lakehouse` when unset
    pub root: Option<PathBuf>,
    pub source_table: String,
    pub output_table: String,
    pub branch: String,
    pub ingestion_branch: String,
    pub ingest_workers: usize,
    pub cache_ttl_seconds: u64,
}

impl Default for LakehouseConfig {
    fn default() -> Self {
        Self {
            root: None,
            source_table: "spotify_playlists".to_string(),
            output_table: "track_vectors_with_metadata".to_string(),
            branch: "main".to_string(),
            ingestion_branch: "spotify_ingestion".to_string(),
            ingest_workers: 12,
            cache_ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid top_k: {0} (must be between 1 and 1000000)")]
    InvalidTopK(usize),
    #[error("Invalid vector size: {0} (must be between 2 and 1024)")]
    InvalidVectorSize(u32),
    #[error("Invalid context window: {0} (must be between 1 and 50)")]
    InvalidWindow(u32),
    #[error("Invalid minimum frequency: {0} (must be at least 1)")]
    InvalidMinCount(u32),
    #[error("Invalid worker count: {0} (must be between 1 and 256)")]
    InvalidWorkers(u32),
    #[error("Invalid epoch count: {0} (must be between 1 and 100)")]
    InvalidEpochs(u32),
    #[error("Invalid learning rate: {0} (must be positive)")]
    InvalidLearningRate(f32),
    #[error("Invalid perplexity: {0} (must be between 1 and 500)")]
    InvalidPerplexity(f32),
    #[error("Invalid iteration budget: {0} (must be between 250 and 100000)")]
    InvalidIterations(u32),
    #[error("Invalid name for {0}: cannot be empty")]
    EmptyName(&'static str),
    #[error("Invalid store URI: {0}")]
    InvalidStoreUri(String),
    #[error("Invalid result limit: {0} (must be between 1 and candidate pool size {1})")]
    InvalidLimit(usize, usize),
    #[error("Store dimensions ({0}) must match embedding vector size ({1})")]
    DimensionMismatch(u32, u32),
    #[error("Invalid ingest worker count: {0} (must be between 1 and 256)")]
    InvalidIngestWorkers(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Load from the default configuration directory
    #[inline]
    pub fn load_default() -> Result<Self> {
        Self::load(Self::config_dir()?)
    }

    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".playlist-recs"))
            .or({
                #[cfg(windows)]
                {
                    dirs::data_dir().map(|data| data.join("playlist-recs"))
                }
                #[cfg(not(windows))]
                {
                    None
                }
            })
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_pipeline_config()?;
        self.validate_embedding_config()?;
        self.validate_projection_config()?;
        self.validate_store_config()?;
        self.validate_lakehouse_config()?;
        Ok(())
    }

    fn validate_pipeline_config(&self) -> Result<(), ConfigError> {
        if !(1..=1_000_000).contains(&self.pipeline.top_k) {
            return Err(ConfigError::InvalidTopK(self.pipeline.top_k));
        }
        Ok(())
    }

    fn validate_embedding_config(&self) -> Result<(), ConfigError> {
        let config = &self.embedding;

        if !(2..=1024).contains(&config.vector_size) {
            return Err(ConfigError::InvalidVectorSize(config.vector_size));
        }

        if !(1..=50).contains(&config.window) {
            return Err(ConfigError::InvalidWindow(config.window));
        }

        if config.min_count == 0 {
            return Err(ConfigError::InvalidMinCount(config.min_count));
        }

        if !(1..=256).contains(&config.workers) {
            return Err(ConfigError::InvalidWorkers(config.workers));
        }

        if !(1..=100).contains(&config.epochs) {
            return Err(ConfigError::InvalidEpochs(config.epochs));
        }

        if !(config.learning_rate > 0.0 && config.learning_rate.is_finite()) {
            return Err(ConfigError::InvalidLearningRate(config.learning_rate));
        }

        Ok(())
    }

    fn validate_projection_config(&self) -> Result<(), ConfigError> {
        let config = &self.projection;

        if !(1.0..=500.0).contains(&config.perplexity) {
            return Err(ConfigError::InvalidPerplexity(config.perplexity));
        }

        if !(250..=100_000).contains(&config.iterations) {
            return Err(ConfigError::InvalidIterations(config.iterations));
        }

        if !(config.learning_rate > 0.0 && config.learning_rate.is_finite()) {
            return Err(ConfigError::InvalidLearningRate(config.learning_rate));
        }

        Ok(())
    }

    fn validate_store_config(&self) -> Result<(), ConfigError> {
        let config = &self.store;

        if let Some(uri) = &config.uri {
            Url::parse(uri).map_err(|_| ConfigError::InvalidStoreUri(uri.clone()))?;
        }

        if config.database.trim().is_empty() {
            return Err(ConfigError::EmptyName("store.database"));
        }

        if config.collection.trim().is_empty() {
            return Err(ConfigError::EmptyName("store.collection"));
        }

        if config.index_name.trim().is_empty() {
            return Err(ConfigError::EmptyName("store.index_name"));
        }

        if config.limit == 0 || config.limit > config.num_candidates {
            return Err(ConfigError::InvalidLimit(
                config.limit,
                config.num_candidates,
            ));
        }

        if config.dimensions != self.embedding.vector_size {
            return Err(ConfigError::DimensionMismatch(
                config.dimensions,
                self.embedding.vector_size,
            ));
        }

        Ok(())
    }

    fn validate_lakehouse_config(&self) -> Result<(), ConfigError> {
        let config = &self.lakehouse;

        for (field, value) in [
            ("lakehouse.source_table", &config.source_table),
            ("lakehouse.output_table", &config.output_table),
            ("lakehouse.branch", &config.branch),
            ("lakehouse.ingestion_branch", &config.ingestion_branch),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyName(field));
            }
        }

        if !(1..=256).contains(&config.ingest_workers) {
            return Err(ConfigError::InvalidIngestWorkers(config.ingest_workers));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite catalog backing the vector store aliases
    #[inline]
    pub fn catalog_database_path(&self) -> PathBuf {
        self.get_base_dir().join("catalog.db")
    }

    /// Resolve the vector store location as a URI understood by LanceDB
    #[inline]
    pub fn vector_store_uri(&self) -> String {
        self.store.uri.clone().unwrap_or_else(|| {
            let path = self.get_base_dir().join("vectors").join(&self.store.database);
            format!("file://{}", path.display())
        })
    }

    /// Get the root directory for lakehouse branches
    #[inline]
    pub fn lakehouse_root(&self) -> PathBuf {
        self.lakehouse
            .root
            .clone()
            .unwrap_or_else(|| self.get_base_dir().join("lakehouse"))
    }

    /// Get the directory where ingestion stages intermediate files
    #[inline]
    pub fn staging_dir_path(&self) -> PathBuf {
        self.get_base_dir().join("staging")
    }
}
