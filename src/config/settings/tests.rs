use super::*;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.pipeline.top_k, 1000);
    assert_eq!(config.embedding.vector_size, 48);
    assert_eq!(config.embedding.window, 5);
    assert_eq!(config.embedding.min_count, 2);
    assert_eq!(config.embedding.workers, 12);
    assert_eq!(config.store.collection, "track_vectors");
    assert_eq!(config.store.index_name, "bauplan_recs_index");
    assert_eq!(config.store.num_candidates, 50);
    assert_eq!(config.store.limit, 5);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.pipeline.top_k = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.min_count = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.projection.perplexity = 0.5;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.store.limit = 51;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidLimit(51, 50))
    ));

    let mut invalid_config = config.clone();
    invalid_config.store.collection = "  ".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::EmptyName("store.collection"))
    ));

    let mut invalid_config = config;
    invalid_config.store.uri = Some("not a uri".to_string());
    assert!(invalid_config.validate().is_err());
}

#[test]
fn store_dimensions_must_follow_vector_size() {
    let mut config = Config::default();
    config.embedding.vector_size = 64;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::DimensionMismatch(48, 64))
    ));

    config.store.dimensions = 64;
    assert!(config.validate().is_ok());
}

#[test]
fn filter_expression_uses_thresholds() {
    let pipeline = PipelineConfig {
        top_k: 10,
        num_followers: 2,
        num_tracks: 5,
    };
    assert_eq!(
        pipeline.filter_expression(),
        "num_followers > 2 and num_tracks > 5"
    );
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_falls_back_to_defaults() {
    let partial = r#"
        [pipeline]
        top_k = 25

        [store]
        collection = "shadowed"
    "#;
    let config: Config = toml::from_str(partial).expect("partial config should parse");
    assert_eq!(config.pipeline.top_k, 25);
    assert_eq!(config.pipeline.num_tracks, 4);
    assert_eq!(config.store.collection, "shadowed");
    assert_eq!(config.store.index_name, "bauplan_recs_index");
}

#[test]
fn load_missing_file_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("should load defaults");
    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.pipeline, PipelineConfig::default());
}

#[test]
fn save_then_load() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::load(temp_dir.path()).expect("should load defaults");
    config.pipeline.top_k = 42;
    config.lakehouse.branch = "jacopo.recs".to_string();
    config.save().expect("should save config");

    let loaded = Config::load(temp_dir.path()).expect("should load saved config");
    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[pipeline]\ntop_k = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn derived_paths() {
    let config = Config {
        base_dir: PathBuf::from("/tmp/recs"),
        ..Config::default()
    };
    assert_eq!(
        config.vector_store_uri(),
        "file:///tmp/recs/vectors/my_bauplan_db"
    );
    assert_eq!(config.lakehouse_root(), PathBuf::from("/tmp/recs/lakehouse"));
    assert_eq!(
        config.catalog_database_path(),
        PathBuf::from("/tmp/recs/catalog.db")
    );

    let config = Config {
        store: StoreConfig {
            uri: Some("file:///data/vectors".to_string()),
            ..StoreConfig::default()
        },
        ..config
    };
    assert_eq!(config.vector_store_uri(), "file:///data/vectors");
}
