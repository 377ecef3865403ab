
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input};

use super::{Config, PipelineConfig, StoreConfig};

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 Playlist Recs Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config()?;

    eprintln!("{}", style("Pipeline Configuration").bold().yellow());
    eprintln!("Choose which playlists feed the embedding model and how many tracks to keep.");
    eprintln!();

    configure_pipeline(&mut config.pipeline)?;

    eprintln!();
    eprintln!("{}", style("Vector Store Configuration").bold().yellow());
    eprintln!();

    configure_store(&mut config.store)?;

    eprintln!();
    if let Err(e) = config.validate() {
        eprintln!("{}", style(format!("⚠ Invalid configuration: {}", e)).red());
        return Ok(());
    }

    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    for line in describe_config(&config) {
        eprintln!("{}", line);
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

/// Human readable summary lines for the current configuration
fn describe_config(config: &Config) -> Vec<String> {
    vec![
        format!("{}", style("Pipeline Settings:").bold().yellow()),
        format!("  Top K: {}", style(config.pipeline.top_k).cyan()),
        format!(
            "  Playlist filter: {}",
            style(config.pipeline.filter_expression()).cyan()
        ),
        format!("{}", style("Embedding Settings:").bold().yellow()),
        format!(
            "  Vector size: {}",
            style(config.embedding.vector_size).cyan()
        ),
        format!(
            "  Window / min count: {} / {}",
            style(config.embedding.window).cyan(),
            style(config.embedding.min_count).cyan()
        ),
        format!("  Workers: {}", style(config.embedding.workers).cyan()),
        format!("{}", style("Projection Settings:").bold().yellow()),
        format!(
            "  Perplexity: {}",
            style(config.projection.perplexity).cyan()
        ),
        format!(
            "  Iterations: {}",
            style(config.projection.iterations).cyan()
        ),
        format!("{}", style("Vector Store Settings:").bold().yellow()),
        format!("  URI: {}", style(config.vector_store_uri()).cyan()),
        format!(
            "  Collection: {}.{}",
            style(&config.store.database).cyan(),
            style(&config.store.collection).cyan()
        ),
        format!("  Index: {}", style(&config.store.index_name).cyan()),
        format!("{}", style("Lakehouse Settings:").bold().yellow()),
        format!(
            "  Root: {}",
            style(config.lakehouse_root().display()).cyan()
        ),
        format!("  Branch: {}", style(&config.lakehouse.branch).cyan()),
        format!(
            "  Source table: {}",
            style(&config.lakehouse.source_table).cyan()
        ),
    ]
}

fn load_existing_config() -> Result<Config> {
    Config::load_default().or_else(|_| -> Result<Config> {
        eprintln!(
            "{}",
            style("No existing configuration found. Using defaults.").yellow()
        );
        Ok(Config {
            base_dir: Config::config_dir()?,
            ..Config::default()
        })
    })
}

fn configure_pipeline(pipeline: &mut PipelineConfig) -> Result<()> {
    let top_k: usize = Input::new()
        .with_prompt("Number of popular tracks to embed (top k)")
        .default(pipeline.top_k)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input == 0 {
                Err("top k must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let num_followers: u32 = Input::new()
        .with_prompt("Minimum followers (exclusive)")
        .default(pipeline.num_followers)
        .interact_text()?;

    let num_tracks: u32 = Input::new()
        .with_prompt("Minimum tracks per playlist (exclusive)")
        .default(pipeline.num_tracks)
        .interact_text()?;

    *pipeline = PipelineConfig {
        top_k,
        num_followers,
        num_tracks,
    };

    Ok(())
}

fn configure_store(store: &mut StoreConfig) -> Result<()> {
    let uri: String = Input::new()
        .with_prompt("Vector store URI (empty for the local default)")
        .default(store.uri.clone().unwrap_or_default())
        .allow_empty(true)
        .interact_text()?;

    let collection: String = Input::new()
        .with_prompt("Collection name")
        .default(store.collection.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let index_name: String = Input::new()
        .with_prompt("Search index name")
        .default(store.index_name.clone())
        .validate_with(non_empty)
        .interact_text()?;

    store.uri = normalize_optional(uri);
    store.collection = collection;
    store.index_name = index_name;

    Ok(())
}

fn non_empty(input: &String) -> Result<(), &'static str> {
    if input.trim().is_empty() {
        Err("Value cannot be empty")
    } else {
        Ok(())
    }
}

fn normalize_optional(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
