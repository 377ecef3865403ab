use std::path::PathBuf;

use clap::{Parser, Subcommand};
use playlist_recs::commands::{explore, ingest, recommend, run_pipeline, show_status};
use playlist_recs::config::{Config, run_interactive_config, show_config};
use playlist_recs::{RecsError, Result};

#[derive(Parser)]
#[command(name = "playlist-recs")]
#[command(about = "Train track embeddings from playlists and recommend similar songs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure pipeline, embedding and store settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Load a directory of playlist dataset slices into the lakehouse
    Ingest {
        /// Directory containing the JSON slice files
        dir: PathBuf,
    },
    /// Run the batch pipeline and publish the track collection
    Run {
        /// Number of most popular tracks to keep
        #[arg(long)]
        top_k: Option<usize>,
        /// Lakehouse branch to read from and write to
        #[arg(long)]
        branch: Option<String>,
        /// Vector store URI, e.g. "file:///data/vectors"
        #[arg(long, env = "PLAYLIST_RECS_STORE_URI")]
        store_uri: Option<String>,
    },
    /// Summarize the published table and find songs similar to a top track
    Explore {
        /// Lakehouse branch holding the published table
        #[arg(long)]
        branch: Option<String>,
        /// Name of one of the top tracks to use as the seed
        #[arg(long)]
        track: Option<String>,
    },
    /// Recommend tracks similar to a published track id
    Recommend {
        /// Track URI, e.g. "spotify:track:..."
        track: String,
        /// Maximum number of recommendations
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show lakehouse branches and the state of the published index
    Status,
}

/// Config file values with command line overrides applied on top, then validated
fn load_config(branch: Option<String>, overrides: impl FnOnce(&mut Config)) -> Result<Config> {
    let mut config = Config::load_default()?;
    if let Some(branch) = branch {
        config.lakehouse.branch = branch;
    }
    overrides(&mut config);
    config
        .validate()
        .map_err(|e| RecsError::Config(e.to_string()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Ingest { dir } => {
            ingest(&load_config(None, |_| {})?, &dir).await?;
        }
        Commands::Run {
            top_k,
            branch,
            store_uri,
        } => {
            let config = load_config(branch, |config| {
                if let Some(top_k) = top_k {
                    config.pipeline.top_k = top_k;
                }
                if store_uri.is_some() {
                    config.store.uri = store_uri;
                }
            })?;
            run_pipeline(&config).await?;
        }
        Commands::Explore { branch, track } => {
            explore(&load_config(branch, |_| {})?, track.as_deref()).await?;
        }
        Commands::Recommend { track, limit } => {
            recommend(&load_config(None, |_| {})?, &track, limit).await?;
        }
        Commands::Status => {
            show_status(&load_config(None, |_| {})?).await?;
        }
    }

    Ok(())
}
