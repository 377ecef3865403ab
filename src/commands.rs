use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::database::lakehouse::{Lakehouse, LakehouseBranch};
use crate::database::lancedb::VectorStore;
use crate::embeddings::SkipGramTrainer;
use crate::ingest::Ingestor;
use crate::pipeline::{Pipeline, PipelineReport, PlaylistSource, RecordPublisher, TableSink};
use crate::projection::TsneProjector;
use crate::recommend::{
    Readiness, Recommendation, RecommendationOutcome, RecommendationService, group_by_artist,
};

/// Tracks offered as recommendation seeds in explore
const EXPLORE_SEED_TRACKS: usize = 10;

async fn open_lakehouse(config: &Config) -> Result<Arc<Lakehouse>> {
    let lakehouse = Lakehouse::from_config(config)
        .await
        .context("Failed to open lakehouse")?;
    Ok(Arc::new(lakehouse))
}

async fn open_store(config: &Config) -> Result<Arc<VectorStore>> {
    let store = VectorStore::new(config)
        .await
        .context("Failed to open vector store")?;
    Ok(Arc::new(store))
}

fn print_recommendations(recommendations: &[Recommendation]) {
    if recommendations.is_empty() {
        println!("No similar tracks found.");
        return;
    }
    for (rank, rec) in recommendations.iter().enumerate() {
        println!(
            "  {}. {} by {} (score {:.4})",
            rank + 1,
            style(&rec.track_name).bold(),
            rec.artist_name,
            rec.search_score
        );
    }
}

fn print_pipeline_report(report: &PipelineReport, branch: &str, table: &str) {
    println!("{}", style("Pipeline completed").green().bold());
    println!("  Playlist rows read: {}", report.playlist_rows);
    println!("  Playlists: {}", report.sequences);
    println!(
        "  Top tracks: {} ({} without a vector)",
        report.ranked_tracks, report.missing_vectors
    );
    println!("  Vocabulary size: {}", report.vocabulary);
    println!(
        "  Records: {} ({} dropped in join)",
        report.records, report.dropped_in_join
    );
    println!(
        "  Published: {} documents to {} ({} index {})",
        report.publish.inserted,
        report.publish.collection,
        report.publish.index_kind,
        report.publish.index_name
    );
    println!("  Table {}@{}: {} rows", table, branch, report.table_rows);
}

/// Run the full pipeline against one lakehouse branch
#[inline]
pub async fn run_pipeline(config: &Config) -> Result<PipelineReport> {
    let branch = config.lakehouse.branch.clone();
    let lakehouse = open_lakehouse(config).await?;
    if !lakehouse.has_branch(&branch).await? {
        anyhow::bail!("Branch '{}' does not exist in the lakehouse", branch);
    }

    let store = open_store(config).await?;
    let view = Arc::new(LakehouseBranch::new(
        Arc::clone(&lakehouse),
        branch.clone(),
        config.lakehouse.source_table.clone(),
        config.embedding.vector_size as usize,
    ));

    let pipeline = Pipeline::new(
        config.pipeline.clone(),
        config.lakehouse.output_table.clone(),
        Arc::clone(&view) as Arc<dyn PlaylistSource>,
        view as Arc<dyn TableSink>,
        Arc::new(SkipGramTrainer::new(config.embedding.clone())),
        Arc::new(TsneProjector::new(config.projection.clone())),
        store as Arc<dyn RecordPublisher>,
    );

    info!(
        "Running pipeline on branch {} with top_k {}",
        branch, config.pipeline.top_k
    );
    let report = pipeline.run().await?;
    print_pipeline_report(&report, &branch, &config.lakehouse.output_table);
    Ok(report)
}

/// Load a directory of dataset slice files into the lakehouse
#[inline]
pub async fn ingest(config: &Config, dir: &Path) -> Result<()> {
    let lakehouse = open_lakehouse(config).await?;
    let ingestor = Ingestor::new(
        lakehouse,
        config.lakehouse.clone(),
        config.staging_dir_path(),
    );

    let report = ingestor.ingest_directory(dir).await?;

    println!("{}", style("Ingestion completed").green().bold());
    println!("  Files staged: {}", report.staged.len());
    println!("  Rows imported: {}", report.imported_rows);
    println!(
        "  Branch {} merged into {}",
        report.ingestion_branch, report.merged_into
    );
    if !report.failed.is_empty() {
        println!("  {} files failed:", style(report.failed.len()).red());
        for failed in &report.failed {
            println!("    {}: {}", failed.source.display(), failed.error);
        }
    }
    Ok(())
}

/// Summarize the one big table on a branch and recommend from one of its top tracks.
///
/// Unavailable data is reported as a message, never as an error.
#[inline]
pub async fn explore(config: &Config, track: Option<&str>) -> Result<()> {
    let store = open_store(config).await?;
    let service = RecommendationService::new(store, config.store.limit);

    if let Readiness::NotReady { reason } = service.readiness().await? {
        println!("The search index is not available yet ({}). Please try again later.", reason);
        return Ok(());
    }

    let branch = &config.lakehouse.branch;
    let table_name = &config.lakehouse.output_table;
    let lakehouse = open_lakehouse(config).await?;
    let table = match lakehouse.read_track_table(branch, table_name).await {
        Ok(table) => table,
        Err(e) => {
            error!("Failed to read {}@{}: {}", table_name, branch, e);
            println!("Something went wrong! Please check your branch and try again.");
            return Ok(());
        }
    };

    println!("{}", style(format!("{}@{}", table_name, branch)).bold());
    for record in table.iter().take(3) {
        println!(
            "  {} | {} | {} | popularity {} | ({:.2}, {:.2})",
            record.track_id,
            record.track_name,
            record.artist_name,
            record.popularity_count,
            record.two_d_coords[0],
            record.two_d_coords[1]
        );
    }

    println!();
    println!("{}", style("Music in (vector) space").bold());
    for group in group_by_artist(&table) {
        println!(
            "  {:<15} {:>5} tracks, centroid ({:.2}, {:.2})",
            group.artist, group.count, group.centroid[0], group.centroid[1]
        );
    }

    let seeds: Vec<_> = table.iter().take(EXPLORE_SEED_TRACKS).collect();
    println!();
    let Some(track_name) = track else {
        println!("Find songs similar to one of:");
        for seed in &seeds {
            println!("  {}", seed.track_name);
        }
        println!("Please select a track with --track to continue!");
        return Ok(());
    };

    let Some(seed) = seeds.iter().find(|seed| seed.track_name == track_name) else {
        println!(
            "'{}' is not one of the top {} tracks on {}.",
            track_name, EXPLORE_SEED_TRACKS, branch
        );
        return Ok(());
    };

    match service
        .recommend(&seed.embedding, Some(config.store.limit + 1))
        .await?
    {
        RecommendationOutcome::Ready(mut recs) => {
            recs.retain(|rec| rec.track_id != seed.track_id);
            recs.truncate(config.store.limit);
            println!("Songs similar to {}:", style(&seed.track_name).bold());
            print_recommendations(&recs);
        }
        RecommendationOutcome::NotReady(reason) => {
            println!("The search index is not available yet ({}).", reason);
        }
    }
    Ok(())
}

/// Recommendations for a published track id
#[inline]
pub async fn recommend(config: &Config, track_id: &str, limit: Option<usize>) -> Result<()> {
    let store = open_store(config).await?;
    let service = RecommendationService::new(store, config.store.limit);

    match service.recommend_for_track(track_id, limit).await? {
        RecommendationOutcome::Ready(recs) => {
            println!("Songs similar to {}:", style(track_id).bold());
            print_recommendations(&recs);
        }
        RecommendationOutcome::NotReady(reason) => {
            println!("The search index is not available yet ({}). Please try again later.", reason);
        }
    }
    Ok(())
}

/// Show lakehouse branches, the published collection and recent publishes
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    let lakehouse = open_lakehouse(config).await?;
    println!("{}", style("Lakehouse").bold());
    println!("  Root: {}", lakehouse.root().display());
    for branch in lakehouse.list_branches().await? {
        let tables = lakehouse.table_names(&branch).await?;
        let marker = if branch == config.lakehouse.branch { "*" } else { " " };
        println!("  {} {} [{}]", marker, branch, tables.join(", "));
    }

    let store = open_store(config).await?;
    println!();
    println!("{}", style("Vector store").bold());
    println!("  URI: {}", config.vector_store_uri());
    println!(
        "  Collection: {}.{}",
        config.store.database,
        store.collection()
    );

    match store.index_status().await? {
        Some(status) => {
            let state = if status.queryable {
                style("queryable").green()
            } else {
                style("building").yellow()
            };
            println!(
                "  Index {}: {} ({} over {}, {} dims)",
                status.index_name,
                state,
                status.index_kind,
                status.physical_table,
                status.num_dimensions
            );
            println!("  Documents: {}", store.count_documents().await?);
        }
        None => println!("  Index {}: not published", config.store.index_name),
    }

    let catalog = crate::database::Catalog::new(config.catalog_database_path()).await?;
    let runs = catalog
        .recent_publish_runs(&config.store.database, &config.store.collection, 5)
        .await?;
    if !runs.is_empty() {
        println!();
        println!("{}", style("Recent publishes").bold());
        for run in runs {
            println!(
                "  {} {} {} records ({}){}",
                run.started_at.format("%Y-%m-%d %H:%M:%S"),
                run.status,
                run.record_count,
                run.shadow_table,
                run.error_message
                    .map(|e| format!(": {}", e))
                    .unwrap_or_default()
            );
        }
    }

    Ok(())
}
