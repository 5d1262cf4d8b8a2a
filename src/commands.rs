use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::lancedb::VectorStore;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{NewClip, NewVideo};
use crate::embeddings::{EmbeddingService, HttpEmbeddingClient, sanitize_model_name};
use crate::indexer::{ResyncOrchestrator, RunOptions, RunStats};
use crate::jobs::{JobResolver, RunSpec};
use crate::media::FfmpegDecoder;

/// Number of neighbours shown by `search` when none is given
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Stores and clients shared by the commands that touch both stores
struct Pipeline {
    database: Database,
    vector_store: VectorStore,
    embedder: HttpEmbeddingClient,
    decoder: FfmpegDecoder,
}

impl Pipeline {
    async fn open(config: &Config) -> Result<Self> {
        let embedder = HttpEmbeddingClient::new(config)
            .context("Failed to initialize embedding client")?;

        let database = Database::initialize_from_config_dir(config.get_base_dir())
            .await
            .context("Failed to initialize SQLite database")?;

        let vector_store = match VectorStore::open(
            config,
            embedder.model_name(),
            embedder.embedding_dimension(),
        )
        .await
        {
            Ok(store) => store,
            Err(e) => {
                database.close().await;
                return Err(e).context("Failed to initialize LanceDB vector store");
            }
        };

        let decoder = FfmpegDecoder::new();
        if let Err(e) = decoder.health_check() {
            warn!("ffmpeg is not usable, every source will fail: {:#}", e);
        }

        Ok(Self {
            database,
            vector_store,
            embedder,
            decoder,
        })
    }

    fn orchestrator(&self, options: RunOptions) -> ResyncOrchestrator<'_> {
        ResyncOrchestrator::new(
            &self.database,
            &self.vector_store,
            &self.embedder,
            &self.decoder,
            options,
        )
    }
}

/// Load a run file, applying its model and dimension overrides to `config`
fn load_run_spec(config: &Config, run_file: &Path) -> Result<(Config, RunSpec)> {
    let spec = RunSpec::load(run_file)?;
    let mut config = config.clone();
    if let Some(model) = &spec.model {
        info!("Run file selects model {}", model);
        config.embedding.model.clone_from(model);
    }
    if let Some(dimension) = spec.embedding_dimension {
        info!("Run file selects embedding dimension {}", dimension);
        config.embedding.embedding_dimension = dimension;
    }
    config
        .embedding
        .validate()
        .context("Run file overrides give an invalid embedding configuration")?;
    Ok((config, spec))
}

/// Resolve the jobs of `run_file` and bring every source into a consistent state
#[inline]
pub async fn run_jobs(config: &Config, run_file: &Path) -> Result<RunStats> {
    let (config, spec) = load_run_spec(config, run_file)?;
    let pipeline = Pipeline::open(&config).await?;

    let options = RunOptions::from_run_spec(&spec, &config.ingest);
    let resolver = JobResolver::new(pipeline.database.clone());
    let result = pipeline
        .orchestrator(options)
        .run(&resolver, &spec.jobs)
        .await;
    pipeline.database.close().await;
    let stats = result?;

    println!("{}", style("Run complete").bold().green());
    println!("  Sources: {}", stats.resolved);
    println!("  Re-ingested: {}", stats.resynced);
    println!("  Already valid: {}", stats.skipped_valid);
    println!("  Failed: {}", stats.failed);
    println!("  Frames written: {}", stats.frames_written);

    Ok(stats)
}

/// Report the integrity of every source named by `run_file` without writing
#[inline]
pub async fn validate_jobs(config: &Config, run_file: &Path) -> Result<()> {
    let (config, spec) = load_run_spec(config, run_file)?;
    let pipeline = Pipeline::open(&config).await?;

    let orchestrator = pipeline.orchestrator(RunOptions::from_run_spec(&spec, &config.ingest));
    let resolver = JobResolver::new(pipeline.database.clone());
    let result = match orchestrator.prepare_sources(&resolver, &spec.jobs).await {
        Ok(sources) => orchestrator.validate_sources(&sources).await,
        Err(e) => Err(e),
    };
    pipeline.database.close().await;
    let reports = result?;

    let invalid = reports.iter().filter(|report| !report.is_valid()).count();
    for report in &reports {
        let marker = if report.is_valid() {
            style("ok").green()
        } else {
            style("!!").red()
        };
        println!("{} {}", marker, report.summary());
    }
    println!();
    println!(
        "{} sources checked, {} valid, {} need re-ingestion",
        reports.len(),
        reports.len() - invalid,
        invalid
    );

    Ok(())
}

/// Print the stored frames nearest to frame `frame_id`
#[inline]
pub async fn search_similar(config: &Config, frame_id: i64, limit: usize) -> Result<()> {
    let database = Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to initialize SQLite database")?;
    let result = search_with(config, &database, frame_id, limit).await;
    database.close().await;
    result
}

async fn search_with(config: &Config, database: &Database, frame_id: i64, limit: usize) -> Result<()> {
    let model_name = sanitize_model_name(&config.embedding.model);
    let vector_store = VectorStore::open(
        config,
        &model_name,
        config.embedding.embedding_dimension as usize,
    )
    .await
    .context("Failed to initialize LanceDB vector store")?;

    let Some(frame) = database.get_frame(frame_id).await? else {
        anyhow::bail!("Frame {} does not exist", frame_id);
    };
    let Some(entry) = vector_store
        .vector_for_object(&frame.id.to_string())
        .await?
    else {
        anyhow::bail!("Frame {} has no vector for model {}", frame_id, model_name);
    };

    let hits = vector_store.search(&entry.embeddings, limit + 1).await?;

    println!(
        "Frames similar to {} ({}, {:.2}s):",
        frame.id,
        frame.source(),
        frame.timestamp
    );
    let mut shown = 0;
    for hit in hits.iter().filter(|hit| hit.object_id != entry.object_id) {
        if shown == limit {
            break;
        }
        let Ok(neighbour_id) = hit.object_id.parse::<i64>() else {
            warn!("Vector {} has a non-numeric object id", hit.id);
            continue;
        };
        match database.get_frame(neighbour_id).await? {
            Some(neighbour) => println!(
                "  {:>8}  {:<24} {:>9.2}s  distance {:.4}",
                neighbour.id,
                neighbour.source().to_string(),
                neighbour.timestamp,
                hit.distance
            ),
            None => println!(
                "  {:>8}  {:<24} {:>10}  distance {:.4}",
                neighbour_id,
                style("(frame deleted)").dim(),
                "",
                hit.distance
            ),
        }
        shown += 1;
    }

    if shown == 0 {
        println!("  No neighbours found");
    }
    Ok(())
}

/// Register a video so jobs can resolve it
#[inline]
pub async fn add_video(
    config: &Config,
    path: &Path,
    name: Option<String>,
    metadata: &[String],
) -> Result<()> {
    let metadata = parse_metadata(metadata)?;
    let database = Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to initialize SQLite database")?;

    let result = database
        .insert_video(NewVideo {
            path: path.display().to_string(),
            name,
            metadata,
        })
        .await;
    database.close().await;
    let video = result.context("Failed to create video entry")?;

    println!("Created video: {} (ID: {})", video.path, video.id);
    Ok(())
}

/// Register a `[start, end]` clip of an existing video
#[inline]
pub async fn add_clip(
    config: &Config,
    video: i64,
    start: f64,
    end: f64,
    metadata: &[String],
) -> Result<()> {
    anyhow::ensure!(
        start >= 0.0 && end > start,
        "Clip bounds must satisfy 0 <= start < end, got {}..{}",
        start,
        end
    );
    let metadata = parse_metadata(metadata)?;
    let database = Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to initialize SQLite database")?;

    let result = database
        .insert_clip(NewClip {
            video,
            start,
            end,
            metadata,
        })
        .await;
    database.close().await;
    let clip = result.context("Failed to create clip entry")?;

    println!(
        "Created clip: video {} [{:.2}s-{:.2}s] (ID: {})",
        clip.video, clip.start, clip.end, clip.id
    );
    Ok(())
}

/// Parse `key=value` pairs; values that are valid JSON keep their type
#[inline]
pub fn parse_metadata(pairs: &[String]) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut metadata = serde_json::Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            anyhow::bail!("Metadata must be given as key=value, got '{}'", pair);
        };
        let key = key.trim();
        anyhow::ensure!(!key.is_empty(), "Metadata key is empty in '{}'", pair);
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}

/// Show store contents and the health of external services
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("{}", style("Frame Embedder Status").bold().cyan());
    println!("{}", "=".repeat(50));
    println!();

    println!("{}", style("Record Store:").bold().yellow());
    match Database::initialize_from_config_dir(config.get_base_dir()).await {
        Ok(database) => {
            match database.statistics().await {
                Ok(stats) => {
                    println!("  SQLite: {}", style("Connected").green());
                    println!("  Videos: {}", stats.videos);
                    println!("  Clips: {}", stats.clips);
                    println!("  Frames: {}", stats.frames);
                    println!("  Embedding records: {}", stats.embeddings);
                }
                Err(e) => println!("  SQLite: {} - {:#}", style("Query failed").red(), e),
            }
            database.close().await;
        }
        Err(e) => println!("  SQLite: {} - {:#}", style("Failed to connect").red(), e),
    }

    println!();
    println!("{}", style("Vector Index:").bold().yellow());
    let model_name = sanitize_model_name(&config.embedding.model);
    match VectorStore::open(config, &model_name, config.embedding.embedding_dimension as usize).await {
        Ok(store) => {
            println!("  LanceDB: {}", style("Connected").green());
            println!("  Table: {}", store.table_name());
            println!("  Metric: {}", store.metric());
            match store.count_all().await {
                Ok(count) => println!("  Vectors: {}", count),
                Err(e) => println!("  Vectors: {} - {}", style("unknown").red(), e),
            }
        }
        Err(e) => println!("  LanceDB: {} - {}", style("Failed to open").red(), e),
    }

    println!();
    println!("{}", style("Embedding Service:").bold().yellow());
    match HttpEmbeddingClient::new(config) {
        Ok(client) => match client.health_check() {
            Ok(()) => {
                println!("  Service: {}", style("Healthy").green());
                println!("  Model: {}", config.embedding.model);
                println!("  Dimension: {}", config.embedding.embedding_dimension);
            }
            Err(e) => println!("  Service: {} - {:#}", style("Unhealthy").red(), e),
        },
        Err(e) => println!("  Service: {} - {:#}", style("Misconfigured").red(), e),
    }

    println!();
    println!("{}", style("Decoder:").bold().yellow());
    match FfmpegDecoder::new().health_check() {
        Ok(()) => println!("  ffmpeg: {}", style("Available").green()),
        Err(e) => println!("  ffmpeg: {} - {:#}", style("Unavailable").red(), e),
    }

    Ok(())
}
