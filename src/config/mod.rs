// Configuration management module
// TOML settings for the embedding service, ingestion defaults and the vector index

pub mod settings;


use std::path::PathBuf;

use anyhow::{Context, Result};
use console::style;

pub use settings::{Config, ConfigError, EmbeddingConfig, IngestConfig, VectorIndexConfig};

/// Base directory from the command line, falling back to `~/.frame-embedder`
#[inline]
pub fn resolve_base_dir(base_dir: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match base_dir {
        Some(dir) => Ok(dir),
        None => Config::default_base_dir(),
    }
}

/// Load the configuration from the resolved base directory
#[inline]
pub fn load_config(base_dir: Option<PathBuf>) -> Result<Config> {
    let base_dir = resolve_base_dir(base_dir).context("Failed to locate base directory")?;
    Config::load(&base_dir).context("Failed to load configuration")
}

#[inline]
pub fn show_config(config: &Config) {
    eprintln!("{}", style("Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Service:").bold().yellow());
    match config.embedding.embedding_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!(
        "  Dimension: {}",
        style(config.embedding.embedding_dimension).cyan()
    );
    eprintln!("  Batch Size: {}", style(config.embedding.batch_size).cyan());
    eprintln!(
        "  Timeout: {}s",
        style(config.embedding.timeout_seconds).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Ingestion:").bold().yellow());
    eprintln!("  Chunk Size: {}", style(config.ingest.chunk_size).cyan());
    eprintln!("  Tolerance: {}", style(config.ingest.tolerance).cyan());
    eprintln!(
        "  Flush Frequency: {}",
        style(config.ingest.flush_frequency).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Vector Index:").bold().yellow());
    eprintln!("  Metric: {}", style(config.vector_index.metric).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
}
