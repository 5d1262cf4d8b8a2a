// Indexer module
// Resolve, validate, purge and re-ingest sources until both stores agree

pub mod consistency;
pub mod writer;


use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::database::lancedb::VectorStore;
use crate::database::sqlite::Database;
use crate::embeddings::EmbeddingService;
use crate::jobs::{Job, JobResolver, RunSpec};
use crate::media::{FrameDecoder, FrameStreamer, MediaSource};
use crate::{FrameEmbedderError, Result};

pub use consistency::{IntegrityFailure, IntegrityReport, IntegrityValidator, PurgeStats};
pub use writer::DualWriteCoordinator;

/// Options for one orchestrated run
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub chunk_size: usize,
    pub tolerance: f64,
    /// Flush the vector index every this many processed sources
    pub flush_frequency: u32,
    pub limit_samples: Option<usize>,
    pub shuffle: bool,
    pub only_not_embedded: bool,
}

impl Default for RunOptions {
    #[inline]
    fn default() -> Self {
        Self::from_ingest(&IngestConfig::default())
    }
}

impl RunOptions {
    #[inline]
    pub fn from_ingest(ingest: &IngestConfig) -> Self {
        Self {
            chunk_size: ingest.chunk_size,
            tolerance: ingest.tolerance,
            flush_frequency: ingest.flush_frequency,
            limit_samples: None,
            shuffle: false,
            only_not_embedded: false,
        }
    }

    /// Run-file options, falling back to the configured ingest defaults
    #[inline]
    pub fn from_run_spec(spec: &RunSpec, ingest: &IngestConfig) -> Self {
        Self {
            chunk_size: spec.chunk_size.unwrap_or(ingest.chunk_size),
            tolerance: spec.tolerance.unwrap_or(ingest.tolerance),
            flush_frequency: spec.flush_frequency.unwrap_or(ingest.flush_frequency),
            limit_samples: spec.limit_samples,
            shuffle: spec.shuffle,
            only_not_embedded: spec.only_not_embedded,
        }
    }
}

/// Counters for a completed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Sources left after filtering and truncation
    pub resolved: usize,
    pub skipped_valid: usize,
    pub resynced: usize,
    /// Sources abandoned because their media could not be read
    pub failed: usize,
    pub frames_written: usize,
    /// Vector index flushes performed
    pub flushes: usize,
}

/// What happened to one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOutcome {
    Valid,
    Resynced { frames: usize },
}

/// Drives sources through validation and, when needed, purge and re-ingestion
pub struct ResyncOrchestrator<'a> {
    database: &'a Database,
    vector_store: &'a VectorStore,
    embedder: &'a dyn EmbeddingService,
    decoder: &'a dyn FrameDecoder,
    options: RunOptions,
}

impl<'a> ResyncOrchestrator<'a> {
    #[inline]
    pub fn new(
        database: &'a Database,
        vector_store: &'a VectorStore,
        embedder: &'a dyn EmbeddingService,
        decoder: &'a dyn FrameDecoder,
        options: RunOptions,
    ) -> Self {
        Self {
            database,
            vector_store,
            embedder,
            decoder,
            options,
        }
    }

    #[inline]
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Resolve `jobs` and bring every resulting source into a consistent state
    #[inline]
    pub async fn run(&self, resolver: &JobResolver, jobs: &[Job]) -> Result<RunStats> {
        let sources = self.prepare_sources(resolver, jobs).await?;
        self.process_sources(&sources).await
    }

    /// Resolve, optionally shuffle, then truncate to the sample limit
    #[inline]
    pub async fn prepare_sources(
        &self,
        resolver: &JobResolver,
        jobs: &[Job],
    ) -> Result<Vec<MediaSource>> {
        let mut sources = resolver
            .resolve(
                jobs,
                self.embedder.model_name(),
                self.options.only_not_embedded,
            )
            .await
            .context("Failed to resolve jobs")?;

        if self.options.shuffle {
            sources.shuffle(&mut rand::thread_rng());
        }
        if let Some(limit) = self.options.limit_samples {
            sources.truncate(limit);
        }

        info!("Resolved {} sources", sources.len());
        Ok(sources)
    }

    /// Process `sources` in order.
    ///
    /// Media failures are logged and counted; any other error ends the run.
    #[inline]
    pub async fn process_sources(&self, sources: &[MediaSource]) -> Result<RunStats> {
        let mut stats = RunStats {
            resolved: sources.len(),
            ..RunStats::default()
        };
        let flush_frequency = self.options.flush_frequency.max(1) as usize;
        let bar = progress_bar(sources.len(), "Embedding {msg}");

        for (position, source) in sources.iter().enumerate() {
            bar.set_message(source.name());

            match self.process_source(source).await {
                Ok(SourceOutcome::Valid) => stats.skipped_valid += 1,
                Ok(SourceOutcome::Resynced { frames }) => {
                    stats.resynced += 1;
                    stats.frames_written += frames;
                }
                Err(e) if is_media_error(&e) => {
                    warn!("Skipping {}: {:#}", source.name(), e);
                    stats.failed += 1;
                }
                Err(e) => {
                    bar.abandon();
                    return Err(e.into());
                }
            }
            bar.inc(1);

            let processed = position + 1;
            if processed % flush_frequency == 0 {
                self.vector_store.flush().await?;
                stats.flushes += 1;
                info!(
                    "Processed {}/{} sources ({} resynced, {} valid, {} failed)",
                    processed,
                    sources.len(),
                    stats.resynced,
                    stats.skipped_valid,
                    stats.failed
                );
            }
        }

        // A run ending on a periodic flush is already durable
        if sources.len() % flush_frequency != 0 {
            self.vector_store.flush().await?;
            stats.flushes += 1;
        }
        bar.finish_and_clear();

        info!(
            "Run complete: {} sources, {} resynced, {} valid, {} failed, {} frames written",
            stats.resolved, stats.resynced, stats.skipped_valid, stats.failed, stats.frames_written
        );
        Ok(stats)
    }

    /// Validate one source and re-ingest it from scratch if it is not consistent
    #[inline]
    pub async fn process_source(&self, source: &MediaSource) -> anyhow::Result<SourceOutcome> {
        let info = self
            .decoder
            .probe(source.source_path())
            .map_err(|e| media_error(&e))?;

        let validator = self.validator();
        let report = validator.validate(source, &info).await?;
        if report.is_valid() {
            debug!("{} is consistent, skipping", source.name());
            return Ok(SourceOutcome::Valid);
        }

        validator.purge_source(source.key()).await?;

        let writer = DualWriteCoordinator::new(self.database, self.vector_store, self.embedder);
        let streamer = FrameStreamer::open(self.decoder, source, self.options.chunk_size)
            .map_err(|e| media_error(&e))?;

        let mut frames = 0;
        for chunk in streamer {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    // Drop the partial ingest so the next run sees no frames
                    validator.purge_source(source.key()).await?;
                    return Err(media_error(&e));
                }
            };
            frames += writer.write_chunk(source.key(), &chunk).await?;
        }

        info!("Re-ingested {} with {} frames", source.name(), frames);
        Ok(SourceOutcome::Resynced { frames })
    }

    /// Integrity reports for `sources` without writing anything
    #[inline]
    pub async fn validate_sources(&self, sources: &[MediaSource]) -> Result<Vec<IntegrityReport>> {
        let validator = self.validator();
        let bar = progress_bar(sources.len(), "Validating {msg}");
        let mut reports = Vec::with_capacity(sources.len());

        for source in sources {
            bar.set_message(source.name());
            match self.decoder.probe(source.source_path()) {
                Ok(info) => reports.push(validator.validate(source, &info).await?),
                Err(e) => warn!("Cannot validate {}: {:#}", source.name(), e),
            }
            bar.inc(1);
        }

        bar.finish_and_clear();
        Ok(reports)
    }

    fn validator(&self) -> IntegrityValidator<'a> {
        IntegrityValidator::new(self.database, self.vector_store, self.options.tolerance)
    }
}

fn progress_bar(length: usize, template: &str) -> ProgressBar {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new(length as u64).with_style(
            ProgressStyle::with_template(&format!("{{bar:40}} [{{pos}}/{{len}}] {}", template))
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_length(length as u64);
    bar
}

fn media_error(error: &anyhow::Error) -> anyhow::Error {
    FrameEmbedderError::Media(format!("{:#}", error)).into()
}

/// Whether `error` stems from reading a source's media
#[inline]
pub fn is_media_error(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<FrameEmbedderError>(),
        Some(FrameEmbedderError::Media(_))
    )
}
