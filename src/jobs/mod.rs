// Jobs module
// Declarative job specifications and their resolution into media sources


use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::FrameEmbedderError;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::SearchFilter;
use crate::media::MediaSource;

pub const DEFAULT_SAMPLING_INTERVAL: u32 = 50;

fn default_sampling_interval() -> u32 {
    DEFAULT_SAMPLING_INTERVAL
}

fn default_shuffle() -> bool {
    true
}

/// Parameters shared by every job kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub filter: SearchFilter,
    /// Keep every Nth native frame
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval: u32,
    /// Stop after this many sampled frames per source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_count_limit: Option<u32>,
    /// Drop sources that already have embeddings for the active model
    #[serde(default)]
    pub only_not_embedded: bool,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            filter: SearchFilter::default(),
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            frame_count_limit: None,
            only_not_embedded: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Job {
    /// Whole videos matching the filter
    Video(JobSpec),
    /// Clips matching the filter, bounded by their start and end times
    Clip(JobSpec),
    /// Sources produced by a resolver registered under `name`
    Custom {
        name: String,
        #[serde(flatten)]
        spec: JobSpec,
    },
}

impl Job {
    #[inline]
    pub fn spec(&self) -> &JobSpec {
        match self {
            Job::Video(spec) | Job::Clip(spec) | Job::Custom { spec, .. } => spec,
        }
    }

    /// Short description used in logs
    #[inline]
    pub fn describe(&self) -> String {
        match self {
            Job::Video(_) => "video job".to_string(),
            Job::Clip(_) => "clip job".to_string(),
            Job::Custom { name, .. } => format!("custom job '{}'", name),
        }
    }

    #[inline]
    pub fn validate(&self) -> crate::Result<()> {
        let spec = self.spec();
        if spec.sampling_interval == 0 {
            return Err(FrameEmbedderError::Job(format!(
                "{}: sampling_interval must be at least 1",
                self.describe()
            )));
        }
        if spec.frame_count_limit == Some(0) {
            return Err(FrameEmbedderError::Job(format!(
                "{}: frame_count_limit must be at least 1 when set",
                self.describe()
            )));
        }
        if let Job::Custom { name, .. } = self {
            if name.trim().is_empty() {
                return Err(FrameEmbedderError::Job(
                    "custom job needs a resolver name".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// A run file: the jobs to resolve plus run-level options.
///
/// Options left unset fall back to the `[ingest]` section of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    /// Overrides the configured embedding model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Overrides the configured embedding dimension, usually alongside `model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_dimension: Option<u32>,
    #[serde(default)]
    pub jobs: Vec<Job>,
    /// Process at most this many sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_samples: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_frequency: Option<u32>,
    /// Applies the not-embedded filter to every job
    #[serde(default)]
    pub only_not_embedded: bool,
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
}

impl RunSpec {
    #[inline]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read run file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid run file: {}", path.display()))
    }

    #[inline]
    pub fn from_toml(content: &str) -> Result<Self> {
        let spec: RunSpec = toml::from_str(content).context("Failed to parse run file")?;
        spec.validate()?;
        Ok(spec)
    }

    #[inline]
    pub fn validate(&self) -> crate::Result<()> {
        if self.jobs.is_empty() {
            return Err(FrameEmbedderError::Job(
                "run file defines no jobs".to_string(),
            ));
        }
        for job in &self.jobs {
            job.validate()?;
        }
        if self.embedding_dimension == Some(0) {
            return Err(FrameEmbedderError::Job(
                "embedding_dimension must be at least 1 when set".to_string(),
            ));
        }
        if self.limit_samples == Some(0) {
            return Err(FrameEmbedderError::Job(
                "limit_samples must be at least 1 when set".to_string(),
            ));
        }
        if self.flush_frequency == Some(0) {
            return Err(FrameEmbedderError::Job(
                "flush_frequency must be at least 1 when set".to_string(),
            ));
        }
        if self.chunk_size == Some(0) {
            return Err(FrameEmbedderError::Job(
                "chunk_size must be at least 1 when set".to_string(),
            ));
        }
        if let Some(tolerance) = self.tolerance {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(FrameEmbedderError::Job(format!(
                    "tolerance must be a non-negative number, got {}",
                    tolerance
                )));
            }
        }
        Ok(())
    }
}

/// Resolution for a custom job kind
#[async_trait]
pub trait CustomResolver: Send + Sync {
    async fn resolve(&self, database: &Database, spec: &JobSpec) -> Result<Vec<MediaSource>>;
}

/// Expands jobs into media sources using the record store
pub struct JobResolver {
    database: Database,
    custom_resolvers: HashMap<String, Box<dyn CustomResolver>>,
}

impl JobResolver {
    #[inline]
    pub fn new(database: Database) -> Self {
        Self {
            database,
            custom_resolvers: HashMap::new(),
        }
    }

    /// Register the resolver used for `kind = "custom"` jobs named `name`
    #[inline]
    pub fn register(&mut self, name: impl Into<String>, resolver: Box<dyn CustomResolver>) {
        self.custom_resolvers.insert(name.into(), resolver);
    }

    /// Sources for a single job, in record-store order
    #[inline]
    pub async fn resolve_job(&self, job: &Job) -> Result<Vec<MediaSource>> {
        let sources = match job {
            Job::Video(spec) => self
                .database
                .find_videos(&spec.filter)
                .await?
                .iter()
                .map(|row| {
                    MediaSource::Video(row.to_video(spec.sampling_interval, spec.frame_count_limit))
                })
                .collect(),
            Job::Clip(spec) => self
                .database
                .find_clips(&spec.filter)
                .await?
                .iter()
                .map(|row| {
                    MediaSource::Clip(row.to_clip(spec.sampling_interval, spec.frame_count_limit))
                })
                .collect(),
            Job::Custom { name, spec } => match self.custom_resolvers.get(name) {
                Some(resolver) => resolver
                    .resolve(&self.database, spec)
                    .await
                    .with_context(|| format!("Custom resolver '{}' failed", name))?,
                None => {
                    warn!("No resolver registered for custom job '{}', skipping", name);
                    Vec::new()
                }
            },
        };

        debug!("{} resolved to {} sources", job.describe(), sources.len());
        Ok(sources)
    }

    /// Sources for all jobs, concatenated in job order.
    ///
    /// The not-embedded filter is applied to a job's sources when the job or
    /// `only_not_embedded` asks for it.
    #[inline]
    pub async fn resolve(
        &self,
        jobs: &[Job],
        model_name: &str,
        only_not_embedded: bool,
    ) -> Result<Vec<MediaSource>> {
        let mut sources = Vec::new();

        for job in jobs {
            let mut resolved = self.resolve_job(job).await?;
            if only_not_embedded || job.spec().only_not_embedded {
                let before = resolved.len();
                resolved = filter_not_embedded(&self.database, resolved, model_name).await?;
                debug!(
                    "{}: {} of {} sources already embedded",
                    job.describe(),
                    before - resolved.len(),
                    before
                );
            }
            sources.extend(resolved);
        }

        info!("Resolved {} jobs into {} sources", jobs.len(), sources.len());
        Ok(sources)
    }
}

/// Drop every source that already has embedding records under `model_name`
#[inline]
pub async fn filter_not_embedded(
    database: &Database,
    sources: Vec<MediaSource>,
    model_name: &str,
) -> Result<Vec<MediaSource>> {
    if sources.is_empty() {
        return Ok(sources);
    }

    let mut video_ids: Vec<i64> = sources.iter().map(MediaSource::video_id).collect();
    video_ids.sort_unstable();
    video_ids.dedup();

    let embedded = database.embedded_sources(&video_ids, model_name).await?;

    Ok(sources
        .into_iter()
        .filter(|source| !embedded.contains(&source.key()))
        .collect())
}
