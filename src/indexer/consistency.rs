// Per-source integrity validation
// Checks that the record store and the vector index agree for one source

use std::fmt;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::database::lancedb::VectorStore;
use crate::database::sqlite::Database;
use crate::media::{MediaInfo, MediaSource, SourceKey};

#[cfg(test)]
mod tests;

/// The first check a source failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityFailure {
    NoFrames,
    SampleCount,
    MissingEmbeddings,
    MissingVectors,
}

impl fmt::Display for IntegrityFailure {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IntegrityFailure::NoFrames => "no frames stored",
            IntegrityFailure::SampleCount => "sample count outside tolerance",
            IntegrityFailure::MissingEmbeddings => "frames without embedding records",
            IntegrityFailure::MissingVectors => "embedding records without vectors",
        };
        f.write_str(text)
    }
}

/// Integrity check results for one source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub source: SourceKey,
    pub name: String,
    /// Frame records stored for the source
    pub frame_count: usize,
    /// Native length divided by the sampling interval, capped by the frame limit
    pub expected_count: f64,
    /// Embedding records of the active model referencing those frames
    pub embedding_count: usize,
    /// Entries present in the index for the ids those records reference
    pub vector_count: usize,
    pub failure: Option<IntegrityFailure>,
}

impl IntegrityReport {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.failure.is_none()
    }

    #[inline]
    pub fn summary(&self) -> String {
        let status = match self.failure {
            None => "valid".to_string(),
            Some(failure) => format!("invalid ({})", failure),
        };
        format!(
            "{}: {} - frames {} / expected {:.1}, embeddings {}, vectors {}",
            self.name,
            status,
            self.frame_count,
            self.expected_count,
            self.embedding_count,
            self.vector_count
        )
    }
}

/// Rows removed by a purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub frames: u64,
    pub embeddings: u64,
    pub vectors: usize,
}

/// Decides whether a source's stored state is complete and consistent
pub struct IntegrityValidator<'a> {
    database: &'a Database,
    vector_store: &'a VectorStore,
    tolerance: f64,
}

impl<'a> IntegrityValidator<'a> {
    #[inline]
    pub fn new(database: &'a Database, vector_store: &'a VectorStore, tolerance: f64) -> Self {
        Self {
            database,
            vector_store,
            tolerance,
        }
    }

    /// Run every check for `source`, recording the first one that fails
    #[inline]
    pub async fn validate(&self, source: &MediaSource, info: &MediaInfo) -> Result<IntegrityReport> {
        let key = source.key();
        let frame_ids = self
            .database
            .frame_ids_for_source(key)
            .await
            .context("Failed to list frames for validation")?;

        let model_name = self.vector_store.model_name();
        let records = self
            .database
            .embedding_records_for_frames(&frame_ids)
            .await
            .context("Failed to list embedding records for validation")?;
        let vector_refs: Vec<&str> = records
            .iter()
            .filter(|record| record.model_name == model_name)
            .map(|record| record.vector_entry.as_str())
            .collect();

        let parsed: Vec<i64> = vector_refs
            .iter()
            .filter_map(|reference| reference.parse().ok())
            .collect();
        let vector_count = self
            .vector_store
            .count_ids(&parsed)
            .await
            .context("Failed to count referenced vectors")?;

        let native_length = source.native_length(info);
        let expected_count = source.expected_sample_count(info);
        let frame_count = frame_ids.len();

        let failure = if frame_count == 0 {
            Some(IntegrityFailure::NoFrames)
        } else if native_length > 0
            && (expected_count - frame_count as f64).abs() > self.tolerance
        {
            Some(IntegrityFailure::SampleCount)
        } else if vector_refs.len() != frame_count {
            Some(IntegrityFailure::MissingEmbeddings)
        } else if vector_count != vector_refs.len() {
            Some(IntegrityFailure::MissingVectors)
        } else {
            None
        };

        let report = IntegrityReport {
            source: key,
            name: source.name(),
            frame_count,
            expected_count,
            embedding_count: vector_refs.len(),
            vector_count,
            failure,
        };

        match report.failure {
            None => debug!("{}", report.summary()),
            Some(IntegrityFailure::NoFrames) => info!("{}", report.summary()),
            Some(_) => warn!("{}", report.summary()),
        }

        Ok(report)
    }

    /// Delete everything stored for `source` in both stores.
    ///
    /// Vectors are deleted before any record-store row.
    #[inline]
    pub async fn purge_source(&self, source: SourceKey) -> Result<PurgeStats> {
        let frame_ids = self
            .database
            .frame_ids_for_source(source)
            .await
            .context("Failed to list frames to purge")?;
        if frame_ids.is_empty() {
            return Ok(PurgeStats::default());
        }

        let records = self
            .database
            .embedding_records_for_frames(&frame_ids)
            .await
            .context("Failed to list embedding records to purge")?;
        let vector_ids: Vec<i64> = records
            .iter()
            .filter_map(|record| record.vector_entry.parse().ok())
            .collect();

        let vectors = self
            .vector_store
            .count_ids(&vector_ids)
            .await
            .context("Failed to count vectors to purge")?;
        self.vector_store
            .delete_ids(&vector_ids)
            .await
            .context("Failed to delete vectors")?;

        // Vectors written before their embedding record existed
        let object_ids: Vec<String> = frame_ids.iter().map(i64::to_string).collect();
        self.vector_store
            .delete_object_ids(&object_ids)
            .await
            .context("Failed to delete unreferenced vectors")?;

        let embeddings = self
            .database
            .delete_embedding_records_for_frames(&frame_ids)
            .await
            .context("Failed to delete embedding records")?;
        let frames = self
            .database
            .delete_frames(&frame_ids)
            .await
            .context("Failed to delete frames")?;

        info!(
            "Purged {}: {} frames, {} embedding records, {} vectors",
            source, frames, embeddings, vectors
        );

        Ok(PurgeStats {
            frames,
            embeddings,
            vectors,
        })
    }
}
