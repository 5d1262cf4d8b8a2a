use anyhow::{Context, Result};
use tracing::debug;

use crate::FrameEmbedderError;
use crate::database::lancedb::VectorStore;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{NewEmbeddingRecord, NewFrameRecord};
use crate::embeddings::EmbeddingService;
use crate::media::{Frame, SourceKey};

#[cfg(test)]
mod tests;

/// Writes one chunk of frames to the record store and the vector index.
///
/// Frame records go in first, then vectors keyed by frame id, then the
/// embedding records tying the two together. A failure between the vector
/// insert and the embedding records leaves frames without embeddings, which
/// the integrity check reports on the next run.
pub struct DualWriteCoordinator<'a> {
    database: &'a Database,
    vector_store: &'a VectorStore,
    embedder: &'a dyn EmbeddingService,
}

impl<'a> DualWriteCoordinator<'a> {
    #[inline]
    pub fn new(
        database: &'a Database,
        vector_store: &'a VectorStore,
        embedder: &'a dyn EmbeddingService,
    ) -> Self {
        Self {
            database,
            vector_store,
            embedder,
        }
    }

    /// Store `frames` for `source`, returning the number of frames written
    #[inline]
    pub async fn write_chunk(&self, source: SourceKey, frames: &[Frame]) -> Result<usize> {
        if frames.is_empty() {
            return Ok(0);
        }

        let new_frames: Vec<NewFrameRecord> = frames
            .iter()
            .map(|frame| NewFrameRecord {
                timestamp: frame.timestamp,
                source,
            })
            .collect();
        let frame_ids = self
            .database
            .insert_frames(&new_frames)
            .await
            .context("Failed to insert frame records")?;

        let vectors = self
            .embedder
            .embed_frames(frames)
            .context("Failed to embed frames")?;
        if vectors.len() != frame_ids.len() {
            return Err(FrameEmbedderError::Embedding(format!(
                "Embedding service returned {} vectors for {} frames",
                vectors.len(),
                frame_ids.len()
            ))
            .into());
        }

        let object_ids: Vec<String> = frame_ids.iter().map(i64::to_string).collect();
        let vector_ids = self
            .vector_store
            .insert_batch(&object_ids, &vectors)
            .await
            .context("Failed to insert vectors")?;

        let records: Vec<NewEmbeddingRecord> = frame_ids
            .iter()
            .zip(&vector_ids)
            .map(|(frame, vector_id)| NewEmbeddingRecord {
                frame: *frame,
                vector_entry: vector_id.to_string(),
                source,
                model_name: self.embedder.model_name().to_string(),
            })
            .collect();
        self.database
            .insert_embedding_records(&records)
            .await
            .context("Failed to insert embedding records")?;

        debug!("Wrote {} frames for {}", frame_ids.len(), source);
        Ok(frame_ids.len())
    }
}
