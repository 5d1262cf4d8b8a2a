use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::models::{
    ClipRow, ClipWithVideo, EmbeddingRecord, FrameRecord, NewClip, NewEmbeddingRecord,
    NewFrameRecord, NewVideo, SearchFilter, SourceCounts, StoreStatistics, VideoRow,
};
use crate::database::sqlite::queries::{
    ClipQueries, EmbeddingQueries, FrameQueries, VideoQueries,
};
use crate::media::SourceKey;


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

/// Relational record store for videos, clips, frames and embedding records
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(database_url: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        let db_path = config_dir.join("metadata.db");
        let db_url = db_path.to_string_lossy();

        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(db_url.as_ref()).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // Video and clip operations
    pub async fn insert_video(&self, video: NewVideo) -> Result<VideoRow> {
        VideoQueries::create(&self.pool, video).await
    }

    pub async fn find_videos(&self, filter: &SearchFilter) -> Result<Vec<VideoRow>> {
        VideoQueries::find(&self.pool, filter).await
    }

    pub async fn insert_clip(&self, clip: NewClip) -> Result<ClipRow> {
        ClipQueries::create(&self.pool, clip).await
    }

    pub async fn find_clips(&self, filter: &SearchFilter) -> Result<Vec<ClipWithVideo>> {
        ClipQueries::find_with_video(&self.pool, filter).await
    }

    // Frame operations
    pub async fn insert_frames(&self, frames: &[NewFrameRecord]) -> Result<Vec<i64>> {
        FrameQueries::create_batch(&self.pool, frames).await
    }

    pub async fn get_frame(&self, id: i64) -> Result<Option<FrameRecord>> {
        FrameQueries::get_by_id(&self.pool, id).await
    }

    pub async fn frames_for_source(&self, source: SourceKey) -> Result<Vec<FrameRecord>> {
        FrameQueries::list_for_source(&self.pool, source).await
    }

    pub async fn frame_ids_for_source(&self, source: SourceKey) -> Result<Vec<i64>> {
        FrameQueries::ids_for_source(&self.pool, source).await
    }

    pub async fn delete_frames(&self, ids: &[i64]) -> Result<u64> {
        FrameQueries::delete_by_ids(&self.pool, ids).await
    }

    // Embedding record operations
    pub async fn insert_embedding_records(
        &self,
        records: &[NewEmbeddingRecord],
    ) -> Result<Vec<i64>> {
        EmbeddingQueries::create_batch(&self.pool, records).await
    }

    pub async fn embedding_records_for_frames(
        &self,
        frame_ids: &[i64],
    ) -> Result<Vec<EmbeddingRecord>> {
        EmbeddingQueries::list_for_frames(&self.pool, frame_ids).await
    }

    pub async fn embedding_record_for_frame(
        &self,
        frame_id: i64,
        model_name: &str,
    ) -> Result<Option<EmbeddingRecord>> {
        EmbeddingQueries::get_by_frame(&self.pool, frame_id, model_name).await
    }

    pub async fn embedded_sources(
        &self,
        video_ids: &[i64],
        model_name: &str,
    ) -> Result<HashSet<SourceKey>> {
        EmbeddingQueries::embedded_sources(&self.pool, video_ids, model_name).await
    }

    pub async fn delete_embedding_records_for_frames(&self, frame_ids: &[i64]) -> Result<u64> {
        EmbeddingQueries::delete_for_frames(&self.pool, frame_ids).await
    }

    /// Frame and embedding record counts for one source
    pub async fn source_counts(&self, source: SourceKey) -> Result<SourceCounts> {
        let frames = FrameQueries::count_for_source(&self.pool, source).await?;
        let embeddings: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM embeddings WHERE video = ? AND clip IS ?")
                .bind(source.video_id)
                .bind(source.clip_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to count embedding records for source")?;

        Ok(SourceCounts { frames, embeddings })
    }

    pub async fn statistics(&self) -> Result<StoreStatistics> {
        Ok(StoreStatistics {
            videos: VideoQueries::count(&self.pool).await?,
            clips: ClipQueries::count(&self.pool).await?,
            frames: FrameQueries::count(&self.pool).await?,
            embeddings: EmbeddingQueries::count(&self.pool).await?,
        })
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("Failed to vacuum database")?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}
