#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::Utc;
use fancy_regex::Regex;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use super::models::*;
use crate::media::SourceKey;

/// Keeps `IN (...)` lists below SQLite's bound-parameter limit
const MAX_BIND_PARAMETERS: usize = 500;

const VIDEO_COLUMNS: &[&str] = &["id", "path", "name"];
const CLIP_COLUMNS: &[&str] = &["id", "video", "start", "end"];

static METADATA_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^metadata\.([A-Za-z0-9_]+)$").expect("valid regex"));

/// Append `AND ...` conditions for `filter` to a query whose table is aliased as `alias`
fn push_search_filter(
    builder: &mut QueryBuilder<'_, Sqlite>,
    alias: &str,
    columns: &[&str],
    filter: &SearchFilter,
) -> Result<()> {
    if let Some(ids) = &filter.ids {
        if ids.is_empty() {
            builder.push(" AND 0");
        } else {
            // One JSON array parameter, so any number of ids fits in a single statement
            let ids = serde_json::to_string(ids).context("Failed to encode id filter")?;
            builder.push(format!(
                " AND {}.id IN (SELECT value FROM json_each(",
                alias
            ));
            builder.push_bind(ids);
            builder.push("))");
        }
    }

    for (field, value) in &filter.fields {
        let target = if columns.contains(&field.as_str()) {
            format!("{}.\"{}\"", alias, field)
        } else if let Some(captures) = METADATA_KEY_REGEX.captures(field).context("key match failed")? {
            let key = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            format!("json_extract({}.metadata, '$.{}')", alias, key)
        } else {
            return Err(anyhow::anyhow!(
                "Unsupported filter field '{}' (expected one of {:?} or metadata.<key>)",
                field,
                columns
            ));
        };

        builder.push(" AND ");
        builder.push(target);
        match value {
            Value::Null => {
                builder.push(" IS NULL");
            }
            Value::Array(values) => {
                if values.is_empty() {
                    builder.push(" IN (NULL)");
                    continue;
                }
                builder.push(" IN (");
                for (i, item) in values.iter().enumerate() {
                    if i > 0 {
                        builder.push(", ");
                    }
                    push_json_bind(builder, item)
                        .with_context(|| format!("Invalid value in filter field '{}'", field))?;
                }
                builder.push(")");
            }
            scalar => {
                builder.push(" = ");
                push_json_bind(builder, scalar)
                    .with_context(|| format!("Invalid value for filter field '{}'", field))?;
            }
        }
    }

    Ok(())
}

fn push_json_bind(builder: &mut QueryBuilder<'_, Sqlite>, value: &Value) -> Result<()> {
    match value {
        Value::String(s) => {
            builder.push_bind(s.clone());
        }
        Value::Bool(b) => {
            builder.push_bind(i64::from(*b));
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                builder.push_bind(i);
            } else if let Some(f) = n.as_f64() {
                builder.push_bind(f);
            } else {
                return Err(anyhow::anyhow!("Unsupported number {}", n));
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => {
            return Err(anyhow::anyhow!("Only scalar values can be compared: {}", value));
        }
    }
    Ok(())
}

pub struct VideoQueries;

impl VideoQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_video: NewVideo) -> Result<VideoRow> {
        let now = Utc::now().naive_utc();
        let metadata = serde_json::to_string(&new_video.metadata)
            .context("Failed to serialize video metadata")?;

        let id = sqlx::query(
            "INSERT INTO videos (path, name, metadata, created_date) VALUES (?, ?, ?, ?)",
        )
        .bind(&new_video.path)
        .bind(&new_video.name)
        .bind(metadata)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create video")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created video"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<VideoRow>> {
        let result = sqlx::query_as::<_, VideoRow>(
            "SELECT id, path, name, metadata, created_date FROM videos WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get video by id")?;

        Ok(result)
    }

    /// Videos matching `filter`, in id order
    #[inline]
    pub async fn find(pool: &SqlitePool, filter: &SearchFilter) -> Result<Vec<VideoRow>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT v.id, v.path, v.name, v.metadata, v.created_date FROM videos v WHERE 1 = 1",
        );
        push_search_filter(&mut builder, "v", VIDEO_COLUMNS, filter)?;
        builder.push(" ORDER BY v.id");

        let videos = builder
            .build_query_as::<VideoRow>()
            .fetch_all(pool)
            .await
            .context("Failed to find videos")?;

        debug!("Filter matched {} videos", videos.len());
        Ok(videos)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM videos")
            .fetch_one(pool)
            .await
            .context("Failed to count videos")
    }
}

pub struct ClipQueries;

impl ClipQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_clip: NewClip) -> Result<ClipRow> {
        let now = Utc::now().naive_utc();
        let metadata = serde_json::to_string(&new_clip.metadata)
            .context("Failed to serialize clip metadata")?;

        let id = sqlx::query(
            r#"INSERT INTO clips (video, start, "end", metadata, created_date) VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(new_clip.video)
        .bind(new_clip.start)
        .bind(new_clip.end)
        .bind(metadata)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create clip")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created clip"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<ClipRow>> {
        let result = sqlx::query_as::<_, ClipRow>(
            r#"SELECT id, video, start, "end", metadata, created_date FROM clips WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get clip by id")?;

        Ok(result)
    }

    /// Clips matching `filter`, joined with the parent video for its path
    #[inline]
    pub async fn find_with_video(
        pool: &SqlitePool,
        filter: &SearchFilter,
    ) -> Result<Vec<ClipWithVideo>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT c.id, c.video, c.start, c."end", v.path AS video_path
            FROM clips c
            JOIN videos v ON v.id = c.video
            WHERE 1 = 1"#,
        );
        push_search_filter(&mut builder, "c", CLIP_COLUMNS, filter)?;
        builder.push(" ORDER BY c.id");

        let clips = builder
            .build_query_as::<ClipWithVideo>()
            .fetch_all(pool)
            .await
            .context("Failed to find clips")?;

        debug!("Filter matched {} clips", clips.len());
        Ok(clips)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM clips")
            .fetch_one(pool)
            .await
            .context("Failed to count clips")
    }
}

pub struct FrameQueries;

impl FrameQueries {
    /// Insert frames in one transaction; ids are returned in input order
    #[inline]
    pub async fn create_batch(pool: &SqlitePool, frames: &[NewFrameRecord]) -> Result<Vec<i64>> {
        if frames.is_empty() {
            return Ok(Vec::new());
        }

        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for batch frame insert")?;

        let now = Utc::now().naive_utc();
        let mut ids = Vec::with_capacity(frames.len());

        for frame in frames {
            let id = sqlx::query(
                "INSERT INTO frames (timestamp, video, clip, created_date) VALUES (?, ?, ?, ?)",
            )
            .bind(frame.timestamp)
            .bind(frame.source.video_id)
            .bind(frame.source.clip_id)
            .bind(now)
            .execute(&mut *transaction)
            .await
            .context("Failed to create frame in batch")?
            .last_insert_rowid();

            ids.push(id);
        }

        transaction
            .commit()
            .await
            .context("Failed to commit batch frame insert transaction")?;

        debug!("Created {} frame records", ids.len());
        Ok(ids)
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<FrameRecord>> {
        let result = sqlx::query_as::<_, FrameRecord>(
            "SELECT id, timestamp, video, clip, created_date FROM frames WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get frame by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_for_source(pool: &SqlitePool, source: SourceKey) -> Result<Vec<FrameRecord>> {
        let frames = sqlx::query_as::<_, FrameRecord>(
            r#"
            SELECT id, timestamp, video, clip, created_date
            FROM frames
            WHERE video = ? AND clip IS ?
            ORDER BY timestamp, id
            "#,
        )
        .bind(source.video_id)
        .bind(source.clip_id)
        .fetch_all(pool)
        .await
        .context("Failed to list frames for source")?;

        Ok(frames)
    }

    #[inline]
    pub async fn ids_for_source(pool: &SqlitePool, source: SourceKey) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM frames WHERE video = ? AND clip IS ? ORDER BY id",
        )
        .bind(source.video_id)
        .bind(source.clip_id)
        .fetch_all(pool)
        .await
        .context("Failed to list frame ids for source")?;

        Ok(ids)
    }

    #[inline]
    pub async fn count_for_source(pool: &SqlitePool, source: SourceKey) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM frames WHERE video = ? AND clip IS ?")
            .bind(source.video_id)
            .bind(source.clip_id)
            .fetch_one(pool)
            .await
            .context("Failed to count frames for source")
    }

    #[inline]
    pub async fn delete_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<u64> {
        let mut deleted = 0;
        for chunk in ids.chunks(MAX_BIND_PARAMETERS) {
            let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM frames WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            deleted += builder
                .build()
                .execute(pool)
                .await
                .context("Failed to delete frames")?
                .rows_affected();
        }

        Ok(deleted)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM frames")
            .fetch_one(pool)
            .await
            .context("Failed to count frames")
    }
}

pub struct EmbeddingQueries;

impl EmbeddingQueries {
    /// Insert correlation records in one transaction; ids are returned in input order
    #[inline]
    pub async fn create_batch(
        pool: &SqlitePool,
        records: &[NewEmbeddingRecord],
    ) -> Result<Vec<i64>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for batch embedding insert")?;

        let now = Utc::now().naive_utc();
        let mut ids = Vec::with_capacity(records.len());

        for record in records {
            let id = sqlx::query(
                r#"
                INSERT INTO embeddings (frame, vector_entry, video, clip, model_name, created_date)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.frame)
            .bind(&record.vector_entry)
            .bind(record.source.video_id)
            .bind(record.source.clip_id)
            .bind(&record.model_name)
            .bind(now)
            .execute(&mut *transaction)
            .await
            .context("Failed to create embedding record in batch")?
            .last_insert_rowid();

            ids.push(id);
        }

        transaction
            .commit()
            .await
            .context("Failed to commit batch embedding insert transaction")?;

        debug!("Created {} embedding records", ids.len());
        Ok(ids)
    }

    /// Embedding records referencing any of `frame_ids`
    #[inline]
    pub async fn list_for_frames(
        pool: &SqlitePool,
        frame_ids: &[i64],
    ) -> Result<Vec<EmbeddingRecord>> {
        let mut records = Vec::new();
        for chunk in frame_ids.chunks(MAX_BIND_PARAMETERS) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                r#"
                SELECT id, frame, vector_entry, video, clip, model_name, created_date
                FROM embeddings
                WHERE frame IN ("#,
            );
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(") ORDER BY id");

            let batch = builder
                .build_query_as::<EmbeddingRecord>()
                .fetch_all(pool)
                .await
                .context("Failed to list embedding records for frames")?;
            records.extend(batch);
        }

        Ok(records)
    }

    #[inline]
    pub async fn get_by_frame(
        pool: &SqlitePool,
        frame_id: i64,
        model_name: &str,
    ) -> Result<Option<EmbeddingRecord>> {
        let result = sqlx::query_as::<_, EmbeddingRecord>(
            r#"
            SELECT id, frame, vector_entry, video, clip, model_name, created_date
            FROM embeddings
            WHERE frame = ? AND model_name = ?
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(frame_id)
        .bind(model_name)
        .fetch_optional(pool)
        .await
        .context("Failed to get embedding record by frame")?;

        Ok(result)
    }

    /// Sources among `video_ids` that already have embeddings under `model_name`
    #[inline]
    pub async fn embedded_sources(
        pool: &SqlitePool,
        video_ids: &[i64],
        model_name: &str,
    ) -> Result<HashSet<SourceKey>> {
        let mut sources = HashSet::new();
        for chunk in video_ids.chunks(MAX_BIND_PARAMETERS) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT DISTINCT video, clip FROM embeddings WHERE model_name = ",
            );
            builder.push_bind(model_name.to_string());
            builder.push(" AND video IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let rows = builder
                .build_query_as::<(i64, Option<i64>)>()
                .fetch_all(pool)
                .await
                .context("Failed to query embedded sources")?;

            sources.extend(rows.into_iter().map(|(video_id, clip_id)| SourceKey {
                video_id,
                clip_id,
            }));
        }

        Ok(sources)
    }

    #[inline]
    pub async fn delete_for_frames(pool: &SqlitePool, frame_ids: &[i64]) -> Result<u64> {
        let mut deleted = 0;
        for chunk in frame_ids.chunks(MAX_BIND_PARAMETERS) {
            let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM embeddings WHERE frame IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            deleted += builder
                .build()
                .execute(pool)
                .await
                .context("Failed to delete embedding records")?
                .rows_affected();
        }

        Ok(deleted)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(pool)
            .await
            .context("Failed to count embedding records")
    }
}
