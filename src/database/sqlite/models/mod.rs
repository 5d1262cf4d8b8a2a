
use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::media::{Clip, SourceKey, Video};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct VideoRow {
    pub id: i64,
    pub path: String,
    pub name: Option<String>,
    pub metadata: String,
    pub created_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVideo {
    pub path: String,
    pub name: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ClipRow {
    pub id: i64,
    pub video: i64,
    pub start: f64,
    pub end: f64,
    pub metadata: String,
    pub created_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewClip {
    pub video: i64,
    pub start: f64,
    pub end: f64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A clip joined with its parent video's path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ClipWithVideo {
    pub id: i64,
    pub video: i64,
    pub start: f64,
    pub end: f64,
    pub video_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FrameRecord {
    pub id: i64,
    pub timestamp: f64,
    pub video: i64,
    pub clip: Option<i64>,
    pub created_date: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewFrameRecord {
    pub timestamp: f64,
    pub source: SourceKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct EmbeddingRecord {
    pub id: i64,
    pub frame: i64,
    pub vector_entry: String,
    pub video: i64,
    pub clip: Option<i64>,
    pub model_name: String,
    pub created_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEmbeddingRecord {
    pub frame: i64,
    pub vector_entry: String,
    pub source: SourceKey,
    pub model_name: String,
}

/// Row counts for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceCounts {
    pub frames: i64,
    pub embeddings: i64,
}

/// Row counts for the whole record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub videos: i64,
    pub clips: i64,
    pub frames: i64,
    pub embeddings: i64,
}

/// Declarative selection over a record-store table.
///
/// `fields` holds equality conditions keyed by column name, or by
/// `metadata.<key>` for values inside the JSON metadata column. `ids`
/// restricts the selection to the listed primary keys.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<i64>>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl SearchFilter {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_none() && self.fields.is_empty()
    }

    #[inline]
    pub fn with_ids(ids: Vec<i64>) -> Self {
        Self {
            ids: Some(ids),
            fields: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

impl VideoRow {
    #[inline]
    pub fn to_video(&self, sampling_interval: u32, frame_count_limit: Option<u32>) -> Video {
        Video {
            video_id: self.id,
            source_path: PathBuf::from(&self.path),
            sampling_interval,
            frame_count_limit,
        }
    }
}

impl ClipWithVideo {
    #[inline]
    pub fn to_clip(&self, sampling_interval: u32, frame_count_limit: Option<u32>) -> Clip {
        Clip {
            clip_id: self.id,
            video_id: self.video,
            source_path: PathBuf::from(&self.video_path),
            start_time: self.start,
            end_time: self.end,
            sampling_interval,
            frame_count_limit,
        }
    }
}

impl FrameRecord {
    #[inline]
    pub fn source(&self) -> SourceKey {
        SourceKey {
            video_id: self.video,
            clip_id: self.clip,
        }
    }

    /// String form of the id, used as the vector index correlation key
    #[inline]
    pub fn correlation_key(&self) -> String {
        self.id.to_string()
    }
}
