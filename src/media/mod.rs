// Media module
// Source abstraction (whole videos and time-bounded clips), decoded frames and
// the chunked frame streamer feeding the embedding pipeline


pub mod ffmpeg;
pub mod streamer;

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use ffmpeg::FfmpegDecoder;
pub use streamer::{DEFAULT_CHUNK_SIZE, FrameStreamer};

/// Properties of a media container as reported by the decoder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    /// Number of frames at the native frame rate
    pub frame_count: u64,
    /// Native frames per second
    pub frame_rate: f64,
    /// Duration in seconds
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

/// A single decoded frame in packed RGB24 layout
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Native frame number, counted from the source's start bound
    pub index: u64,
    /// Position in the underlying video, in seconds
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    /// Size in bytes of one RGB24 frame with the given dimensions
    #[inline]
    pub fn rgb_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }
}

/// Identity of a source in the record store.
///
/// Frames and embeddings always reference the owning video; clips are told
/// apart from their parent video (and from sibling clips) by `clip_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    pub video_id: i64,
    pub clip_id: Option<i64>,
}

impl fmt::Display for SourceKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.clip_id {
            Some(clip_id) => write!(f, "video {} clip {}", self.video_id, clip_id),
            None => write!(f, "video {}", self.video_id),
        }
    }
}

/// A complete video, sampled from its first frame to the end of the media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub video_id: i64,
    pub source_path: PathBuf,
    pub sampling_interval: u32,
    pub frame_count_limit: Option<u32>,
}

/// A `[start_time, end_time]` range (seconds) of a parent video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub clip_id: i64,
    pub video_id: i64,
    pub source_path: PathBuf,
    pub start_time: f64,
    pub end_time: f64,
    pub sampling_interval: u32,
    pub frame_count_limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaSource {
    Video(Video),
    Clip(Clip),
}

impl MediaSource {
    #[inline]
    pub fn key(&self) -> SourceKey {
        match self {
            MediaSource::Video(video) => SourceKey {
                video_id: video.video_id,
                clip_id: None,
            },
            MediaSource::Clip(clip) => SourceKey {
                video_id: clip.video_id,
                clip_id: Some(clip.clip_id),
            },
        }
    }

    /// Id of the stored video every record of this source points at
    #[inline]
    pub fn video_id(&self) -> i64 {
        self.key().video_id
    }

    #[inline]
    pub fn source_path(&self) -> &Path {
        match self {
            MediaSource::Video(video) => &video.source_path,
            MediaSource::Clip(clip) => &clip.source_path,
        }
    }

    /// Human-readable name used in logs
    #[inline]
    pub fn name(&self) -> String {
        match self {
            MediaSource::Video(video) => video.source_path.display().to_string(),
            MediaSource::Clip(clip) => format!(
                "{} [{:.2}s-{:.2}s]",
                clip.source_path.display(),
                clip.start_time,
                clip.end_time
            ),
        }
    }

    /// Start bound in seconds
    #[inline]
    pub fn start(&self) -> f64 {
        match self {
            MediaSource::Video(_) => 0.0,
            MediaSource::Clip(clip) => clip.start_time,
        }
    }

    /// End bound in seconds, `None` meaning the end of the media
    #[inline]
    pub fn end(&self) -> Option<f64> {
        match self {
            MediaSource::Video(_) => None,
            MediaSource::Clip(clip) => Some(clip.end_time),
        }
    }

    #[inline]
    pub fn sampling_interval(&self) -> u32 {
        match self {
            MediaSource::Video(video) => video.sampling_interval,
            MediaSource::Clip(clip) => clip.sampling_interval,
        }
    }

    #[inline]
    pub fn frame_count_limit(&self) -> Option<u32> {
        match self {
            MediaSource::Video(video) => video.frame_count_limit,
            MediaSource::Clip(clip) => clip.frame_count_limit,
        }
    }

    /// Number of native frames between the start and end bounds
    #[inline]
    pub fn native_length(&self, info: &MediaInfo) -> u64 {
        match self.end() {
            None => info.frame_count,
            Some(end) => {
                let span = (end.min(info.duration_secs) - self.start()).max(0.0);
                let frames = (span * info.frame_rate).round() as u64;
                frames.min(info.frame_count)
            }
        }
    }

    /// Number of sampled frames a complete ingestion is expected to produce
    #[inline]
    pub fn expected_sample_count(&self, info: &MediaInfo) -> f64 {
        let interval = f64::from(self.sampling_interval().max(1));
        let expected = self.native_length(info) as f64 / interval;
        match self.frame_count_limit() {
            Some(limit) => expected.min(f64::from(limit)),
            None => expected,
        }
    }
}

/// Boxed, lazily-evaluated sequence of decoded frames
pub type FrameIter = Box<dyn Iterator<Item = Result<Frame>> + Send>;

/// Decodes media containers into RGB frames
pub trait FrameDecoder: Send + Sync {
    /// Read container properties without decoding frames
    fn probe(&self, path: &Path) -> Result<MediaInfo>;

    /// Open the source at its start bound and yield frames up to its end bound.
    ///
    /// Implementations may already drop frames that fall between sampling
    /// points; `Frame::index` must still carry the native frame number.
    fn frames(&self, source: &MediaSource) -> Result<FrameIter>;
}
