use super::*;
use crate::database::lancedb::DistanceMetric;
use crate::database::sqlite::models::{NewClip, NewFrameRecord, NewVideo};
use crate::embeddings::EmbeddingService;
use crate::indexer::DualWriteCoordinator;
use crate::media::{Clip, Frame, Video};
use std::path::PathBuf;
use tempfile::TempDir;

const DIM: usize = 4;

struct ConstantEmbedder;

impl EmbeddingService for ConstantEmbedder {
    fn model_name(&self) -> &str {
        "constant_model"
    }

    fn embedding_dimension(&self) -> usize {
        DIM
    }

    fn embed_frames(&self, frames: &[Frame]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(vec![vec![0.0, 1.0, 0.0, 0.0]; frames.len()])
    }
}

struct Fixture {
    _temp_dir: TempDir,
    database: Database,
    vector_store: VectorStore,
    video_id: i64,
}

async fn create_fixture() -> Fixture {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("should create database");
    let vector_store = VectorStore::open_at(
        &temp_dir.path().join("vectors"),
        "constant_model",
        DIM,
        DistanceMetric::L2,
    )
    .await
    .expect("should open vector store");
    let video_id = database
        .insert_video(NewVideo {
            path: "/data/video.mp4".to_string(),
            name: None,
            metadata: serde_json::Map::new(),
        })
        .await
        .expect("should insert video")
        .id;

    Fixture {
        _temp_dir: temp_dir,
        database,
        vector_store,
        video_id,
    }
}

fn video_source(video_id: i64) -> MediaSource {
    MediaSource::Video(Video {
        video_id,
        source_path: PathBuf::from("/data/video.mp4"),
        sampling_interval: 50,
        frame_count_limit: None,
    })
}

fn media_info(frame_count: u64) -> MediaInfo {
    MediaInfo {
        frame_count,
        frame_rate: 25.0,
        duration_secs: frame_count as f64 / 25.0,
        width: 1,
        height: 1,
    }
}

fn frames(count: u64) -> Vec<Frame> {
    (0..count)
        .map(|i| Frame {
            index: i * 50,
            timestamp: i as f64 * 2.0,
            width: 1,
            height: 1,
            data: vec![0; 3],
        })
        .collect()
}

async fn ingest(fixture: &Fixture, source: SourceKey, count: u64) {
    let writer =
        DualWriteCoordinator::new(&fixture.database, &fixture.vector_store, &ConstantEmbedder);
    writer
        .write_chunk(source, &frames(count))
        .await
        .expect("should write frames");
}

fn validator(fixture: &Fixture) -> IntegrityValidator<'_> {
    IntegrityValidator::new(&fixture.database, &fixture.vector_store, 25.0)
}

#[tokio::test]
async fn source_without_frames_is_invalid() {
    let fixture = create_fixture().await;
    let report = validator(&fixture)
        .validate(&video_source(fixture.video_id), &media_info(1000))
        .await
        .expect("should validate");

    assert!(!report.is_valid());
    assert_eq!(report.failure, Some(IntegrityFailure::NoFrames));
    assert!((report.expected_count - 20.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn sample_count_within_tolerance_is_valid() {
    let fixture = create_fixture().await;
    let source = video_source(fixture.video_id);
    ingest(&fixture, source.key(), 21).await;

    let report = validator(&fixture)
        .validate(&source, &media_info(1000))
        .await
        .expect("should validate");

    assert!(report.is_valid(), "{}", report.summary());
    assert_eq!(report.frame_count, 21);
    assert_eq!(report.embedding_count, 21);
    assert_eq!(report.vector_count, 21);
}

#[tokio::test]
async fn sample_count_outside_tolerance_is_invalid() {
    let fixture = create_fixture().await;
    let source = video_source(fixture.video_id);
    ingest(&fixture, source.key(), 46).await;

    let report = validator(&fixture)
        .validate(&source, &media_info(1000))
        .await
        .expect("should validate");

    assert_eq!(report.failure, Some(IntegrityFailure::SampleCount));
}

#[tokio::test]
async fn zero_native_length_skips_tolerance_check() {
    let fixture = create_fixture().await;
    let source = video_source(fixture.video_id);
    ingest(&fixture, source.key(), 40).await;

    let report = validator(&fixture)
        .validate(&source, &media_info(0))
        .await
        .expect("should validate");

    assert!(report.is_valid(), "{}", report.summary());
}

#[tokio::test]
async fn frames_without_embeddings_are_invalid() {
    let fixture = create_fixture().await;
    let source = video_source(fixture.video_id);
    let new_frames: Vec<NewFrameRecord> = (0..20)
        .map(|i| NewFrameRecord {
            timestamp: f64::from(i) * 2.0,
            source: source.key(),
        })
        .collect();
    fixture
        .database
        .insert_frames(&new_frames)
        .await
        .expect("should insert frames");

    let report = validator(&fixture)
        .validate(&source, &media_info(1000))
        .await
        .expect("should validate");

    assert_eq!(report.failure, Some(IntegrityFailure::MissingEmbeddings));
    assert_eq!(report.embedding_count, 0);
}

#[tokio::test]
async fn missing_vectors_are_invalid() {
    let fixture = create_fixture().await;
    let source = video_source(fixture.video_id);
    ingest(&fixture, source.key(), 20).await;

    let frame_ids = fixture
        .database
        .frame_ids_for_source(source.key())
        .await
        .expect("should list frames");
    fixture
        .vector_store
        .delete_object_ids(&[frame_ids[0].to_string()])
        .await
        .expect("should delete vector");

    let report = validator(&fixture)
        .validate(&source, &media_info(1000))
        .await
        .expect("should validate");

    assert_eq!(report.failure, Some(IntegrityFailure::MissingVectors));
    assert_eq!(report.embedding_count, 20);
    assert_eq!(report.vector_count, 19);
}

#[tokio::test]
async fn purge_is_scoped_to_one_source() {
    let fixture = create_fixture().await;
    let clip_id = fixture
        .database
        .insert_clip(NewClip {
            video: fixture.video_id,
            start: 0.0,
            end: 10.0,
            metadata: serde_json::Map::new(),
        })
        .await
        .expect("should insert clip")
        .id;

    let video = video_source(fixture.video_id);
    let clip = MediaSource::Clip(Clip {
        clip_id,
        video_id: fixture.video_id,
        source_path: PathBuf::from("/data/video.mp4"),
        start_time: 0.0,
        end_time: 10.0,
        sampling_interval: 50,
        frame_count_limit: None,
    });
    ingest(&fixture, video.key(), 20).await;
    ingest(&fixture, clip.key(), 5).await;

    let stats = validator(&fixture)
        .purge_source(video.key())
        .await
        .expect("should purge");
    assert_eq!(
        stats,
        PurgeStats {
            frames: 20,
            embeddings: 20,
            vectors: 20,
        }
    );

    let video_counts = fixture
        .database
        .source_counts(video.key())
        .await
        .expect("should count");
    assert_eq!(video_counts.frames, 0);
    assert_eq!(video_counts.embeddings, 0);

    let clip_counts = fixture
        .database
        .source_counts(clip.key())
        .await
        .expect("should count");
    assert_eq!(clip_counts.frames, 5);
    assert_eq!(clip_counts.embeddings, 5);
    assert_eq!(
        fixture
            .vector_store
            .count_all()
            .await
            .expect("should count"),
        5
    );

    let again = validator(&fixture)
        .purge_source(video.key())
        .await
        .expect("should purge nothing");
    assert_eq!(again, PurgeStats::default());
}

#[test]
fn report_summary_names_failed_check() {
    let report = IntegrityReport {
        source: SourceKey {
            video_id: 1,
            clip_id: None,
        },
        name: "/data/video.mp4".to_string(),
        frame_count: 46,
        expected_count: 20.0,
        embedding_count: 46,
        vector_count: 46,
        failure: Some(IntegrityFailure::SampleCount),
    };

    let summary = report.summary();
    assert!(summary.contains("invalid"));
    assert!(summary.contains("sample count outside tolerance"));
    assert!(summary.contains("frames 46 / expected 20.0"));
}
