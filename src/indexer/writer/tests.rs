use super::*;
use crate::database::lancedb::DistanceMetric;
use crate::database::sqlite::models::NewVideo;
use crate::embeddings::l2_normalize;
use tempfile::TempDir;

const DIM: usize = 4;

struct IndexEmbedder;

impl EmbeddingService for IndexEmbedder {
    fn model_name(&self) -> &str {
        "index_model"
    }

    fn embedding_dimension(&self) -> usize {
        DIM
    }

    fn embed_frames(&self, frames: &[Frame]) -> Result<Vec<Vec<f32>>> {
        Ok(frames
            .iter()
            .map(|frame| {
                let mut vector = vec![1.0, frame.index as f32, 0.0, 0.0];
                l2_normalize(&mut vector);
                vector
            })
            .collect())
    }
}

struct ShortEmbedder;

impl EmbeddingService for ShortEmbedder {
    fn model_name(&self) -> &str {
        "index_model"
    }

    fn embedding_dimension(&self) -> usize {
        DIM
    }

    fn embed_frames(&self, frames: &[Frame]) -> Result<Vec<Vec<f32>>> {
        Ok(vec![vec![1.0, 0.0, 0.0, 0.0]; frames.len().saturating_sub(1)])
    }
}

async fn create_stores() -> (TempDir, Database, VectorStore, SourceKey) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("should create database");
    let vector_store = VectorStore::open_at(
        &temp_dir.path().join("vectors"),
        "index_model",
        DIM,
        DistanceMetric::L2,
    )
    .await
    .expect("should open vector store");
    let video = database
        .insert_video(NewVideo {
            path: "/data/video.mp4".to_string(),
            name: None,
            metadata: serde_json::Map::new(),
        })
        .await
        .expect("should insert video");
    let source = SourceKey {
        video_id: video.id,
        clip_id: None,
    };
    (temp_dir, database, vector_store, source)
}

fn frames(indices: &[u64]) -> Vec<Frame> {
    indices
        .iter()
        .map(|&index| Frame {
            index,
            timestamp: index as f64 / 25.0,
            width: 1,
            height: 1,
            data: vec![0; 3],
        })
        .collect()
}

#[tokio::test]
async fn chunk_is_written_to_both_stores_in_order() {
    let (_temp_dir, database, vector_store, source) = create_stores().await;
    let writer = DualWriteCoordinator::new(&database, &vector_store, &IndexEmbedder);

    let chunk = frames(&[0, 50, 100]);
    let written = writer
        .write_chunk(source, &chunk)
        .await
        .expect("should write chunk");
    assert_eq!(written, 3);

    let stored = database
        .frames_for_source(source)
        .await
        .expect("should list frames");
    assert_eq!(stored.len(), 3);

    let expected = IndexEmbedder
        .embed_frames(&chunk)
        .expect("should embed");
    for (i, frame) in stored.iter().enumerate() {
        assert!((frame.timestamp - chunk[i].timestamp).abs() < f64::EPSILON);

        let record = database
            .embedding_record_for_frame(frame.id, "index_model")
            .await
            .expect("should query")
            .expect("embedding record should exist");
        let entry = vector_store
            .vector_for_object(&frame.id.to_string())
            .await
            .expect("should query")
            .expect("vector should exist");

        assert_eq!(record.vector_entry, entry.id.to_string());
        assert_eq!(record.video, source.video_id);
        assert_eq!(record.clip, None);
        assert_eq!(entry.embeddings, expected[i]);
    }
}

#[tokio::test]
async fn empty_chunk_writes_nothing() {
    let (_temp_dir, database, vector_store, source) = create_stores().await;
    let writer = DualWriteCoordinator::new(&database, &vector_store, &IndexEmbedder);

    let written = writer
        .write_chunk(source, &[])
        .await
        .expect("should accept empty chunk");
    assert_eq!(written, 0);
    assert_eq!(
        database
            .source_counts(source)
            .await
            .expect("should count")
            .frames,
        0
    );
}

#[tokio::test]
async fn embedding_count_mismatch_is_fatal_and_detectable() {
    let (_temp_dir, database, vector_store, source) = create_stores().await;
    let writer = DualWriteCoordinator::new(&database, &vector_store, &ShortEmbedder);

    let result = writer.write_chunk(source, &frames(&[0, 1, 2])).await;
    let error = result.expect_err("short batch should fail");
    assert!(matches!(
        error.downcast_ref::<FrameEmbedderError>(),
        Some(FrameEmbedderError::Embedding(_))
    ));

    let counts = database.source_counts(source).await.expect("should count");
    assert_eq!(counts.frames, 3);
    assert_eq!(counts.embeddings, 0);
    assert_eq!(vector_store.count_all().await.expect("should count"), 0);
}
