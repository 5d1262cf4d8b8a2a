use super::*;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

async fn create_test_pool() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true)
                .foreign_keys(true),
        )
        .await
        .expect("Failed to create test pool");

    sqlx::raw_sql(include_str!("../migrations/20250101000000_initial_schema.sql"))
        .execute(&pool)
        .await
        .expect("Failed to run migrations");

    (temp_dir, pool)
}

async fn create_video(pool: &SqlitePool, path: &str) -> VideoRow {
    VideoQueries::create(
        pool,
        NewVideo {
            path: path.to_string(),
            name: Some(path.to_string()),
            metadata: serde_json::Map::new(),
        },
    )
    .await
    .expect("Failed to create video")
}

fn frames_for(source: SourceKey, count: usize) -> Vec<NewFrameRecord> {
    (0..count)
        .map(|i| NewFrameRecord {
            timestamp: i as f64 * 2.0,
            source,
        })
        .collect()
}

#[tokio::test]
async fn video_create_and_find() {
    let (_temp_dir, pool) = create_test_pool().await;

    let a = create_video(&pool, "/data/a.mp4").await;
    let b = create_video(&pool, "/data/b.mp4").await;
    create_video(&pool, "/data/c.mp4").await;

    let all = VideoQueries::find(&pool, &SearchFilter::default())
        .await
        .expect("Failed to list videos");
    assert_eq!(all.len(), 3);

    let by_ids = VideoQueries::find(&pool, &SearchFilter::with_ids(vec![b.id, a.id]))
        .await
        .expect("Failed to find by ids");
    assert_eq!(
        by_ids.iter().map(|v| v.id).collect::<Vec<_>>(),
        vec![a.id, b.id]
    );

    let by_path = VideoQueries::find(
        &pool,
        &SearchFilter::default().with_field("path", json!("/data/b.mp4")),
    )
    .await
    .expect("Failed to find by path");
    assert_eq!(by_path.len(), 1);
    assert_eq!(by_path[0].id, b.id);

    let by_list = VideoQueries::find(
        &pool,
        &SearchFilter::default().with_field("path", json!(["/data/a.mp4", "/data/c.mp4"])),
    )
    .await
    .expect("Failed to find by path list");
    assert_eq!(by_list.len(), 2);

    assert_eq!(VideoQueries::count(&pool).await.expect("count"), 3);
}

#[tokio::test]
async fn empty_id_list_matches_nothing() {
    let (_temp_dir, pool) = create_test_pool().await;
    create_video(&pool, "/data/a.mp4").await;

    let videos = VideoQueries::find(&pool, &SearchFilter::with_ids(Vec::new()))
        .await
        .expect("Failed to query");
    assert!(videos.is_empty());
}

#[tokio::test]
async fn unknown_filter_field_is_rejected() {
    let (_temp_dir, pool) = create_test_pool().await;

    let result = VideoQueries::find(
        &pool,
        &SearchFilter::default().with_field("path; DROP TABLE videos", json!(1)),
    )
    .await;
    assert!(result.is_err());

    let result = VideoQueries::find(
        &pool,
        &SearchFilter::default().with_field("metadata.bad-key", json!(1)),
    )
    .await;
    assert!(result.is_err());

    let result = VideoQueries::find(
        &pool,
        &SearchFilter::default().with_field("name", json!({"nested": true})),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn clip_find_joins_video_path() {
    let (_temp_dir, pool) = create_test_pool().await;
    let video = create_video(&pool, "/data/a.mp4").await;

    let clip = ClipQueries::create(
        &pool,
        NewClip {
            video: video.id,
            start: 10.0,
            end: 20.0,
            metadata: serde_json::Map::new(),
        },
    )
    .await
    .expect("Failed to create clip");
    assert_eq!(clip.end, 20.0);

    let clips = ClipQueries::find_with_video(
        &pool,
        &SearchFilter::default().with_field("video", json!(video.id)),
    )
    .await
    .expect("Failed to find clips");
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0].video_path, "/data/a.mp4");
    assert_eq!(clips[0].start, 10.0);

    let by_end = ClipQueries::find_with_video(
        &pool,
        &SearchFilter::default().with_field("end", json!(20.0)),
    )
    .await
    .expect("Failed to filter on end");
    assert_eq!(by_end.len(), 1);
}

#[tokio::test]
async fn frame_batch_ids_follow_input_order() {
    let (_temp_dir, pool) = create_test_pool().await;
    let video = create_video(&pool, "/data/a.mp4").await;
    let source = SourceKey {
        video_id: video.id,
        clip_id: None,
    };

    let ids = FrameQueries::create_batch(&pool, &frames_for(source, 5))
        .await
        .expect("Failed to insert frames");
    assert_eq!(ids.len(), 5);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let frames = FrameQueries::list_for_source(&pool, source)
        .await
        .expect("Failed to list frames");
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.id, ids[i]);
        assert_eq!(frame.timestamp, i as f64 * 2.0);
        assert_eq!(frame.clip, None);
    }

    assert!(
        FrameQueries::create_batch(&pool, &[])
            .await
            .expect("empty batch")
            .is_empty()
    );
}

#[tokio::test]
async fn frames_of_clips_and_video_do_not_mix() {
    let (_temp_dir, pool) = create_test_pool().await;
    let video = create_video(&pool, "/data/a.mp4").await;
    let whole = SourceKey {
        video_id: video.id,
        clip_id: None,
    };
    let first_clip = SourceKey {
        video_id: video.id,
        clip_id: Some(1),
    };
    let second_clip = SourceKey {
        video_id: video.id,
        clip_id: Some(2),
    };

    FrameQueries::create_batch(&pool, &frames_for(whole, 4))
        .await
        .expect("insert");
    FrameQueries::create_batch(&pool, &frames_for(first_clip, 2))
        .await
        .expect("insert");
    FrameQueries::create_batch(&pool, &frames_for(second_clip, 3))
        .await
        .expect("insert");

    assert_eq!(FrameQueries::count_for_source(&pool, whole).await.expect("count"), 4);
    assert_eq!(
        FrameQueries::count_for_source(&pool, first_clip)
            .await
            .expect("count"),
        2
    );
    assert_eq!(
        FrameQueries::ids_for_source(&pool, second_clip)
            .await
            .expect("ids")
            .len(),
        3
    );
    assert_eq!(FrameQueries::count(&pool).await.expect("count"), 9);
}

#[tokio::test]
async fn embedding_records_lifecycle() {
    let (_temp_dir, pool) = create_test_pool().await;
    let video = create_video(&pool, "/data/a.mp4").await;
    let source = SourceKey {
        video_id: video.id,
        clip_id: None,
    };

    let frame_ids = FrameQueries::create_batch(&pool, &frames_for(source, 3))
        .await
        .expect("insert frames");
    let records: Vec<NewEmbeddingRecord> = frame_ids
        .iter()
        .map(|id| NewEmbeddingRecord {
            frame: *id,
            vector_entry: format!("{}", id * 10),
            source,
            model_name: "clip_vit".to_string(),
        })
        .collect();
    let ids = EmbeddingQueries::create_batch(&pool, &records)
        .await
        .expect("insert records");
    assert_eq!(ids.len(), 3);

    let listed = EmbeddingQueries::list_for_frames(&pool, &frame_ids)
        .await
        .expect("list");
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].vector_entry, format!("{}", frame_ids[0] * 10));

    let record = EmbeddingQueries::get_by_frame(&pool, frame_ids[1], "clip_vit")
        .await
        .expect("get")
        .expect("record should exist");
    assert_eq!(record.frame, frame_ids[1]);
    assert!(
        EmbeddingQueries::get_by_frame(&pool, frame_ids[1], "other_model")
            .await
            .expect("get")
            .is_none()
    );

    let deleted = EmbeddingQueries::delete_for_frames(&pool, &frame_ids[..2])
        .await
        .expect("delete");
    assert_eq!(deleted, 2);
    assert_eq!(EmbeddingQueries::count(&pool).await.expect("count"), 1);

    let deleted = FrameQueries::delete_by_ids(&pool, &frame_ids)
        .await
        .expect("delete frames");
    assert_eq!(deleted, 3);
}

#[tokio::test]
async fn embedded_sources_are_per_model() {
    let (_temp_dir, pool) = create_test_pool().await;
    let a = create_video(&pool, "/data/a.mp4").await;
    let b = create_video(&pool, "/data/b.mp4").await;

    let clip = SourceKey {
        video_id: a.id,
        clip_id: Some(3),
    };
    let whole_b = SourceKey {
        video_id: b.id,
        clip_id: None,
    };

    for (source, model) in [(clip, "model_a"), (whole_b, "model_b")] {
        let frame_ids = FrameQueries::create_batch(&pool, &frames_for(source, 1))
            .await
            .expect("insert frames");
        EmbeddingQueries::create_batch(
            &pool,
            &[NewEmbeddingRecord {
                frame: frame_ids[0],
                vector_entry: "1".to_string(),
                source,
                model_name: model.to_string(),
            }],
        )
        .await
        .expect("insert record");
    }

    let embedded = EmbeddingQueries::embedded_sources(&pool, &[a.id, b.id], "model_a")
        .await
        .expect("query");
    assert_eq!(embedded.len(), 1);
    assert!(embedded.contains(&clip));

    let embedded = EmbeddingQueries::embedded_sources(&pool, &[a.id], "model_b")
        .await
        .expect("query");
    assert!(embedded.is_empty());
}

#[tokio::test]
async fn large_id_lists_are_chunked() {
    let (_temp_dir, pool) = create_test_pool().await;
    let video = create_video(&pool, "/data/a.mp4").await;
    let source = SourceKey {
        video_id: video.id,
        clip_id: None,
    };

    let ids = FrameQueries::create_batch(&pool, &frames_for(source, 1200))
        .await
        .expect("insert frames");
    let deleted = FrameQueries::delete_by_ids(&pool, &ids)
        .await
        .expect("delete frames");
    assert_eq!(deleted, 1200);
}

#[tokio::test]
async fn id_filter_accepts_more_ids_than_bind_parameters() {
    let (_temp_dir, pool) = create_test_pool().await;
    let a = create_video(&pool, "/data/a.mp4").await;
    let b = create_video(&pool, "/data/b.mp4").await;

    let mut ids: Vec<i64> = (10_000..11_200).collect();
    ids.push(b.id);
    assert!(ids.len() > MAX_BIND_PARAMETERS);

    let videos = VideoQueries::find(&pool, &SearchFilter::with_ids(ids.clone()))
        .await
        .expect("Failed to find by many ids");
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].id, b.id);

    let clip = ClipQueries::create(
        &pool,
        NewClip {
            video: a.id,
            start: 0.0,
            end: 1.0,
            metadata: serde_json::Map::new(),
        },
    )
    .await
    .expect("Failed to create clip");
    ids.push(clip.id);
    let clips = ClipQueries::find_with_video(&pool, &SearchFilter::with_ids(ids))
        .await
        .expect("Failed to find clips by many ids");
    assert_eq!(clips.len(), 1);
}
