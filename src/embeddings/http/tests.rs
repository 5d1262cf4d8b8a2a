use super::*;
use crate::config::EmbeddingConfig;

fn test_frame(index: u64, width: u32, height: u32) -> Frame {
    Frame {
        index,
        timestamp: index as f64 / 25.0,
        width,
        height,
        data: vec![index as u8; Frame::rgb_len(width, height)],
    }
}

#[test]
fn client_configuration() {
    let config = Config {
        embedding: EmbeddingConfig {
            protocol: "http".to_string(),
            host: "test-host".to_string(),
            port: 1234,
            model: "openai/clip-vit-base-patch32".to_string(),
            embedding_dimension: 512,
            batch_size: 8,
            timeout_seconds: 5,
        },
        ..Default::default()
    };
    let client = HttpEmbeddingClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "openai/clip-vit-base-patch32");
    assert_eq!(client.model_name(), "openai_clip_vit_base_patch32");
    assert_eq!(client.embedding_dimension(), 512);
    assert_eq!(client.batch_size, 8);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.timeout(), Duration::from_secs(5));
}

#[test]
fn endpoint_client_uses_default_timeout_until_overridden() {
    let client = HttpEmbeddingClient::with_endpoint(
        Url::parse("http://127.0.0.1:1").expect("valid url"),
        "model",
        4,
        2,
    );
    assert_eq!(client.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECONDS));
    assert_eq!(
        Config::default().embedding.timeout_seconds,
        DEFAULT_TIMEOUT_SECONDS
    );

    let client = client.with_timeout(Duration::from_millis(250));
    assert_eq!(client.timeout(), Duration::from_millis(250));
}

#[test]
fn invalid_endpoint_is_rejected() {
    let mut config = Config::default();
    config.embedding.host = String::new();
    assert!(HttpEmbeddingClient::new(&config).is_err());
}

#[test]
fn request_payload_encodes_rgb_as_base64() {
    let frame = Frame {
        index: 0,
        timestamp: 0.0,
        width: 1,
        height: 1,
        data: vec![255, 0, 128],
    };
    let request = EmbedRequest {
        model: "m",
        images: vec![ImagePayload {
            width: frame.width,
            height: frame.height,
            data: base64::engine::general_purpose::STANDARD.encode(&frame.data),
        }],
    };

    let json: serde_json::Value =
        serde_json::to_value(&request).expect("should serialize request");
    assert_eq!(json["model"], "m");
    assert_eq!(json["images"][0]["width"], 1);
    assert_eq!(json["images"][0]["data"], "/wCA");
}

#[test]
fn empty_batch_makes_no_request() {
    let client = HttpEmbeddingClient::with_endpoint(
        Url::parse("http://127.0.0.1:1").expect("valid url"),
        "model",
        4,
        2,
    );
    let embeddings = client.embed_frames(&[]).expect("empty batch should succeed");
    assert!(embeddings.is_empty());
}

#[test]
fn malformed_frame_is_rejected_before_sending() {
    let client = HttpEmbeddingClient::with_endpoint(
        Url::parse("http://127.0.0.1:1").expect("valid url"),
        "model",
        4,
        2,
    );
    let mut frame = test_frame(0, 2, 2);
    frame.data.pop();

    let err = client
        .embed_frames(&[frame])
        .expect_err("short frame should fail");
    assert!(format!("{err:#}").contains("expected 12"));
}

#[test]
fn unreachable_server_is_an_error() {
    let client = HttpEmbeddingClient::with_endpoint(
        Url::parse("http://127.0.0.1:1").expect("valid url"),
        "model",
        4,
        2,
    )
    .with_timeout(Duration::from_secs(2));

    assert!(client.health_check().is_err());
    assert!(client.embed_frames(&[test_frame(0, 2, 2)]).is_err());
}
