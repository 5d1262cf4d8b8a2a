#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{EmbeddingService, l2_normalize, sanitize_model_name};
use crate::config::Config;
use crate::media::Frame;

/// Request timeout used until `with_timeout` sets another
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// Blocking HTTP client for an image embedding server.
///
/// `POST /embed` takes `{"model", "images": [{"width", "height", "data"}]}`
/// with base64 RGB24 pixel data and answers `{"embeddings": [[f32]]}`.
/// Requests are not retried.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    base_url: Url,
    model: String,
    model_name: String,
    embedding_dimension: usize,
    batch_size: usize,
    timeout: Duration,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    images: Vec<ImagePayload>,
}

#[derive(Debug, Serialize)]
struct ImagePayload {
    width: u32,
    height: u32,
    data: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbeddingClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .embedding
            .embedding_url()
            .context("Failed to generate embedding service URL from config")?;

        Ok(Self::with_endpoint(
            base_url,
            &config.embedding.model,
            config.embedding.embedding_dimension as usize,
            config.embedding.batch_size as usize,
        )
        .with_timeout(Duration::from_secs(config.embedding.timeout_seconds)))
    }

    /// Client for `model` served at `base_url`
    #[inline]
    pub fn with_endpoint(
        base_url: Url,
        model: &str,
        embedding_dimension: usize,
        batch_size: usize,
    ) -> Self {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECONDS);

        Self {
            base_url,
            model: model.to_string(),
            model_name: sanitize_model_name(model),
            embedding_dimension,
            batch_size: batch_size.max(1),
            timeout,
            agent: build_agent(timeout),
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.agent = build_agent(timeout);
        self
    }

    /// Global timeout applied to each request
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check that the embedding server is reachable
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/health")
            .context("Failed to build health URL")?;

        debug!("Checking embedding service at {}", url);

        self.agent
            .get(url.as_str())
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .with_context(|| format!("Embedding service at {} is not reachable", self.base_url))?;

        info!(
            "Health check passed for embedding service at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    fn embed_single_batch(&self, frames: &[Frame]) -> Result<Vec<Vec<f32>>> {
        let images = frames
            .iter()
            .map(|frame| {
                let expected = Frame::rgb_len(frame.width, frame.height);
                anyhow::ensure!(
                    frame.data.len() == expected,
                    "Frame {} holds {} bytes, expected {} for {}x{} RGB24",
                    frame.index,
                    frame.data.len(),
                    expected,
                    frame.width,
                    frame.height
                );
                Ok(ImagePayload {
                    width: frame.width,
                    height: frame.height,
                    data: base64::engine::general_purpose::STANDARD.encode(&frame.data),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let request = EmbedRequest {
            model: &self.model,
            images,
        };

        let url = self
            .base_url
            .join("/embed")
            .context("Failed to build embedding URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .with_context(|| format!("Embedding request to {} failed", url))?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if response.embeddings.len() != frames.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                frames.len(),
                response.embeddings.len()
            ));
        }

        response
            .embeddings
            .into_iter()
            .map(|mut vector| {
                anyhow::ensure!(
                    vector.len() == self.embedding_dimension,
                    "Embedding has {} dimensions, expected {}",
                    vector.len(),
                    self.embedding_dimension
                );
                l2_normalize(&mut vector);
                Ok(vector)
            })
            .collect()
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

impl EmbeddingService for HttpEmbeddingClient {
    #[inline]
    fn model_name(&self) -> &str {
        &self.model_name
    }

    #[inline]
    fn embedding_dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn embed_frames(&self, frames: &[Frame]) -> Result<Vec<Vec<f32>>> {
        if frames.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} frames", frames.len());

        let mut embeddings = Vec::with_capacity(frames.len());
        for batch in frames.chunks(self.batch_size) {
            let batch_embeddings = self
                .embed_single_batch(batch)
                .with_context(|| format!("Failed to embed batch of {} frames", batch.len()))?;
            embeddings.extend(batch_embeddings);
        }

        Ok(embeddings)
    }
}
