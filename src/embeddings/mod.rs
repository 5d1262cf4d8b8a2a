// Embeddings module
// Model capability mapping batches of frames to unit-norm vectors


pub mod http;

use std::sync::LazyLock;

use anyhow::Result;
use fancy_regex::Regex;

use crate::database::lancedb::MAX_KEY_LENGTH;
use crate::media::Frame;

pub use http::HttpEmbeddingClient;

static NON_WORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\W+").expect("valid regex"));

/// Computes one embedding per frame.
///
/// The returned batch has the same length and order as the input, every
/// vector has `embedding_dimension()` components and unit L2 norm.
pub trait EmbeddingService: Send + Sync {
    /// Sanitised model identifier, stored with every record and naming the vector table
    fn model_name(&self) -> &str;

    fn embedding_dimension(&self) -> usize;

    fn embed_frames(&self, frames: &[Frame]) -> Result<Vec<Vec<f32>>>;
}

/// Replace every run of non-word characters in a model identifier with `_`
#[inline]
pub fn sanitize_model_name(model: &str) -> String {
    let sanitized = NON_WORD_REGEX.replace_all(model, "_");
    sanitized.chars().take(MAX_KEY_LENGTH).collect()
}

/// Scale `vector` to unit length; zero vectors are left unchanged
#[inline]
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
