// LanceDB vector index module
// Per-model tables of frame embeddings keyed by the frame's correlation key


pub mod vector_store;

use serde::{Deserialize, Serialize};

pub use vector_store::VectorStore;

/// Maximum stored length of `object_id` and `model_name`
pub const MAX_KEY_LENGTH: usize = 100;

/// A vector entry as stored in the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    /// Generated primary key
    pub id: i64,
    /// Id of the owning frame record, as text
    pub object_id: String,
    pub model_name: String,
    pub embeddings: Vec<f32>,
}

/// One ranked result of a similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: i64,
    pub object_id: String,
    /// Distance under the table's metric, lower is closer
    pub distance: f32,
}

/// Distance metric used for similarity search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    L2,
    Cosine,
    Dot,
}

impl From<DistanceMetric> for lancedb::DistanceType {
    #[inline]
    fn from(metric: DistanceMetric) -> Self {
        match metric {
            DistanceMetric::L2 => lancedb::DistanceType::L2,
            DistanceMetric::Cosine => lancedb::DistanceType::Cosine,
            DistanceMetric::Dot => lancedb::DistanceType::Dot,
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
        };
        f.write_str(name)
    }
}
