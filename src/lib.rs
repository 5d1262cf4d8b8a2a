use thiserror::Error;

pub type Result<T> = std::result::Result<T, FrameEmbedderError>;

#[derive(Error, Debug)]
pub enum FrameEmbedderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Job error: {0}")]
    Job(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod indexer;
pub mod jobs;
pub mod media;
