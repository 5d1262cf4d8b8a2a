// Database module
// Dual store: SQLite for video, clip, frame and embedding records; LanceDB for vectors

pub mod lancedb;
pub mod sqlite;

pub use sqlite::*;
