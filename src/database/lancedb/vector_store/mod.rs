
use super::{DistanceMetric, MAX_KEY_LENGTH, SearchHit, VectorEntry};
use crate::{FrameEmbedderError, config::Config};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatchIterator, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use itertools::Itertools;
use lancedb::{
    Connection, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Keeps `IN (...)` predicates to a manageable size
const MAX_PREDICATE_IDS: usize = 1000;

/// Vector index table for one embedding model, backed by LanceDB
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    model_name: String,
    dimension: usize,
    metric: DistanceMetric,
}

impl VectorStore {
    /// Open (or create) the table for `model_name` under the configured vectors directory
    ///
    /// # Arguments
    /// * `config` - Application configuration containing database paths and the metric
    /// * `model_name` - Sanitised model identifier, also used as the table name
    /// * `dimension` - Fixed vector dimension of the model
    #[inline]
    pub async fn open(
        config: &Config,
        model_name: &str,
        dimension: usize,
    ) -> Result<Self, FrameEmbedderError> {
        let db_path = config.vector_database_path();
        Self::open_at(&db_path, model_name, dimension, config.vector_index.metric).await
    }

    /// Open (or create) the table for `model_name` in the LanceDB directory at `db_path`
    #[inline]
    pub async fn open_at(
        db_path: &Path,
        model_name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<Self, FrameEmbedderError> {
        if model_name.is_empty() || model_name.len() > MAX_KEY_LENGTH {
            return Err(FrameEmbedderError::VectorIndex(format!(
                "Model name must be 1 to {} characters: '{}'",
                MAX_KEY_LENGTH, model_name
            )));
        }
        if dimension == 0 {
            return Err(FrameEmbedderError::VectorIndex(
                "Vector dimension must be positive".to_string(),
            ));
        }

        debug!("Initializing LanceDB at path: {:?}", db_path);
        std::fs::create_dir_all(db_path).map_err(|e| {
            FrameEmbedderError::VectorIndex(format!(
                "Failed to create vector database directory: {}",
                e
            ))
        })?;

        let uri = db_path.display().to_string();

        let connection = match lancedb::connect(&uri).execute().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to connect to LanceDB: {}", e);

                let error_msg = e.to_string().to_lowercase();
                if error_msg.contains("corrupt") || error_msg.contains("malformed") {
                    warn!("Vector database corruption detected, attempting recovery");
                    Self::attempt_corruption_recovery(db_path)?;

                    lancedb::connect(&uri).execute().await.map_err(|e| {
                        FrameEmbedderError::VectorIndex(format!(
                            "Failed to connect to LanceDB after recovery: {}",
                            e
                        ))
                    })?
                } else {
                    return Err(FrameEmbedderError::VectorIndex(format!(
                        "Failed to connect to LanceDB: {}",
                        e
                    )));
                }
            }
        };

        let store = Self {
            connection,
            table_name: model_name.to_string(),
            model_name: model_name.to_string(),
            dimension,
            metric,
        };

        store.initialize_table().await?;

        info!(
            "Vector store '{}' ready ({} dimensions, {} metric)",
            store.table_name, store.dimension, store.metric
        );
        Ok(store)
    }

    #[inline]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    #[inline]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Create the model's table, or check an existing one against the expected dimension
    async fn initialize_table(&self) -> Result<(), FrameEmbedderError> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| FrameEmbedderError::VectorIndex(format!("Failed to list tables: {}", e)))?;

        if table_names.contains(&self.table_name) {
            let existing = self.detect_existing_vector_dimension().await?;
            if existing != self.dimension {
                return Err(FrameEmbedderError::VectorIndex(format!(
                    "Table '{}' stores {}-dimensional vectors but the model produces {}",
                    self.table_name, existing, self.dimension
                )));
            }
            debug!("Vector table '{}' already exists", self.table_name);
            return Ok(());
        }

        info!(
            "Creating vector table '{}' with {} dimensions",
            self.table_name, self.dimension
        );
        self.connection
            .create_empty_table(&self.table_name, Self::create_schema(self.dimension))
            .execute()
            .await
            .map_err(|e| FrameEmbedderError::VectorIndex(format!("Failed to create table: {}", e)))?;

        Ok(())
    }

    /// Detect vector dimension from existing table schema
    async fn detect_existing_vector_dimension(&self) -> Result<usize, FrameEmbedderError> {
        let table = self.open_table().await?;

        let schema = table.schema().await.map_err(|e| {
            FrameEmbedderError::VectorIndex(format!("Failed to get table schema: {}", e))
        })?;

        for field in schema.fields() {
            if field.name() == "embeddings" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(FrameEmbedderError::VectorIndex(
            "Could not find embeddings column or determine dimension".to_string(),
        ))
    }

    fn create_schema(vector_dim: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("object_id", DataType::Utf8, false),
            Field::new("model_name", DataType::Utf8, false),
            Field::new(
                "embeddings",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    vector_dim as i32,
                ),
                false,
            ),
        ]))
    }

    async fn open_table(&self) -> Result<Table, FrameEmbedderError> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| FrameEmbedderError::VectorIndex(format!("Failed to open table: {}", e)))
    }

    /// Generate a positive primary key for a new vector entry
    fn generate_id() -> i64 {
        let (high, _) = Uuid::new_v4().as_u64_pair();
        (high & i64::MAX as u64) as i64
    }

    /// Insert one entry per `(object_id, vector)` pair.
    ///
    /// Returns the generated entry ids in input order.
    #[inline]
    pub async fn insert_batch(
        &self,
        object_ids: &[String],
        vectors: &[Vec<f32>],
    ) -> Result<Vec<i64>, FrameEmbedderError> {
        if object_ids.len() != vectors.len() {
            return Err(FrameEmbedderError::VectorIndex(format!(
                "Got {} object ids for {} vectors",
                object_ids.len(),
                vectors.len()
            )));
        }
        if object_ids.is_empty() {
            debug!("No vectors to store");
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = (0..object_ids.len()).map(|_| Self::generate_id()).collect();
        let record_batch = self.create_record_batch(&ids, object_ids, vectors)?;

        let table = self.open_table().await?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table.add(reader).execute().await.map_err(|e| {
            FrameEmbedderError::VectorIndex(format!("Failed to insert vectors: {}", e))
        })?;

        debug!("Stored {} vectors in '{}'", ids.len(), self.table_name);
        Ok(ids)
    }

    fn create_record_batch(
        &self,
        ids: &[i64],
        object_ids: &[String],
        vectors: &[Vec<f32>],
    ) -> Result<RecordBatch, FrameEmbedderError> {
        let len = ids.len();

        let mut flat_values = Vec::with_capacity(len * self.dimension);
        for (object_id, vector) in object_ids.iter().zip(vectors) {
            if object_id.len() > MAX_KEY_LENGTH {
                return Err(FrameEmbedderError::VectorIndex(format!(
                    "Object id longer than {} characters: '{}'",
                    MAX_KEY_LENGTH, object_id
                )));
            }
            if vector.len() != self.dimension {
                return Err(FrameEmbedderError::VectorIndex(format!(
                    "Vector for object {} has {} dimensions, expected {}",
                    object_id,
                    vector.len(),
                    self.dimension
                )));
            }
            flat_values.extend_from_slice(vector);
        }

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(values_array),
            None,
        )
        .map_err(|e| {
            FrameEmbedderError::VectorIndex(format!("Failed to create vector array: {}", e))
        })?;

        let model_names = vec![self.model_name.as_str(); len];
        let object_ids: Vec<&str> = object_ids.iter().map(String::as_str).collect();

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(Int64Array::from(ids.to_vec())),
            Arc::new(StringArray::from(object_ids)),
            Arc::new(StringArray::from(model_names)),
            Arc::new(vector_array),
        ];

        RecordBatch::try_new(Self::create_schema(self.dimension), arrays).map_err(|e| {
            FrameEmbedderError::VectorIndex(format!("Failed to create record batch: {}", e))
        })
    }

    /// Delete the entries with the given ids
    #[inline]
    pub async fn delete_ids(&self, ids: &[i64]) -> Result<(), FrameEmbedderError> {
        if ids.is_empty() {
            return Ok(());
        }

        let table = self.open_table().await?;
        for chunk in ids.chunks(MAX_PREDICATE_IDS) {
            table.delete(&id_predicate(chunk)).await.map_err(|e| {
                FrameEmbedderError::VectorIndex(format!("Failed to delete vectors: {}", e))
            })?;
        }

        debug!("Deleted up to {} vectors from '{}'", ids.len(), self.table_name);
        Ok(())
    }

    /// Delete every entry whose correlation key is in `object_ids`
    #[inline]
    pub async fn delete_object_ids(&self, object_ids: &[String]) -> Result<(), FrameEmbedderError> {
        if object_ids.is_empty() {
            return Ok(());
        }

        let table = self.open_table().await?;
        for chunk in object_ids.chunks(MAX_PREDICATE_IDS) {
            table
                .delete(&object_id_predicate(chunk))
                .await
                .map_err(|e| {
                    FrameEmbedderError::VectorIndex(format!(
                        "Failed to delete vectors by object id: {}",
                        e
                    ))
                })?;
        }

        Ok(())
    }

    /// Number of stored entries among `ids`
    #[inline]
    pub async fn count_ids(&self, ids: &[i64]) -> Result<usize, FrameEmbedderError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let table = self.open_table().await?;
        let mut count = 0;
        for chunk in ids.chunks(MAX_PREDICATE_IDS) {
            count += table
                .count_rows(Some(id_predicate(chunk)))
                .await
                .map_err(|e| {
                    FrameEmbedderError::VectorIndex(format!("Failed to count rows: {}", e))
                })?;
        }

        Ok(count)
    }

    /// Total number of entries in the table
    #[inline]
    pub async fn count_all(&self) -> Result<usize, FrameEmbedderError> {
        let table = self.open_table().await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| FrameEmbedderError::VectorIndex(format!("Failed to count rows: {}", e)))
    }

    /// Commit pending writes by compacting the table and pruning old versions
    #[inline]
    pub async fn flush(&self) -> Result<(), FrameEmbedderError> {
        debug!("Flushing vector table '{}'", self.table_name);

        let table = self.open_table().await?;
        table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| {
                FrameEmbedderError::VectorIndex(format!("Failed to optimize table: {}", e))
            })?;

        Ok(())
    }

    /// Top-`limit` nearest entries to `query_vector` under the table's metric
    #[inline]
    pub async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, FrameEmbedderError> {
        if query_vector.len() != self.dimension {
            return Err(FrameEmbedderError::VectorIndex(format!(
                "Query vector has {} dimensions, expected {}",
                query_vector.len(),
                self.dimension
            )));
        }
        debug!("Searching for similar vectors with limit: {}", limit);

        let table = self.open_table().await?;
        let mut results = table
            .vector_search(query_vector)
            .map_err(|e| {
                FrameEmbedderError::VectorIndex(format!("Failed to create vector search: {}", e))
            })?
            .column("embeddings")
            .distance_type(self.metric.into())
            .limit(limit)
            .execute()
            .await
            .map_err(|e| {
                FrameEmbedderError::VectorIndex(format!("Failed to execute search: {}", e))
            })?;

        let mut hits = Vec::new();
        while let Some(batch) = results.try_next().await.map_err(|e| {
            FrameEmbedderError::VectorIndex(format!("Failed to read result stream: {}", e))
        })? {
            hits.extend(parse_search_batch(&batch)?);
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        debug!("Search returned {} hits", hits.len());
        Ok(hits)
    }

    /// Stored entry for the given correlation key, if any
    #[inline]
    pub async fn vector_for_object(
        &self,
        object_id: &str,
    ) -> Result<Option<VectorEntry>, FrameEmbedderError> {
        let table = self.open_table().await?;
        let mut results = table
            .query()
            .only_if(object_id_predicate(&[object_id.to_string()]))
            .limit(1)
            .execute()
            .await
            .map_err(|e| FrameEmbedderError::VectorIndex(format!("Failed to query table: {}", e)))?;

        while let Some(batch) = results.try_next().await.map_err(|e| {
            FrameEmbedderError::VectorIndex(format!("Failed to read result stream: {}", e))
        })? {
            if let Some(entry) = parse_entry_batch(&batch)?.into_iter().next() {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }

    /// Move an unreadable vector database aside so a fresh one can be created
    fn attempt_corruption_recovery(db_path: &Path) -> Result<(), FrameEmbedderError> {
        warn!("Attempting database corruption recovery at {:?}", db_path);

        if db_path.exists() {
            let backup_path = db_path.with_extension("corrupted_backup");
            if let Err(e) = std::fs::rename(db_path, &backup_path) {
                error!("Failed to backup corrupted database: {}", e);
            } else {
                info!("Corrupted database backed up to {:?}", backup_path);
            }
        }

        if db_path.exists() {
            std::fs::remove_dir_all(db_path).map_err(|e| {
                FrameEmbedderError::VectorIndex(format!(
                    "Failed to remove corrupted database: {}",
                    e
                ))
            })?;
        }

        std::fs::create_dir_all(db_path)?;
        info!("Database corruption recovery completed");
        Ok(())
    }
}

fn id_predicate(ids: &[i64]) -> String {
    format!("id IN ({})", ids.iter().join(", "))
}

fn object_id_predicate(object_ids: &[String]) -> String {
    let list = object_ids
        .iter()
        .map(|id| format!("'{}'", id.replace('\'', "''")))
        .join(", ");
    format!("object_id IN ({})", list)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, FrameEmbedderError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| FrameEmbedderError::VectorIndex(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| FrameEmbedderError::VectorIndex(format!("Invalid {} column type", name)))
}

fn id_column(batch: &RecordBatch) -> Result<&Int64Array, FrameEmbedderError> {
    batch
        .column_by_name("id")
        .ok_or_else(|| FrameEmbedderError::VectorIndex("Missing id column".to_string()))?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| FrameEmbedderError::VectorIndex("Invalid id column type".to_string()))
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchHit>, FrameEmbedderError> {
    let ids = id_column(batch)?;
    let object_ids = string_column(batch, "object_id")?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    Ok((0..batch.num_rows())
        .map(|row| SearchHit {
            id: ids.value(row),
            object_id: object_ids.value(row).to_string(),
            distance: distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) }),
        })
        .collect())
}

fn parse_entry_batch(batch: &RecordBatch) -> Result<Vec<VectorEntry>, FrameEmbedderError> {
    let ids = id_column(batch)?;
    let object_ids = string_column(batch, "object_id")?;
    let model_names = string_column(batch, "model_name")?;
    let vectors = batch
        .column_by_name("embeddings")
        .ok_or_else(|| FrameEmbedderError::VectorIndex("Missing embeddings column".to_string()))?
        .as_any()
        .downcast_ref::<FixedSizeListArray>()
        .ok_or_else(|| {
            FrameEmbedderError::VectorIndex("Invalid embeddings column type".to_string())
        })?;

    let mut entries = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let values = vectors.value(row);
        let values = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| {
                FrameEmbedderError::VectorIndex("Invalid embeddings value type".to_string())
            })?;

        entries.push(VectorEntry {
            id: ids.value(row),
            object_id: object_ids.value(row).to_string(),
            model_name: model_names.value(row).to_string(),
            embeddings: values.values().to_vec(),
        });
    }

    Ok(entries)
}
