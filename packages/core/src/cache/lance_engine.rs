//! LanceCacheEngine - Vector Cache Backend
//!
//! Embedded LanceDB store implementing the relational engine's filtering
//! contract plus approximate nearest-neighbor semantic search and hybrid
//! (filter + vector) queries. This is the default backend.
//!
//! # Persisted layout
//!
//! One Lance table per entity category, with Arrow columns:
//!
//! - `slug` / `name` - identity (Utf8, non-null)
//! - `embedding` - FixedSizeList<Float32; 384> computed from the category's
//!   searchable-text projection at store time
//! - `source_api` / `document` - provenance
//! - `data` - full entity payload, serialized verbatim, so reads never lose
//!   fields the declared columns don't capture
//! - one typed column per indexed field declared in the schema registry
//!   (categories absent from the registry fall back to just `document`,
//!   since Lance tables carry arbitrary scalar columns without migration)
//!
//! Upsert is delete-then-add in one batch; the embedding is recomputed on
//! every re-store.

use crate::cache::filter::{self, FilterMap, FilterValue};
use crate::cache::{CacheError, CacheStats, EntityCache};
use crate::models::{EntityRecord, SIMILARITY_SCORE_FIELD};
use crate::schema::{self, searchable_text, FieldType};
use arrow_array::{
    Array, BooleanArray, FixedSizeListArray, Float32Array, Float64Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use lorespace_nlp_engine::{EmbeddingService, EMBEDDING_DIMENSION};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// The backend refuses unbounded scans; "everything" reads are capped here.
const SCAN_LIMIT: usize = 10_000;

/// Vector cache engine over embedded LanceDB
pub struct LanceCacheEngine {
    db_path: PathBuf,
    connection: OnceCell<Connection>,
    encoder: Arc<EmbeddingService>,
}

impl LanceCacheEngine {
    /// Create the engine. Neither the database nor the embedding model is
    /// touched until the first real operation.
    pub fn new(db_path: impl Into<PathBuf>, encoder: Arc<EmbeddingService>) -> Self {
        Self {
            db_path: db_path.into(),
            connection: OnceCell::new(),
            encoder,
        }
    }

    /// Open (or get) the LanceDB connection. Concurrent first calls are
    /// serialized by the cell.
    async fn connection(&self) -> Result<&Connection, CacheError> {
        self.connection
            .get_or_try_init(|| async {
                let connection = connect(&self.db_path.to_string_lossy())
                    .execute()
                    .await
                    .map_err(|e| {
                        CacheError::backend(format!(
                            "LanceDB connection failed at {:?}: {}",
                            self.db_path, e
                        ))
                    })?;
                tracing::debug!("Opened lance entity cache at {:?}", self.db_path);
                Ok(connection)
            })
            .await
    }

    /// Indexed fields for a category. Unregistered categories use the
    /// default schema (just the implicit columns), not an error.
    fn category_fields(category: &str) -> &'static [(&'static str, FieldType)] {
        schema::indexed_fields(category).unwrap_or(&[])
    }

    /// Arrow schema for a category's table
    fn arrow_schema(fields: &[(&str, FieldType)]) -> Arc<Schema> {
        let mut columns = vec![
            Field::new("slug", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    EMBEDDING_DIMENSION as i32,
                ),
                false,
            ),
            Field::new("source_api", DataType::Utf8, false),
            Field::new("document", DataType::Utf8, false),
            Field::new("data", DataType::Utf8, false),
        ];
        for (field, field_type) in fields {
            columns.push(Field::new(*field, arrow_type(*field_type), false));
        }
        Arc::new(Schema::new(columns))
    }

    /// Open the category's table, creating it (idempotently) if missing.
    async fn ensure_table(&self, category: &str) -> Result<Table, CacheError> {
        let connection = self.connection().await?;
        let table_names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| CacheError::backend(format!("Failed to list tables: {}", e)))?;

        if table_names.iter().any(|name| name == category) {
            return connection
                .open_table(category)
                .execute()
                .await
                .map_err(|e| {
                    CacheError::backend(format!("Failed to open table '{}': {}", category, e))
                });
        }

        let schema = Self::arrow_schema(Self::category_fields(category));
        let empty = RecordBatch::new_empty(schema.clone());
        let batches = RecordBatchIterator::new(vec![Ok(empty)], schema);

        match connection
            .create_table(category, Box::new(batches))
            .execute()
            .await
        {
            Ok(table) => Ok(table),
            // Lost a creation race: the table exists now, open it instead
            Err(_) => connection
                .open_table(category)
                .execute()
                .await
                .map_err(|e| {
                    CacheError::backend(format!("Failed to create table '{}': {}", category, e))
                }),
        }
    }

    /// Open the category's table if it exists.
    async fn open_existing(&self, category: &str) -> Result<Option<Table>, CacheError> {
        let connection = self.connection().await?;
        let table_names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| CacheError::backend(format!("Failed to list tables: {}", e)))?;

        if !table_names.iter().any(|name| name == category) {
            return Ok(None);
        }

        let table = connection
            .open_table(category)
            .execute()
            .await
            .map_err(|e| {
                CacheError::backend(format!("Failed to open table '{}': {}", category, e))
            })?;
        Ok(Some(table))
    }

    /// Build the upsert batch: identity, embedding, provenance, payload, and
    /// the typed projection of every declared field (category defaults fill
    /// in what an entity omits).
    fn build_batch(
        &self,
        category: &str,
        entities: &[EntityRecord],
        embeddings: Vec<Vec<f32>>,
    ) -> Result<(Arc<Schema>, RecordBatch), CacheError> {
        let fields = Self::category_fields(category);
        let schema = Self::arrow_schema(fields);

        let mut slugs = Vec::with_capacity(entities.len());
        let mut names = Vec::with_capacity(entities.len());
        let mut sources = Vec::with_capacity(entities.len());
        let mut documents = Vec::with_capacity(entities.len());
        let mut payloads = Vec::with_capacity(entities.len());
        for entity in entities {
            slugs.push(entity.slug().unwrap_or_default().to_string());
            names.push(entity.name().unwrap_or_default().to_string());
            sources.push(entity.text_field("source_api").unwrap_or("unknown").to_string());
            documents.push(entity.document().unwrap_or_default().to_string());
            payloads.push(serde_json::to_string(entity.as_map()).map_err(|e| {
                CacheError::backend(format!("Failed to serialize entity: {}", e))
            })?);
        }

        let mut flat_values = Vec::with_capacity(entities.len() * EMBEDDING_DIMENSION);
        for embedding in &embeddings {
            if embedding.len() != EMBEDDING_DIMENSION {
                return Err(CacheError::backend(format!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    EMBEDDING_DIMENSION,
                    embedding.len()
                )));
            }
            flat_values.extend_from_slice(embedding);
        }
        let embedding_array = FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, false)),
            EMBEDDING_DIMENSION as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| CacheError::backend(format!("Failed to build embedding column: {}", e)))?;

        let mut columns: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(slugs)),
            Arc::new(StringArray::from(names)),
            Arc::new(embedding_array),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(documents)),
            Arc::new(StringArray::from(payloads)),
        ];

        for (field, field_type) in fields {
            columns.push(projection_column(entities, field, *field_type));
        }

        let batch = RecordBatch::try_new(schema.clone(), columns)
            .map_err(|e| CacheError::backend(format!("Failed to build record batch: {}", e)))?;
        Ok((schema, batch))
    }

    async fn try_get(
        &self,
        category: &str,
        filters: &FilterMap,
    ) -> Result<Vec<EntityRecord>, CacheError> {
        let Some(table) = self.open_existing(category).await? else {
            return Ok(Vec::new());
        };

        let mut query = table.query().limit(SCAN_LIMIT);
        if let Some(expr) = filter::lance_expr(filters) {
            query = query.only_if(expr);
        }

        let stream = query
            .execute()
            .await
            .map_err(|e| CacheError::backend(format!("Query failed on '{}': {}", category, e)))?;
        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| CacheError::backend(format!("Failed to collect results: {}", e)))?;

        let mut entities = Vec::new();
        for batch in &batches {
            extract_entities(batch, None, &mut entities);
        }
        entities.sort_by(|a, b| a.name().unwrap_or_default().cmp(b.name().unwrap_or_default()));
        Ok(entities)
    }

    async fn try_semantic(
        &self,
        category: &str,
        query_text: &str,
        limit: usize,
        filters: &FilterMap,
    ) -> Result<Vec<EntityRecord>, CacheError> {
        let Some(table) = self.open_existing(category).await? else {
            return Ok(Vec::new());
        };

        let query_embedding = self.encoder.encode(query_text)?;

        let mut query = table
            .vector_search(query_embedding)
            .map_err(|e| CacheError::backend(format!("Vector search failed: {}", e)))?
            .distance_type(DistanceType::Cosine)
            .limit(limit);
        if let Some(expr) = filter::lance_expr(filters) {
            query = query.only_if(expr);
        }

        let stream = query
            .execute()
            .await
            .map_err(|e| CacheError::backend(format!("Vector query failed: {}", e)))?;
        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| CacheError::backend(format!("Failed to collect results: {}", e)))?;

        let mut entities = Vec::new();
        for batch in &batches {
            let distances = batch
                .column_by_name("_distance")
                .and_then(|col| col.as_any().downcast_ref::<Float32Array>());
            extract_entities(batch, distances, &mut entities);
        }

        // Rank by similarity descending and cap at the requested limit
        entities.sort_by(|a, b| {
            score_of(b)
                .partial_cmp(&score_of(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entities.truncate(limit);
        Ok(entities)
    }

    /// Build (or rebuild) the ANN index over the embedding column.
    ///
    /// IVF-PQ training needs a minimum corpus, so small tables are skipped
    /// and failures are non-fatal; queries fall back to a flat scan until a
    /// later store crosses the threshold.
    async fn maybe_create_vector_index(&self, category: &str, table: &Table) {
        const MIN_ROWS_FOR_INDEX: usize = 256;

        match table.count_rows(None).await {
            Ok(count) if count >= MIN_ROWS_FOR_INDEX => {
                let builder = IvfPqIndexBuilder::default().distance_type(DistanceType::Cosine);
                if let Err(e) = table
                    .create_index(&["embedding"], lancedb::index::Index::IvfPq(builder))
                    .replace(true)
                    .execute()
                    .await
                {
                    tracing::debug!("Vector index not built for '{}': {}", category, e);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("Row count failed for '{}': {}", category, e),
        }
    }
}

#[async_trait]
impl EntityCache for LanceCacheEngine {
    fn backend_name(&self) -> &'static str {
        "lance"
    }

    fn supports_semantic_search(&self) -> bool {
        true
    }

    async fn get_entities(
        &self,
        category: &str,
        filters: &FilterMap,
    ) -> Result<Vec<EntityRecord>, CacheError> {
        // Unregistered categories are allowed (default schema), but filter
        // fields must still come from the columns the table actually carries
        let mut allowed: Vec<&str> = Self::category_fields(category)
            .iter()
            .map(|(field, _)| *field)
            .collect();
        allowed.extend(["document", "name", "slug"]);
        filter::ensure_allowed(category, filters, &allowed)?;

        match self.try_get(category, filters).await {
            Ok(entities) => Ok(entities),
            Err(e) => {
                tracing::warn!("Cache read failed for '{}', returning empty: {}", category, e);
                Ok(Vec::new())
            }
        }
    }

    async fn store_entities(
        &self,
        entities: &[EntityRecord],
        category: &str,
    ) -> Result<usize, CacheError> {
        // Bulk-embedding an empty batch is meaningless work the caller
        // should never request
        if entities.is_empty() {
            return Err(CacheError::EmptyEntityList(category.to_string()));
        }

        // Fail fast before any partial write: a half-written vector index is
        // harder to recover than a missing row
        for (index, entity) in entities.iter().enumerate() {
            entity
                .validate_for_store()
                .map_err(|e| CacheError::InvalidEntity {
                    index,
                    reason: e.to_string(),
                })?;
        }

        let texts: Vec<String> = entities
            .iter()
            .map(|entity| searchable_text(category, entity))
            .collect();
        let embeddings = self.encoder.encode_batch(&texts)?;

        let (schema, batch) = self.build_batch(category, entities, embeddings)?;
        let table = self.ensure_table(category).await?;

        // Upsert: drop any rows for these slugs, then add the batch
        let predicate = slug_predicate(entities);
        table.delete(&predicate).await.map_err(|e| {
            CacheError::backend(format!("Failed to delete existing slugs: {}", e))
        })?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| CacheError::backend(format!("Failed to add batch: {}", e)))?;

        self.maybe_create_vector_index(category, &table).await;

        tracing::debug!("Stored {} entities in '{}'", entities.len(), category);
        Ok(entities.len())
    }

    async fn semantic_search(
        &self,
        category: &str,
        query: &str,
        limit: usize,
        filters: &FilterMap,
    ) -> Result<Vec<EntityRecord>, CacheError> {
        let mut allowed: Vec<&str> = Self::category_fields(category)
            .iter()
            .map(|(field, _)| *field)
            .collect();
        allowed.extend(["document", "name", "slug"]);
        filter::ensure_allowed(category, filters, &allowed)?;

        // Semantic search over nothing is definitionally a plain listing
        if query.trim().is_empty() {
            let mut entities = self.get_entities(category, filters).await?;
            entities.truncate(limit);
            return Ok(entities);
        }

        match self.try_semantic(category, query, limit, filters).await {
            Ok(entities) => Ok(entities),
            Err(e) => {
                // Best-effort on top of guaranteed structured retrieval
                tracing::warn!(
                    "Semantic search failed for '{}', falling back to filters: {}",
                    category,
                    e
                );
                let mut entities = self.get_entities(category, filters).await?;
                entities.truncate(limit);
                Ok(entities)
            }
        }
    }

    async fn count_entities(&self, category: &str) -> Result<u64, CacheError> {
        let result: Result<u64, CacheError> = async {
            match self.open_existing(category).await? {
                Some(table) => {
                    let count = table
                        .count_rows(None)
                        .await
                        .map_err(|e| CacheError::backend(format!("Failed to count rows: {}", e)))?;
                    Ok(count as u64)
                }
                None => Ok(0),
            }
        }
        .await;

        match result {
            Ok(count) => Ok(count),
            Err(e) => {
                tracing::warn!("Count failed for '{}', returning 0: {}", category, e);
                Ok(0)
            }
        }
    }

    async fn list_documents(&self) -> Result<Vec<String>, CacheError> {
        let counts = self.document_counts().await?;
        Ok(counts.into_keys().collect())
    }

    async fn document_counts(&self) -> Result<BTreeMap<String, u64>, CacheError> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();

        let result: Result<(), CacheError> = async {
            let connection = self.connection().await?;
            let table_names = connection
                .table_names()
                .execute()
                .await
                .map_err(|e| CacheError::backend(format!("Failed to list tables: {}", e)))?;

            for name in table_names {
                let table = connection
                    .open_table(&name)
                    .execute()
                    .await
                    .map_err(|e| {
                        CacheError::backend(format!("Failed to open table '{}': {}", name, e))
                    })?;
                let stream = table.query().limit(SCAN_LIMIT).execute().await.map_err(|e| {
                    CacheError::backend(format!("Failed to scan '{}': {}", name, e))
                })?;
                let batches: Vec<RecordBatch> = stream.try_collect().await.map_err(|e| {
                    CacheError::backend(format!("Failed to collect '{}': {}", name, e))
                })?;

                for batch in &batches {
                    let Some(documents) = batch
                        .column_by_name("document")
                        .and_then(|col| col.as_any().downcast_ref::<StringArray>())
                    else {
                        continue;
                    };
                    for i in 0..batch.num_rows() {
                        if documents.is_null(i) {
                            continue;
                        }
                        let document = documents.value(i);
                        if !document.is_empty() {
                            *counts.entry(document.to_string()).or_insert(0) += 1;
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!("Document breakdown failed, returning partial result: {}", e);
        }
        Ok(counts)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut per_category = BTreeMap::new();
        let mut total = 0u64;

        let result: Result<(), CacheError> = async {
            let connection = self.connection().await?;
            let table_names = connection
                .table_names()
                .execute()
                .await
                .map_err(|e| CacheError::backend(format!("Failed to list tables: {}", e)))?;

            for name in table_names {
                let count = self.count_entities(&name).await?;
                if count > 0 {
                    per_category.insert(name, count);
                    total += count;
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!("Stats collection failed, returning partial result: {}", e);
        }

        Ok(CacheStats {
            backend: self.backend_name(),
            per_category,
            total_entities: total,
            storage_bytes: dir_size(&self.db_path),
        })
    }
}

fn arrow_type(field_type: FieldType) -> DataType {
    match field_type {
        FieldType::Text => DataType::Utf8,
        FieldType::Integer => DataType::Int64,
        FieldType::Real => DataType::Float64,
        FieldType::Boolean => DataType::Boolean,
    }
}

/// Build one typed Arrow column projecting `field` across all entities.
fn projection_column(
    entities: &[EntityRecord],
    field: &str,
    field_type: FieldType,
) -> Arc<dyn Array> {
    match field_type {
        FieldType::Text => {
            let values: Vec<String> = entities
                .iter()
                .map(|entity| match filter::coerce(entity.get(field), field_type) {
                    FilterValue::Text(s) => s,
                    _ => String::new(),
                })
                .collect();
            Arc::new(StringArray::from(values))
        }
        FieldType::Integer => {
            let values: Vec<i64> = entities
                .iter()
                .map(|entity| entity.get(field).and_then(Value::as_i64).unwrap_or(0))
                .collect();
            Arc::new(Int64Array::from(values))
        }
        FieldType::Real => {
            let values: Vec<f64> = entities
                .iter()
                .map(|entity| entity.get(field).and_then(Value::as_f64).unwrap_or(0.0))
                .collect();
            Arc::new(Float64Array::from(values))
        }
        FieldType::Boolean => {
            let values: Vec<bool> = entities
                .iter()
                .map(|entity| entity.get(field).and_then(Value::as_bool).unwrap_or(false))
                .collect();
            Arc::new(BooleanArray::from(values))
        }
    }
}

/// Deserialize the full payload column back into entity records, attaching
/// similarity scores when a `_distance` column is present.
fn extract_entities(
    batch: &RecordBatch,
    distances: Option<&Float32Array>,
    out: &mut Vec<EntityRecord>,
) {
    let Some(payloads) = batch
        .column_by_name("data")
        .and_then(|col| col.as_any().downcast_ref::<StringArray>())
    else {
        tracing::warn!("Missing data column in result batch");
        return;
    };

    for i in 0..batch.num_rows() {
        let parsed = serde_json::from_str::<Value>(payloads.value(i))
            .ok()
            .and_then(|v| EntityRecord::from_value(v).ok());
        match parsed {
            Some(mut entity) => {
                if let Some(distances) = distances {
                    if !distances.is_null(i) {
                        let similarity = 1.0 - f64::from(distances.value(i));
                        entity.set(
                            SIMILARITY_SCORE_FIELD,
                            serde_json::json!(similarity),
                        );
                    }
                }
                out.push(entity);
            }
            // Malformed stored record: skip, never fail the read
            None => tracing::warn!("Skipping malformed cached record"),
        }
    }
}

fn score_of(entity: &EntityRecord) -> f64 {
    entity
        .get(SIMILARITY_SCORE_FIELD)
        .and_then(Value::as_f64)
        .unwrap_or(f64::MIN)
}

/// Escaped `slug IN (...)` predicate covering every entity in the batch.
fn slug_predicate(entities: &[EntityRecord]) -> String {
    let quoted: Vec<String> = entities
        .iter()
        .filter_map(EntityRecord::slug)
        .map(|slug| format!("'{}'", slug.replace('\'', "''")))
        .collect();
    format!("slug IN ({})", quoted.join(", "))
}

fn dir_size(path: &std::path::Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                dir_size(&path)
            } else {
                std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0)
            }
        })
        .sum()
}
