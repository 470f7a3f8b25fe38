//! SqliteCacheEngine - Relational Cache Backend
//!
//! Embedded libsql store implementing exact-match filtering over indexed
//! scalar columns plus a JSON column holding the full entity. No semantic
//! capability; callers needing similarity search use the vector backend.
//!
//! # Persisted layout
//!
//! One table per entity category:
//!
//! - `slug TEXT PRIMARY KEY`, `name TEXT NOT NULL`
//! - `data TEXT NOT NULL` - full entity payload, serialized verbatim
//! - `source_api TEXT NOT NULL` - provenance of the ingesting client
//! - `created_at REAL` / `updated_at REAL` - unix-second timestamps;
//!   `created_at` survives upserts
//! - `document TEXT` plus one column per declared indexed field
//!
//! One index per indexed field, plus indexes on `name` and `document`.
//!
//! A separate `response_cache` table provides legacy TTL caching of raw
//! upstream responses; it is outside the entity contract.

use crate::cache::filter::{self, FilterMap};
use crate::cache::{CacheError, CacheStats, EntityCache};
use crate::models::EntityRecord;
use crate::schema::{self, FieldType};
use async_trait::async_trait;
use libsql::{Builder, Connection, Database};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::OnceCell;

/// Relational cache engine over embedded libsql
pub struct SqliteCacheEngine {
    db_path: PathBuf,
    db: OnceCell<Database>,
}

impl SqliteCacheEngine {
    /// Create the engine. No file is opened until the first operation.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            db: OnceCell::new(),
        }
    }

    /// Open (or get) the database handle. First call creates the parent
    /// directory, opens the file, and switches on WAL mode; concurrent first
    /// calls are serialized by the cell so the handle is never
    /// half-initialized.
    async fn database(&self) -> Result<&Database, CacheError> {
        self.db
            .get_or_try_init(|| async {
                if let Some(parent) = self.db_path.parent() {
                    if !parent.exists() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            CacheError::backend(format!(
                                "Failed to create cache directory {:?}: {}",
                                parent, e
                            ))
                        })?;
                    }
                }

                let db = Builder::new_local(&self.db_path).build().await.map_err(|e| {
                    CacheError::backend(format!(
                        "Failed to open cache database {:?}: {}",
                        self.db_path, e
                    ))
                })?;

                let conn = db
                    .connect()
                    .map_err(|e| CacheError::backend(format!("Failed to connect: {}", e)))?;
                execute_pragma(&conn, "PRAGMA journal_mode = WAL").await?;

                tracing::debug!("Opened sqlite entity cache at {:?}", self.db_path);
                Ok(db)
            })
            .await
    }

    /// Connect with the busy timeout applied, so concurrent operations wait
    /// instead of failing immediately with `SQLITE_BUSY`.
    async fn connect(&self) -> Result<Connection, CacheError> {
        let conn = self
            .database()
            .await?
            .connect()
            .map_err(|e| CacheError::backend(format!("Failed to connect: {}", e)))?;
        execute_pragma(&conn, "PRAGMA busy_timeout = 5000").await?;
        Ok(conn)
    }

    /// Create a category's table and indexes if missing (idempotent).
    async fn ensure_table(
        &self,
        conn: &Connection,
        category: &str,
        fields: &[(&str, FieldType)],
    ) -> Result<(), CacheError> {
        let mut columns = String::from(
            "slug TEXT PRIMARY KEY,
             name TEXT NOT NULL,
             data TEXT NOT NULL,
             source_api TEXT NOT NULL,
             created_at REAL NOT NULL,
             updated_at REAL NOT NULL,
             document TEXT",
        );
        for (field, field_type) in fields {
            columns.push_str(&format!(",\n             {} {}", field, sql_type(*field_type)));
        }

        conn.execute(
            &format!("CREATE TABLE IF NOT EXISTS {} ({})", category, columns),
            (),
        )
        .await
        .map_err(|e| {
            CacheError::backend(format!("Failed to create table '{}': {}", category, e))
        })?;

        let mut indexed: Vec<&str> = vec!["name", "document"];
        indexed.extend(fields.iter().map(|(field, _)| *field));
        for field in indexed {
            conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {}({})",
                    category, field, category, field
                ),
                (),
            )
            .await
            .map_err(|e| {
                CacheError::backend(format!(
                    "Failed to create index on {}.{}: {}",
                    category, field, e
                ))
            })?;
        }

        Ok(())
    }

    async fn table_exists(&self, conn: &Connection, table: &str) -> Result<bool, CacheError> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .await
            .map_err(|e| CacheError::backend(format!("Failed to check table: {}", e)))?;
        let mut rows = stmt
            .query((table,))
            .await
            .map_err(|e| CacheError::backend(format!("Failed to check table: {}", e)))?;
        let exists = rows
            .next()
            .await
            .map_err(|e| CacheError::backend(format!("Failed to check table: {}", e)))?
            .is_some();
        Ok(exists)
    }

    /// First-seen timestamps for the slugs about to be written, fetched in
    /// one query before the bulk write to avoid a per-row read-after-write
    /// race.
    async fn existing_created_at(
        &self,
        conn: &Connection,
        category: &str,
        slugs: &[&str],
    ) -> Result<HashMap<String, f64>, CacheError> {
        let mut existing = HashMap::new();
        if slugs.is_empty() {
            return Ok(existing);
        }

        let placeholders = vec!["?"; slugs.len()].join(", ");
        let mut stmt = conn
            .prepare(&format!(
                "SELECT slug, created_at FROM {} WHERE slug IN ({})",
                category, placeholders
            ))
            .await
            .map_err(|e| CacheError::backend(format!("Failed to prepare timestamp query: {}", e)))?;

        let params: Vec<libsql::Value> = slugs
            .iter()
            .map(|slug| libsql::Value::Text(slug.to_string()))
            .collect();
        let mut rows = stmt
            .query(params)
            .await
            .map_err(|e| CacheError::backend(format!("Failed to query timestamps: {}", e)))?;

        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CacheError::backend(format!("Failed to read timestamp row: {}", e)))?
        {
            let slug: String = row
                .get(0)
                .map_err(|e| CacheError::backend(format!("Failed to get slug: {}", e)))?;
            let created_at: f64 = row
                .get(1)
                .map_err(|e| CacheError::backend(format!("Failed to get created_at: {}", e)))?;
            existing.insert(slug, created_at);
        }

        Ok(existing)
    }

    async fn try_get(
        &self,
        category: &str,
        filters: &FilterMap,
        fields: &[(&str, FieldType)],
    ) -> Result<Vec<EntityRecord>, CacheError> {
        let conn = self.connect().await?;
        self.ensure_table(&conn, category, fields).await?;

        let (where_clause, params) = filter::sql_where(filters);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT data FROM {}{} ORDER BY name",
                category, where_clause
            ))
            .await
            .map_err(|e| CacheError::backend(format!("Failed to prepare query: {}", e)))?;

        let mut rows = stmt
            .query(params)
            .await
            .map_err(|e| CacheError::backend(format!("Failed to execute query: {}", e)))?;

        let mut entities = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CacheError::backend(format!("Failed to fetch row: {}", e)))?
        {
            let data: String = row
                .get(0)
                .map_err(|e| CacheError::backend(format!("Failed to get data column: {}", e)))?;
            match serde_json::from_str::<Value>(&data)
                .ok()
                .and_then(|v| EntityRecord::from_value(v).ok())
            {
                Some(entity) => entities.push(entity),
                // Malformed stored record: skip, never fail the read
                None => tracing::warn!("Skipping malformed cached record in '{}'", category),
            }
        }

        Ok(entities)
    }

    //
    // LEGACY RAW-RESPONSE CACHE (TTL key-value store, outside the entity core)
    //

    async fn ensure_response_table(&self, conn: &Connection) -> Result<(), CacheError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS response_cache (
                cache_key TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                expires_at REAL NOT NULL,
                metadata TEXT
            )",
            (),
        )
        .await
        .map_err(|e| CacheError::backend(format!("Failed to create response_cache: {}", e)))?;
        Ok(())
    }

    /// Store a raw upstream response under a cache key with a TTL.
    pub async fn put_response(
        &self,
        cache_key: &str,
        data: &[u8],
        ttl_seconds: f64,
        metadata: Option<&str>,
    ) -> Result<(), CacheError> {
        let conn = self.connect().await?;
        self.ensure_response_table(&conn).await?;

        conn.execute(
            "INSERT OR REPLACE INTO response_cache (cache_key, data, expires_at, metadata)
             VALUES (?, ?, ?, ?)",
            (cache_key, data, now_seconds() + ttl_seconds, metadata),
        )
        .await
        .map_err(|e| CacheError::backend(format!("Failed to store response: {}", e)))?;
        Ok(())
    }

    /// Fetch a raw response if present and unexpired.
    pub async fn get_response(&self, cache_key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let conn = self.connect().await?;
        self.ensure_response_table(&conn).await?;

        let mut stmt = conn
            .prepare("SELECT data FROM response_cache WHERE cache_key = ? AND expires_at > ?")
            .await
            .map_err(|e| CacheError::backend(format!("Failed to prepare response query: {}", e)))?;
        let mut rows = stmt
            .query((cache_key, now_seconds()))
            .await
            .map_err(|e| CacheError::backend(format!("Failed to query response: {}", e)))?;

        match rows
            .next()
            .await
            .map_err(|e| CacheError::backend(format!("Failed to fetch response: {}", e)))?
        {
            Some(row) => {
                let data: Vec<u8> = row
                    .get(0)
                    .map_err(|e| CacheError::backend(format!("Failed to get data: {}", e)))?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    /// Delete expired raw responses, returning the number removed.
    pub async fn purge_expired_responses(&self) -> Result<u64, CacheError> {
        let conn = self.connect().await?;
        self.ensure_response_table(&conn).await?;

        let removed = conn
            .execute(
                "DELETE FROM response_cache WHERE expires_at <= ?",
                (now_seconds(),),
            )
            .await
            .map_err(|e| CacheError::backend(format!("Failed to purge responses: {}", e)))?;
        Ok(removed)
    }
}

#[async_trait]
impl EntityCache for SqliteCacheEngine {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn supports_semantic_search(&self) -> bool {
        false
    }

    async fn get_entities(
        &self,
        category: &str,
        filters: &FilterMap,
    ) -> Result<Vec<EntityRecord>, CacheError> {
        let fields = schema::indexed_fields(category)
            .ok_or_else(|| CacheError::UnknownCategory(category.to_string()))?;
        let allowed = filter::allowed_fields(category).unwrap_or_default();
        filter::ensure_allowed(category, filters, &allowed)?;

        // A cache read failure must never propagate as a hard error
        match self.try_get(category, filters, fields).await {
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
        let fields = schema::indexed_fields(category)
            .ok_or_else(|| CacheError::UnknownCategory(category.to_string()))?;

        // Nothing to do; the facade-level "empty list is a caller error"
        // contract belongs to the vector engine, not here
        if entities.is_empty() {
            return Ok(0);
        }

        let conn = self.connect().await?;
        self.ensure_table(&conn, category, fields).await?;

        let slugs: Vec<&str> = entities.iter().filter_map(EntityRecord::slug).collect();
        let existing = self.existing_created_at(&conn, category, &slugs).await?;
        let now = now_seconds();

        let mut column_names = vec![
            "slug",
            "name",
            "data",
            "source_api",
            "created_at",
            "updated_at",
            "document",
        ];
        column_names.extend(fields.iter().map(|(field, _)| *field));
        let placeholders = vec!["?"; column_names.len()].join(", ");
        let insert_sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            category,
            column_names.join(", "),
            placeholders
        );

        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| CacheError::backend(format!("Failed to begin transaction: {}", e)))?;

        let mut stored = 0usize;
        for entity in entities {
            let Some(slug) = entity.slug() else {
                tracing::warn!("Skipping entity without slug in '{}' store", category);
                continue;
            };

            let data = serde_json::to_string(entity.as_map())
                .map_err(|e| CacheError::backend(format!("Failed to serialize entity: {}", e)))?;
            let created_at = existing.get(slug).copied().unwrap_or(now);

            let mut params: Vec<libsql::Value> = vec![
                libsql::Value::Text(slug.to_string()),
                libsql::Value::Text(entity.name().unwrap_or_default().to_string()),
                libsql::Value::Text(data),
                libsql::Value::Text(entity.text_field("source_api").unwrap_or("unknown").to_string()),
                libsql::Value::Real(created_at),
                libsql::Value::Real(now),
                match entity.document() {
                    Some(document) => libsql::Value::Text(document.to_string()),
                    None => libsql::Value::Null,
                },
            ];
            for (field, field_type) in fields {
                params.push(column_value(entity.get(field), *field_type));
            }

            let result = conn.execute(&insert_sql, params).await;
            if let Err(e) = result {
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(CacheError::backend(format!(
                    "Failed to store entity '{}' in '{}': {}",
                    slug, category, e
                )));
            }
            stored += 1;
        }

        conn.execute("COMMIT", ())
            .await
            .map_err(|e| CacheError::backend(format!("Failed to commit: {}", e)))?;

        tracing::debug!("Stored {} entities in '{}'", stored, category);
        Ok(stored)
    }

    async fn semantic_search(
        &self,
        _category: &str,
        _query: &str,
        _limit: usize,
        _filters: &FilterMap,
    ) -> Result<Vec<EntityRecord>, CacheError> {
        Err(CacheError::SemanticSearchUnsupported(self.backend_name()))
    }

    async fn count_entities(&self, category: &str) -> Result<u64, CacheError> {
        if !schema::is_known_category(category) {
            return Err(CacheError::UnknownCategory(category.to_string()));
        }

        let result: Result<u64, CacheError> = async {
            let conn = self.connect().await?;
            if !self.table_exists(&conn, category).await? {
                return Ok(0);
            }
            let mut stmt = conn
                .prepare(&format!("SELECT COUNT(*) FROM {}", category))
                .await
                .map_err(|e| CacheError::backend(format!("Failed to prepare count: {}", e)))?;
            let mut rows = stmt
                .query(())
                .await
                .map_err(|e| CacheError::backend(format!("Failed to count: {}", e)))?;
            match rows
                .next()
                .await
                .map_err(|e| CacheError::backend(format!("Failed to fetch count: {}", e)))?
            {
                Some(row) => {
                    let count: i64 = row
                        .get(0)
                        .map_err(|e| CacheError::backend(format!("Failed to get count: {}", e)))?;
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
            let conn = self.connect().await?;
            for category in schema::CATEGORIES {
                if !self.table_exists(&conn, category).await? {
                    continue;
                }
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT document, COUNT(*) FROM {}
                         WHERE document IS NOT NULL AND document != ''
                         GROUP BY document",
                        category
                    ))
                    .await
                    .map_err(|e| {
                        CacheError::backend(format!("Failed to prepare document counts: {}", e))
                    })?;
                let mut rows = stmt.query(()).await.map_err(|e| {
                    CacheError::backend(format!("Failed to query document counts: {}", e))
                })?;
                while let Some(row) = rows.next().await.map_err(|e| {
                    CacheError::backend(format!("Failed to fetch document counts: {}", e))
                })? {
                    let document: String = row.get(0).map_err(|e| {
                        CacheError::backend(format!("Failed to get document: {}", e))
                    })?;
                    let count: i64 = row
                        .get(1)
                        .map_err(|e| CacheError::backend(format!("Failed to get count: {}", e)))?;
                    *counts.entry(document).or_insert(0) += count as u64;
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
        for category in schema::CATEGORIES {
            let count = self.count_entities(category).await?;
            if count > 0 {
                per_category.insert(category.to_string(), count);
                total += count;
            }
        }

        let mut storage_bytes = file_size(&self.db_path);
        storage_bytes += file_size(&self.db_path.with_extension("db-wal"));

        Ok(CacheStats {
            backend: self.backend_name(),
            per_category,
            total_entities: total,
            storage_bytes,
        })
    }
}

/// PRAGMA statements return rows, so they go through query() not execute()
async fn execute_pragma(conn: &Connection, pragma: &str) -> Result<(), CacheError> {
    let mut stmt = conn
        .prepare(pragma)
        .await
        .map_err(|e| CacheError::backend(format!("Failed to execute '{}': {}", pragma, e)))?;
    let _ = stmt
        .query(())
        .await
        .map_err(|e| CacheError::backend(format!("Failed to execute '{}': {}", pragma, e)))?;
    Ok(())
}

fn sql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Text => "TEXT",
        FieldType::Integer => "INTEGER",
        FieldType::Real => "REAL",
        FieldType::Boolean => "INTEGER",
    }
}

/// Project an entity field into its typed column value; absent or mistyped
/// values become NULL rather than a fabricated default.
fn column_value(value: Option<&Value>, field_type: FieldType) -> libsql::Value {
    match field_type {
        FieldType::Text => match value.and_then(Value::as_str) {
            Some(s) => libsql::Value::Text(s.to_string()),
            None => libsql::Value::Null,
        },
        FieldType::Integer => match value.and_then(Value::as_i64) {
            Some(i) => libsql::Value::Integer(i),
            None => libsql::Value::Null,
        },
        FieldType::Real => match value.and_then(Value::as_f64) {
            Some(r) => libsql::Value::Real(r),
            None => libsql::Value::Null,
        },
        FieldType::Boolean => match value.and_then(Value::as_bool) {
            Some(b) => libsql::Value::Integer(i64::from(b)),
            None => libsql::Value::Null,
        },
    }
}

fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

fn file_size(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
