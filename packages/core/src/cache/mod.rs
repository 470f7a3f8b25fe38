//! Entity Cache Layer
//!
//! This module defines the `EntityCache` contract that repositories code
//! against, the typed filter compiler shared by both backends, and the two
//! engine implementations:
//!
//! - [`SqliteCacheEngine`] - embedded relational store (libsql): exact-match
//!   filtering over indexed columns, no semantic capability
//! - [`LanceCacheEngine`] - embedded vector store (LanceDB): the same
//!   filtering contract plus ANN semantic search and hybrid queries (default)
//!
//! The backend is selected once at construction time via
//! [`create_entity_cache`]; callers hold an `Arc<dyn EntityCache>` and stay
//! independent of the choice.

mod error;
pub mod filter;
mod lance_engine;
mod sqlite_engine;

pub use error::CacheError;
pub use filter::{FilterMap, FilterValue};
pub use lance_engine::LanceCacheEngine;
pub use sqlite_engine::SqliteCacheEngine;

use crate::config::{CacheBackend, CacheConfig};
use crate::models::EntityRecord;
use async_trait::async_trait;
use lorespace_nlp_engine::EmbeddingService;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default result cap for semantic search
pub const DEFAULT_SEMANTIC_LIMIT: usize = 20;

/// Aggregate cache statistics
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CacheStats {
    /// Backend identifier ("sqlite" or "lance")
    pub backend: &'static str,
    /// Entity count per category (only categories with stored data)
    pub per_category: BTreeMap<String, u64>,
    /// Total entity count across categories
    pub total_entities: u64,
    /// On-disk storage size in bytes
    pub storage_bytes: u64,
}

/// Abstraction layer for entity cache backends
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// concurrent caller, and the backend handle is opened lazily on the first
/// real operation.
///
/// # Error contract
///
/// - Unknown categories, disallowed filter fields, and invalid store batches
///   raise immediately (caller bugs)
/// - Backend read failures degrade to empty results inside the engine
/// - `semantic_search` is an optional capability: probe it with
///   [`supports_semantic_search`](Self::supports_semantic_search) instead of
///   relying on the `SemanticSearchUnsupported` error
#[async_trait]
pub trait EntityCache: Send + Sync {
    /// Short backend identifier used in logs and stats
    fn backend_name(&self) -> &'static str;

    /// Whether [`semantic_search`](Self::semantic_search) is available
    fn supports_semantic_search(&self) -> bool;

    /// Retrieve entities matching the given exact-match filters.
    ///
    /// An empty filter set returns everything in the category. Unrecognized
    /// filter fields are rejected with an error naming the bad field and the
    /// allowed set; backend failures degrade to an empty list.
    async fn get_entities(
        &self,
        category: &str,
        filters: &FilterMap,
    ) -> Result<Vec<EntityRecord>, CacheError>;

    /// Upsert entities by `slug`, returning the count actually stored.
    ///
    /// Engines differ deliberately on malformed input: the relational engine
    /// skips entities without a `slug` and accepts empty lists as a no-op;
    /// the vector engine rejects both before writing anything.
    async fn store_entities(
        &self,
        entities: &[EntityRecord],
        category: &str,
    ) -> Result<usize, CacheError>;

    /// Nearest-neighbor search over the category, restricted by the same
    /// filter semantics as [`get_entities`](Self::get_entities).
    ///
    /// Results carry their similarity under
    /// [`SIMILARITY_SCORE_FIELD`](crate::models::SIMILARITY_SCORE_FIELD) and
    /// are capped at `limit`. A blank query degrades to the plain filtered
    /// listing. Backends without the capability return
    /// [`CacheError::SemanticSearchUnsupported`].
    async fn semantic_search(
        &self,
        category: &str,
        query: &str,
        limit: usize,
        filters: &FilterMap,
    ) -> Result<Vec<EntityRecord>, CacheError>;

    /// Number of entities stored for a category (0 if none yet)
    async fn count_entities(&self, category: &str) -> Result<u64, CacheError>;

    /// Distinct `document` values across all categories, sorted
    async fn list_documents(&self) -> Result<Vec<String>, CacheError>;

    /// Entity counts per `document` value across all categories
    async fn document_counts(&self) -> Result<BTreeMap<String, u64>, CacheError>;

    /// Aggregate statistics (per-category counts, total, storage size)
    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Construct the configured cache backend.
///
/// Construction is cheap: no file is created and no model is loaded until
/// the first real operation.
pub fn create_entity_cache(config: &CacheConfig) -> Result<Arc<dyn EntityCache>, CacheError> {
    match config.backend {
        CacheBackend::Sqlite => {
            let db_path = config.data_dir.join("entities.db");
            tracing::info!("Entity cache backend: sqlite at {:?}", db_path);
            Ok(Arc::new(SqliteCacheEngine::new(db_path)))
        }
        CacheBackend::Lance => {
            let db_path = config.data_dir.join("lance");
            tracing::info!("Entity cache backend: lance at {:?}", db_path);
            let encoder = Arc::new(EmbeddingService::new(config.embedding.clone())?);
            Ok(Arc::new(LanceCacheEngine::new(db_path, encoder)))
        }
    }
}
