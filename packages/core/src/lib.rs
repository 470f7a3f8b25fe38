//! LoreSpace Core - Entity Cache and Repository Layer
//!
//! This crate provides the caching and aggregation core for tabletop-game
//! content: normalized entity records are stored in an embedded cache with
//! per-category indexed scalar fields and sentence embeddings, and served
//! through hybrid (scalar filter + vector similarity) lookups.
//!
//! # Architecture
//!
//! - **Entity records**: flat JSON maps keyed by a stable `slug`, persisted
//!   verbatim alongside a projection of their indexed fields
//! - **Schema registry**: one static entry per entity category declaring its
//!   indexed scalar fields
//! - **Pluggable backends**: an embedded relational engine (libsql) for exact
//!   filtering and an embedded vector engine (LanceDB) adding semantic search,
//!   behind one [`cache::EntityCache`] contract
//! - **Repositories**: cache-aside lookups per category (cache first, upstream
//!   on miss, store-back on success)
//!
//! # Modules
//!
//! - [`models`] - Entity record type and validation
//! - [`schema`] - Category registry and searchable-text projection
//! - [`cache`] - Cache contract, filter compiler, and both engines
//! - [`repository`] - Cache-aside lookup orchestration
//! - [`upstream`] - Upstream client boundary (trait + filter dialects)
//! - [`config`] - Backend selection and data-directory resolution

pub mod cache;
pub mod config;
pub mod models;
pub mod repository;
pub mod schema;
pub mod upstream;

// Re-export commonly used types
pub use cache::{create_entity_cache, CacheError, CacheStats, EntityCache};
pub use config::{CacheBackend, CacheConfig};
pub use models::EntityRecord;
