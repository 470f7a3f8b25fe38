//! Cache Error Types
//!
//! Two families per the layer's error taxonomy: programmer/configuration
//! errors (unknown category, disallowed filter field, empty batch to the
//! vector engine) are raised immediately; backend/transient failures are
//! wrapped in [`CacheError::Backend`] and degraded to empty results at the
//! engine boundary, never propagated past it.

use thiserror::Error;

/// Cache operation errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Category is absent from the schema registry
    #[error("Unknown entity category: '{0}'")]
    UnknownCategory(String),

    /// Filter field is not in the category's indexed allow-list
    #[error("Unknown filter field '{field}' for category '{category}' (allowed: {allowed})")]
    UnknownFilterField {
        category: String,
        field: String,
        allowed: String,
    },

    /// Empty entity list passed to an engine that forbids it
    #[error("Cannot store an empty entity list for category '{0}'")]
    EmptyEntityList(String),

    /// An entity failed store-time validation
    #[error("Invalid entity at index {index}: {reason}")]
    InvalidEntity { index: usize, reason: String },

    /// The backend has no semantic search capability
    #[error("Semantic search is not supported by the {0} backend")]
    SemanticSearchUnsupported(&'static str),

    /// Backend connection/query failure (degraded at the engine boundary)
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// Embedding computation failed
    #[error("Embedding error: {0}")]
    Embedding(#[from] lorespace_nlp_engine::EmbeddingError),

    /// Invalid cache configuration
    #[error("Invalid cache configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Create a backend error with context
    pub fn backend(context: impl Into<String>) -> Self {
        Self::Backend(context.into())
    }

    /// Create an unknown-filter-field error listing the allowed set
    pub fn unknown_filter_field(category: &str, field: &str, allowed: &[&str]) -> Self {
        Self::UnknownFilterField {
            category: category.to_string(),
            field: field.to_string(),
            allowed: allowed.join(", "),
        }
    }
}
