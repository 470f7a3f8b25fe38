/// LoreSpace NLP Engine - Sentence Embedding Service
///
/// This crate provides the text-to-vector encoding used by the entity cache's
/// semantic search: fixed 384-dimension sentence embeddings via fastembed
/// (ONNX), lazily loaded on first use and fronted by an LRU cache.
///
/// # Example
///
/// ```ignore
/// use lorespace_nlp_engine::{EmbeddingConfig, EmbeddingService};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = EmbeddingService::new(EmbeddingConfig::default())?;
///
///     let embedding = service.encode("a sphere of roaring flame")?;
///     println!("Embedding dimension: {}", embedding.len()); // 384
///
///     Ok(())
/// }
/// ```
pub mod config;
pub mod embedding;
pub mod error;

// Re-export main types
pub use config::{EmbeddingConfig, EncoderProvider};
pub use embedding::{EmbeddingService, EMBEDDING_DIMENSION};
pub use error::{EmbeddingError, Result};
