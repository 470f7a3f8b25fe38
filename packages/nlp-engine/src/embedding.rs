/// Core embedding service using fastembed (ONNX sentence transformers)
///
/// Turns text into fixed-dimension float vectors, singly or batched. The
/// underlying model is loaded lazily on the first encode call and reused for
/// every subsequent call; results are cached in an LRU keyed by input text.
///
/// When the ONNX model cannot be loaded (offline machine, missing model
/// directory), the service degrades to a deterministic hashed token
/// projection so vector search keeps functioning on term overlap.
use crate::config::{EmbeddingConfig, EncoderProvider};
use crate::error::{EmbeddingError, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use lru::LruCache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Embedding vector dimension shared by the supported model family
/// (bge-small-en-v1.5, all-MiniLM-L6-v2, multilingual-e5-small).
pub const EMBEDDING_DIMENSION: usize = 384;

/// Encoder state behind the lazy-initialization guard
enum Encoder {
    Onnx(Box<TextEmbedding>),
    Hashed,
}

/// Main embedding service
///
/// Thread-safe: the encoder slot is guarded by a mutex (inference is
/// serialized, matching the single-session ONNX runtime), the LRU cache by
/// its own mutex so cache hits never wait on inference.
pub struct EmbeddingService {
    config: EmbeddingConfig,
    encoder: Mutex<Option<Encoder>>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingService {
    /// Create a new embedding service with the given configuration.
    ///
    /// Does NOT load the model; that happens on the first encode call.
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        config.validate().map_err(EmbeddingError::ConfigError)?;

        let cache_capacity = NonZeroUsize::new(config.cache_capacity)
            .ok_or_else(|| EmbeddingError::ConfigError("cache_capacity must be > 0".to_string()))?;

        Ok(Self {
            config,
            encoder: Mutex::new(None),
            cache: Mutex::new(LruCache::new(cache_capacity)),
        })
    }

    /// Generate an embedding for a single text.
    ///
    /// Deterministic: the same text always yields the same vector.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "Cannot generate embedding for empty text".to_string(),
            ));
        }

        {
            let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(cached) = cache.get(text) {
                return Ok(cached.clone());
            }
        }

        let embedding = self.embed_texts(vec![text])?.pop().ok_or_else(|| {
            EmbeddingError::InferenceError("Model returned no embedding".to_string())
        })?;

        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.put(text.to_string(), embedding.clone());

        Ok(embedding)
    }

    /// Generate embeddings for multiple texts in one model invocation.
    ///
    /// An empty input yields an empty output without touching the model.
    /// Numerically consistent with calling [`encode`](Self::encode) once per
    /// text; batching is purely a throughput optimization.
    pub fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(empty_idx) = texts.iter().position(|t| t.is_empty()) {
            return Err(EmbeddingError::InvalidInput(format!(
                "Cannot generate embedding for empty text (batch index {})",
                empty_idx
            )));
        }

        // Serve what we can from the cache, embed the rest in one call
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<usize> = Vec::new();
        {
            let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            for (i, text) in texts.iter().enumerate() {
                match cache.get(text) {
                    Some(cached) => results[i] = Some(cached.clone()),
                    None => misses.push(i),
                }
            }
        }

        if !misses.is_empty() {
            let miss_texts: Vec<&str> = misses.iter().map(|&i| texts[i].as_str()).collect();
            let embeddings = self.embed_texts(miss_texts)?;

            if embeddings.len() != misses.len() {
                return Err(EmbeddingError::InferenceError(format!(
                    "Model returned {} embeddings for {} inputs",
                    embeddings.len(),
                    misses.len()
                )));
            }

            let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            for (&i, embedding) in misses.iter().zip(embeddings) {
                cache.put(texts[i].clone(), embedding.clone());
                results[i] = Some(embedding);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// Get the embedding dimension
    pub fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }

    /// Whether the underlying encoder has been instantiated yet
    pub fn is_initialized(&self) -> bool {
        self.encoder
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    /// Get cache statistics (size, capacity)
    pub fn cache_stats(&self) -> (usize, usize) {
        let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        (cache.len(), cache.cap().get())
    }

    /// Clear the embedding cache
    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.clear();
    }

    /// Run inference, initializing the encoder on first use.
    ///
    /// The mutex doubles as the initialization guard: concurrent first calls
    /// block here and only one of them builds the model.
    fn embed_texts(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        let mut guard = self.encoder.lock().unwrap_or_else(|p| p.into_inner());

        if guard.is_none() {
            *guard = Some(self.build_encoder());
        }

        match guard.as_ref().expect("encoder initialized above") {
            Encoder::Onnx(model) => model
                .embed(texts, None)
                .map_err(|e| EmbeddingError::InferenceError(e.to_string())),
            Encoder::Hashed => Ok(texts.into_iter().map(hashed_embedding).collect()),
        }
    }

    /// Build the configured encoder, degrading to the hashed projection if
    /// the ONNX model cannot be loaded.
    fn build_encoder(&self) -> Encoder {
        match self.config.provider {
            EncoderProvider::Hashed => {
                tracing::info!("Using hashed token projection encoder");
                Encoder::Hashed
            }
            EncoderProvider::Onnx => match self.try_load_model() {
                Ok(model) => {
                    tracing::info!("Embedding model loaded: {}", self.config.model_name);
                    Encoder::Onnx(Box::new(model))
                }
                Err(e) => {
                    tracing::warn!(
                        "Embedding model unavailable, degrading to hashed projection: {}",
                        e
                    );
                    Encoder::Hashed
                }
            },
        }
    }

    fn try_load_model(&self) -> Result<TextEmbedding> {
        let model_name = model_from_name(&self.config.model_name)?;

        let mut options = InitOptions::new(model_name)
            .with_show_download_progress(self.config.show_download_progress);
        if let Ok(cache_dir) = self.config.resolve_model_cache_dir() {
            options = options.with_cache_dir(cache_dir);
        }

        TextEmbedding::try_new(options).map_err(|e| EmbeddingError::ModelLoadError(e.to_string()))
    }
}

/// Map a model identifier to the fastembed model enum.
///
/// Only 384-dimensional models are accepted; the cache schema has a fixed
/// vector width.
fn model_from_name(name: &str) -> Result<EmbeddingModel> {
    match name {
        "BAAI/bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "sentence-transformers/all-MiniLM-L6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "intfloat/multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
        other => Err(EmbeddingError::ConfigError(format!(
            "Unsupported embedding model '{}' (supported: BAAI/bge-small-en-v1.5, \
             sentence-transformers/all-MiniLM-L6-v2, intfloat/multilingual-e5-small)",
            other
        ))),
    }
}

/// Deterministic hashed token-frequency projection.
///
/// Tokens are lowercased alphanumeric runs; each token hashes to a signed
/// bucket and the result is L2-normalized. Token overlap between two texts
/// shows up as cosine similarity.
fn hashed_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIMENSION];

    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        token.to_lowercase().hash(&mut hasher);
        let h = hasher.finish();

        let bucket = (h % EMBEDDING_DIMENSION as u64) as usize;
        let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }

    normalize(&vector)
}

/// L2 normalize an embedding vector
fn normalize(input: &[f32]) -> Vec<f32> {
    let magnitude = input
        .iter()
        .fold(0.0f32, |acc, &val| val.mul_add(val, acc))
        .sqrt();

    if magnitude > 0.0 {
        input.iter().map(|&val| val / magnitude).collect()
    } else {
        input.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashed_service() -> EmbeddingService {
        EmbeddingService::new(EmbeddingConfig::hashed()).unwrap()
    }

    #[test]
    fn test_service_creation_is_lazy() {
        let service = hashed_service();
        assert!(!service.is_initialized());
    }

    #[test]
    fn test_encode_dimension() {
        let service = hashed_service();
        let embedding = service.encode("a red dragon breathes fire").unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIMENSION);
        assert!(service.is_initialized());
    }

    #[test]
    fn test_encode_deterministic() {
        let service = hashed_service();
        let first = service.encode("magic missile").unwrap();
        service.clear_cache();
        let second = service.encode("magic missile").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_encode_batch_consistent_with_encode() {
        let service = hashed_service();
        let single = service.encode("fireball").unwrap();

        service.clear_cache();
        let batch = service
            .encode_batch(&["fireball".to_string(), "ice storm".to_string()])
            .unwrap();
        assert_eq!(batch.len(), 2);
        for (a, b) in single.iter().zip(&batch[0]) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_encode_batch_empty_is_noop() {
        let service = hashed_service();
        let batch = service.encode_batch(&[]).unwrap();
        assert!(batch.is_empty());
        assert!(!service.is_initialized());
    }

    #[test]
    fn test_encode_empty_text_rejected() {
        let service = hashed_service();
        assert!(service.encode("").is_err());
        assert!(service
            .encode_batch(&["ok".to_string(), String::new()])
            .is_err());
    }

    #[test]
    fn test_overlapping_text_more_similar() {
        let service = hashed_service();
        let query = service.encode("fire protection flames").unwrap();
        let fire = service
            .encode("a shield of flames grants fire protection")
            .unwrap();
        let ice = service.encode("freezing hail and cold winds").unwrap();

        let sim = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        assert!(sim(&query, &fire) > sim(&query, &ice));
    }

    #[test]
    fn test_cache_stats() {
        let service = hashed_service();
        let (len, capacity) = service.cache_stats();
        assert_eq!(len, 0);
        assert!(capacity > 0);

        service.encode("goblin").unwrap();
        let (len, _) = service.cache_stats();
        assert_eq!(len, 1);
    }

    #[test]
    fn test_normalize() {
        let normalized = normalize(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);

        let magnitude: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let normalized = normalize(&[0.0, 0.0, 0.0]);
        assert!(normalized.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_unsupported_model_name() {
        assert!(model_from_name("BAAI/bge-large-en-v1.5").is_err());
        assert!(model_from_name("BAAI/bge-small-en-v1.5").is_ok());
    }
}
