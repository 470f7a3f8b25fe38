/// Configuration for the embedding service
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which encoder implementation backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncoderProvider {
    /// ONNX sentence-transformer via fastembed (default)
    Onnx,
    /// Deterministic hashed token projection. No model files required;
    /// similarity reduces to token overlap. Used as the degraded mode when
    /// the ONNX model cannot be loaded, and pinned directly in tests.
    Hashed,
}

/// Configuration for the sentence-embedding model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name or identifier
    pub model_name: String,

    /// Encoder implementation to use
    pub provider: EncoderProvider,

    /// Directory where downloaded model files are kept
    pub model_cache_dir: Option<PathBuf>,

    /// Maximum cache size (number of embeddings to cache)
    pub cache_capacity: usize,

    /// Show model download progress on first use
    pub show_download_progress: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "BAAI/bge-small-en-v1.5".to_string(),
            provider: EncoderProvider::Onnx,
            model_cache_dir: None,
            cache_capacity: 10000,
            show_download_progress: false,
        }
    }
}

impl EmbeddingConfig {
    /// Configuration for the hashed encoder, which needs no model files.
    /// Intended for tests and offline environments.
    pub fn hashed() -> Self {
        Self {
            provider: EncoderProvider::Hashed,
            ..Self::default()
        }
    }

    /// Resolve the model cache directory, defaulting to ~/.lorespace/models/
    ///
    /// Uses the centralized data directory pattern (same as the entity cache):
    /// - macOS/Linux: ~/.lorespace/models/
    /// - Windows: %USERPROFILE%\.lorespace\models\
    pub fn resolve_model_cache_dir(&self) -> Result<PathBuf, std::io::Error> {
        if let Some(path) = &self.model_cache_dir {
            return Ok(path.clone());
        }

        let home_dir = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Cannot determine home directory",
            )
        })?;

        Ok(home_dir.join(".lorespace").join("models"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.model_name.is_empty() {
            return Err("model_name cannot be empty".to_string());
        }

        if self.cache_capacity == 0 {
            return Err("cache_capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.model_name, "BAAI/bge-small-en-v1.5");
        assert_eq!(config.provider, EncoderProvider::Onnx);
        assert_eq!(config.cache_capacity, 10000);
    }

    #[test]
    fn test_hashed_config() {
        let config = EmbeddingConfig::hashed();
        assert_eq!(config.provider, EncoderProvider::Hashed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EmbeddingConfig::default();
        assert!(config.validate().is_ok());

        config.model_name = String::new();
        assert!(config.validate().is_err());

        config.model_name = "test".to_string();
        config.cache_capacity = 0;
        assert!(config.validate().is_err());
    }
}
