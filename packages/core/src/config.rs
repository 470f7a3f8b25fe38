//! Cache Configuration
//!
//! Backend selection and storage-location resolution, decided once at process
//! configuration time. Environment variables override the defaults:
//!
//! - `LORESPACE_CACHE_BACKEND`: `"sqlite"` or `"lance"` (default `"lance"`)
//! - `LORESPACE_DATA_DIR`: cache storage directory
//!
//! The default directory is `~/.lorespace/cache`. Earlier releases stored
//! data under `~/.cache/lorespace`; that location is still honored for
//! existing installs (with a warning when both exist) so an upgrade never
//! silently abandons a populated cache.

use crate::cache::CacheError;
use lorespace_nlp_engine::EmbeddingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Which engine backs the entity cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheBackend {
    /// Embedded relational store: exact-match filtering only
    Sqlite,
    /// Embedded vector store: filtering plus semantic search (default)
    Lance,
}

impl CacheBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Lance => "lance",
        }
    }
}

impl FromStr for CacheBackend {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "lance" => Ok(Self::Lance),
            other => Err(CacheError::Config(format!(
                "Unknown cache backend '{}' (expected 'sqlite' or 'lance')",
                other
            ))),
        }
    }
}

/// Resolved cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Selected backend
    pub backend: CacheBackend,
    /// Directory holding the backend's storage files
    pub data_dir: PathBuf,
    /// Embedding service configuration (vector backend only)
    pub embedding: EmbeddingConfig,
}

impl CacheConfig {
    /// Explicit configuration, bypassing environment resolution. Used by
    /// tests and embedders that manage their own paths.
    pub fn with_dir(backend: CacheBackend, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            data_dir: data_dir.into(),
            embedding: EmbeddingConfig::default(),
        }
    }

    /// Resolve configuration from the environment.
    ///
    /// Backend: `LORESPACE_CACHE_BACKEND` env var, defaulting to lance.
    /// Data dir: `LORESPACE_DATA_DIR` env var, else the default location with
    /// a one-time legacy-path fallback check.
    pub fn resolve() -> Result<Self, CacheError> {
        let backend = match std::env::var("LORESPACE_CACHE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => CacheBackend::Lance,
        };

        let data_dir = match std::env::var("LORESPACE_DATA_DIR") {
            Ok(value) => PathBuf::from(value),
            Err(_) => Self::resolve_default_data_dir()?,
        };

        Ok(Self {
            backend,
            data_dir,
            embedding: EmbeddingConfig::default(),
        })
    }

    /// Pick between the current default location and the legacy one.
    ///
    /// Prefers `~/.lorespace/cache`; an existing `~/.cache/lorespace` is used
    /// only when the new location does not exist yet. When both exist the new
    /// location wins and a warning is logged so the stale copy gets cleaned
    /// up.
    fn resolve_default_data_dir() -> Result<PathBuf, CacheError> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| CacheError::Config("Cannot determine home directory".to_string()))?;

        let current = home_dir.join(".lorespace").join("cache");
        let legacy = home_dir.join(".cache").join("lorespace");

        if current.exists() {
            if legacy.exists() {
                tracing::warn!(
                    "Both {:?} and legacy {:?} exist; using {:?}. \
                     The legacy directory is no longer read and can be removed.",
                    current,
                    legacy,
                    current
                );
            }
            Ok(current)
        } else if legacy.exists() {
            tracing::warn!(
                "Using legacy cache directory {:?}; new installs use {:?}",
                legacy,
                current
            );
            Ok(legacy)
        } else {
            Ok(current)
        }
    }
}
