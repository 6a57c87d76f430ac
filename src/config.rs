//! Environment-driven runtime configuration.
//!
//! All knobs read from `CHUNKMILL_*` variables with defaults, so a bare
//! environment yields a working local setup. The loaded value is passed
//! explicitly to the components that need it rather than cached in a global.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::chunking::ChunkingConfig;
use crate::embedding::RetryPolicy;
use crate::store::SearchConfig;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("invalid value for environment variable {0}")]
    InvalidValue(String),
    /// A parsed value violates a cross-field constraint.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration for the ingestion engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path of the SQLite database file.
    pub database_path: PathBuf,
    /// Maximum chunk window in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Documents processed concurrently by a batch run.
    pub batch_workers: usize,
    /// Embedding provider calls allowed in flight at once.
    pub embed_concurrency: usize,
    /// Attempts per chunk before an embedding is declared failed.
    pub embed_max_retries: u32,
    /// Base backoff between embedding retries, in milliseconds.
    pub embed_backoff_ms: u64,
    /// Per-call embedding deadline, in seconds.
    pub embed_timeout_secs: u64,
    /// BM25 term-frequency saturation parameter.
    pub search_k1: f64,
    /// BM25 length-normalization parameter.
    pub search_b: f64,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Dimensionality of produced vectors.
    pub embedding_dimension: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("chunkmill.db"),
            chunk_size: 1000,
            chunk_overlap: 200,
            batch_workers: 4,
            embed_concurrency: 4,
            embed_max_retries: 3,
            embed_backoff_ms: 200,
            embed_timeout_secs: 30,
            search_k1: 1.2,
            search_b: 0.75,
            embedding_model: "hashing-v1".to_string(),
            embedding_dimension: 384,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `CHUNKMILL_*` environment variables.
    ///
    /// Unset variables fall back to the defaults; set but unparseable values
    /// are an error rather than a silent fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            database_path: load_env("CHUNKMILL_DATABASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            chunk_size: load_parsed("CHUNKMILL_CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: load_parsed("CHUNKMILL_CHUNK_OVERLAP", defaults.chunk_overlap)?,
            batch_workers: load_parsed("CHUNKMILL_BATCH_WORKERS", defaults.batch_workers)?,
            embed_concurrency: load_parsed(
                "CHUNKMILL_EMBED_CONCURRENCY",
                defaults.embed_concurrency,
            )?,
            embed_max_retries: load_parsed(
                "CHUNKMILL_EMBED_MAX_RETRIES",
                defaults.embed_max_retries,
            )?,
            embed_backoff_ms: load_parsed("CHUNKMILL_EMBED_BACKOFF_MS", defaults.embed_backoff_ms)?,
            embed_timeout_secs: load_parsed(
                "CHUNKMILL_EMBED_TIMEOUT_SECS",
                defaults.embed_timeout_secs,
            )?,
            search_k1: load_parsed("CHUNKMILL_SEARCH_K1", defaults.search_k1)?,
            search_b: load_parsed("CHUNKMILL_SEARCH_B", defaults.search_b)?,
            embedding_model: load_env("CHUNKMILL_EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            embedding_dimension: load_parsed(
                "CHUNKMILL_EMBEDDING_DIMENSION",
                defaults.embedding_dimension,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation applied after loading.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking()
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if self.batch_workers == 0 {
            return Err(ConfigError::Invalid(
                "CHUNKMILL_BATCH_WORKERS must be at least 1".to_string(),
            ));
        }
        if self.embed_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "CHUNKMILL_EMBED_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::Invalid(
                "CHUNKMILL_EMBEDDING_DIMENSION must be at least 1".to_string(),
            ));
        }
        if !(self.search_k1 > 0.0) || !(0.0..=1.0).contains(&self.search_b) {
            return Err(ConfigError::Invalid(
                "search parameters require k1 > 0 and 0 <= b <= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Chunking window derived from this configuration.
    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }

    /// BM25 parameters derived from this configuration.
    pub fn search(&self) -> SearchConfig {
        SearchConfig {
            k1: self.search_k1,
            b: self.search_b,
        }
    }

    /// Embedding retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.embed_max_retries,
            backoff: Duration::from_millis(self.embed_backoff_ms),
            timeout: Duration::from_secs(self.embed_timeout_secs),
        }
    }
}

fn load_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
    }

    #[test]
    fn overlap_at_chunk_size_is_rejected() {
        let config = EngineConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = EngineConfig {
            batch_workers: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_b_is_rejected() {
        let config = EngineConfig {
            search_b: 1.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_policy_reflects_settings() {
        let config = EngineConfig {
            embed_max_retries: 5,
            embed_backoff_ms: 50,
            embed_timeout_secs: 7,
            ..EngineConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff, Duration::from_millis(50));
        assert_eq!(policy.timeout, Duration::from_secs(7));
    }
}
