use canonical::{DedupConfig, FilterConfig, Linkage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("similarity threshold must be within [0, 1], got {0}")]
    SimilarityThreshold(f32),

    #[error("minimum importance must be within 1..=5, got {0}")]
    MinImportance(u8),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("model name must not be empty")]
    EmptyModel,

    #[error("service url must start with http:// or https://, got {0:?}")]
    ServiceUrl(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub service: ServiceConfig,
    pub retry: RetryConfig,
    pub concurrency: ConcurrencyConfig,
    pub checkpoint: CheckpointConfig,
    pub extract: ExtractConfig,
    pub cache: CacheConfig,
    pub dedup: DedupConfig,
    pub filter: FilterConfig,
    /// Extra alias -> canonical name rules, applied over the built-in table.
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,      // Short timeouts, more parallel calls, looser clustering
    Accurate,  // Patient retries, sequential, strict clustering
    Balanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    pub model: String,
    /// Semantic embeddings for deduplication. `None` uses lexical similarity.
    pub embedding_model: Option<String>,
    pub request_timeout_secs: u64,
    pub temperature: f32,
    pub num_ctx: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Responses requested before a chunk with non-conforming output is skipped.
    pub malformed_attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_concurrent_extractions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub dir: PathBuf,
    /// Take a full snapshot every this many recorded chunks.
    pub snapshot_interval: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Link co-occurring concepts at this weight.
    pub proximity_weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            service: ServiceConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "llama3.1:8b".to_string(),
                embedding_model: None,
                request_timeout_secs: 300,
                temperature: 0.0,
                num_ctx: None,
            },
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 1000,
                max_backoff_ms: 10000,
                malformed_attempts: 3,
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_extractions: 1,
            },
            checkpoint: CheckpointConfig {
                dir: PathBuf::from("data/checkpoint"),
                snapshot_interval: 50,
            },
            extract: ExtractConfig::default(),
            cache: CacheConfig { max_entries: 10000 },
            dedup: DedupConfig::default(),
            filter: FilterConfig::default(),
            aliases: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    pub fn fast_mode() -> Self {
        let defaults = Self::default();
        Self {
            mode: OperationMode::Fast,
            service: ServiceConfig {
                request_timeout_secs: 120,
                ..defaults.service
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
                malformed_attempts: 2,
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_extractions: 4,
            },
            cache: CacheConfig { max_entries: 50000 },
            dedup: DedupConfig {
                similarity_threshold: 0.85,
                ..defaults.dedup
            },
            ..defaults
        }
    }

    pub fn accurate_mode() -> Self {
        let defaults = Self::default();
        Self {
            mode: OperationMode::Accurate,
            service: ServiceConfig {
                request_timeout_secs: 600,
                ..defaults.service
            },
            retry: RetryConfig {
                max_retries: 5,
                initial_backoff_ms: 2000,
                max_backoff_ms: 20000,
                malformed_attempts: 4,
            },
            checkpoint: CheckpointConfig {
                snapshot_interval: 20,
                ..defaults.checkpoint
            },
            dedup: DedupConfig {
                similarity_threshold: 0.93,
                linkage: Linkage::Single,
                ..defaults.dedup
            },
            ..defaults
        }
    }

    pub fn for_mode(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Fast => Self::fast_mode(),
            OperationMode::Accurate => Self::accurate_mode(),
            OperationMode::Balanced => Self::default(),
        }
    }

    /// Read a JSON config file. Missing sections take their defaults.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.dedup.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::SimilarityThreshold(threshold));
        }
        if !(1..=5).contains(&self.filter.min_importance) {
            return Err(ConfigError::MinImportance(self.filter.min_importance));
        }
        if self.service.request_timeout_secs == 0 {
            return Err(ConfigError::Zero("service.request_timeout_secs"));
        }
        if self.checkpoint.snapshot_interval == 0 {
            return Err(ConfigError::Zero("checkpoint.snapshot_interval"));
        }
        if self.concurrency.max_concurrent_extractions == 0 {
            return Err(ConfigError::Zero("concurrency.max_concurrent_extractions"));
        }
        if self.retry.malformed_attempts == 0 {
            return Err(ConfigError::Zero("retry.malformed_attempts"));
        }
        if self.dedup.batch_size == 0 {
            return Err(ConfigError::Zero("dedup.batch_size"));
        }
        if self.service.model.trim().is_empty() {
            return Err(ConfigError::EmptyModel);
        }
        let url = self.service.base_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ServiceUrl(url.to_string()));
        }
        Ok(())
    }
}
