pub mod config;
pub mod driver;
pub mod export;
pub mod metrics;

pub use config::{AppConfig, ConfigError, OperationMode};
pub use driver::{PipelineDriver, RunReport};
pub use metrics::{MetricsSnapshot, RunMetrics};

use anyhow::{Context, Result};
use canonical::{
    CanonicalResolver, Canonicalizer, Embedder, EmbeddingCache, OllamaEmbedder,
    SemanticDeduplicator,
};
use extract::{Extractor, GenerationOptions, OllamaClient, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

impl AppConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms,
        )
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.service.request_timeout_secs)
    }
}

/// Extraction client talking to the configured generation service.
pub fn build_extractor(config: &AppConfig) -> Result<Extractor> {
    let client = OllamaClient::new(
        config.service.base_url.clone(),
        config.service.model.clone(),
        config.request_timeout(),
    )
    .context("Failed to build generation client")?;

    let mut extractor = Extractor::new(Arc::new(client), config.retry_policy())
        .with_malformed_attempts(config.retry.malformed_attempts)
        .with_options(GenerationOptions {
            temperature: config.service.temperature,
            num_ctx: config.service.num_ctx,
        });
    if let Some(weight) = config.extract.proximity_weight {
        extractor = extractor.with_proximity_edges(weight);
    }
    Ok(extractor)
}

/// Resolver, deduplicator and filter wired from config. Configured aliases
/// override the built-in table. Without an embedding model the
/// deduplicator uses lexical similarity.
pub fn build_canonicalizer(config: &AppConfig) -> Result<Canonicalizer> {
    let embedder: Option<Arc<dyn Embedder>> = match &config.service.embedding_model {
        Some(model) => Some(Arc::new(
            OllamaEmbedder::new(
                config.service.base_url.clone(),
                model.clone(),
                config.request_timeout(),
            )
            .context("Failed to build embedding client")?,
        )),
        None => None,
    };

    let deduplicator = SemanticDeduplicator::new(embedder, config.dedup.clone())
        .with_cache(EmbeddingCache::new(config.cache.max_entries))
        .with_retry(config.retry_policy());

    let mut resolver = CanonicalResolver::new();
    for (alias, canonical) in &config.aliases {
        resolver.register_alias(alias, canonical);
    }

    Ok(Canonicalizer::new(
        resolver,
        deduplicator,
        config.filter.clone(),
    ))
}
