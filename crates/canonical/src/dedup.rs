use extract::{ConceptCandidate, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::EmbeddingCache;
use crate::cluster::{self, Linkage};
use crate::embedding::{Embedder, EmbeddingError, LexicalEmbedder};
use crate::similarity::{distance_matrix, similarity_matrix};
use crate::types::{CanonicalConcept, ConceptMapping};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Names at least this similar (cosine, 0–1) end up in one cluster.
    pub similarity_threshold: f32,
    pub linkage: Linkage,
    /// Above this many unique names a warning about the quadratic similarity
    /// matrix is logged. Nothing is truncated.
    pub large_input_warning: usize,
    /// Names per embedding request.
    pub batch_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.9,
            linkage: Linkage::Single,
            large_input_warning: 5000,
            batch_size: 64,
        }
    }
}

/// Which vectors the clustering ran on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Semantic(String),
    Lexical,
}

#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub concepts: Vec<CanonicalConcept>,
    /// Every input name to its cluster representative.
    pub mapping: ConceptMapping,
    pub backend: EmbeddingBackend,
}

/// Per-name aggregate over all mentions.
#[derive(Default)]
struct NameStats {
    importance_sum: u64,
    importance_max: u8,
    categories: BTreeMap<String, usize>,
    chunk_ids: BTreeSet<String>,
}

/// Clusters near-duplicate names by embedding similarity.
pub struct SemanticDeduplicator {
    embedder: Option<Arc<dyn Embedder>>,
    fallback: LexicalEmbedder,
    cache: EmbeddingCache,
    retry: RetryPolicy,
    config: DedupConfig,
}

impl SemanticDeduplicator {
    /// `embedder: None` runs on lexical vectors only.
    pub fn new(embedder: Option<Arc<dyn Embedder>>, config: DedupConfig) -> Self {
        Self {
            embedder,
            fallback: LexicalEmbedder::default(),
            cache: EmbeddingCache::new(50_000),
            retry: RetryPolicy::new(2, 500, 5000),
            config,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Collapse near-duplicate names into canonical concepts.
    ///
    /// Never fails: if the embedding backend is unavailable the clustering
    /// runs on lexical vectors instead. For a fixed backend and threshold the
    /// same input always yields the same clusters.
    pub async fn dedupe(&self, concepts: &[ConceptCandidate]) -> DedupOutcome {
        let stats = aggregate(concepts);
        let names: Vec<String> = stats.keys().cloned().collect();

        if names.is_empty() {
            return DedupOutcome {
                concepts: Vec::new(),
                mapping: ConceptMapping::new(),
                backend: self.backend_name(),
            };
        }

        if names.len() > self.config.large_input_warning {
            let matrix_mb = (names.len() * names.len() * 4 * 2) / (1024 * 1024);
            warn!(
                entities = names.len(),
                matrix_mb,
                "Pairwise similarity matrix is quadratic in entity count"
            );
        }

        let (vectors, backend) = self.embed_all(&names).await;
        let distances = distance_matrix(&similarity_matrix(&vectors));
        let threshold = 1.0 - self.config.similarity_threshold;
        let labels = cluster::agglomerative(&distances, threshold, self.config.linkage);

        let mut mapping = ConceptMapping::new();
        let mut canonical = Vec::new();

        for members in cluster::groups(&labels) {
            let member_names: Vec<&String> = members.iter().map(|&i| &names[i]).collect();
            let representative = pick_representative(&member_names, &stats);

            for name in &member_names {
                mapping.insert((*name).clone(), representative.clone());
            }
            canonical.push(build_concept(representative, &member_names, &stats));
        }

        canonical.sort_by(|a, b| a.canonical_name.cmp(&b.canonical_name));

        info!(
            unique_names = names.len(),
            clusters = canonical.len(),
            backend = ?backend,
            "Semantic deduplication complete"
        );

        DedupOutcome {
            concepts: canonical,
            mapping,
            backend,
        }
    }

    fn backend_name(&self) -> EmbeddingBackend {
        match &self.embedder {
            Some(embedder) => EmbeddingBackend::Semantic(embedder.name().to_string()),
            None => EmbeddingBackend::Lexical,
        }
    }

    /// Embed every name with one backend. Vectors from different backends
    /// are not comparable, so any semantic failure switches all names to
    /// lexical vectors.
    async fn embed_all(&self, names: &[String]) -> (Vec<Vec<f32>>, EmbeddingBackend) {
        if let Some(embedder) = &self.embedder {
            match self.embed_semantic(embedder.as_ref(), names).await {
                Ok(vectors) => {
                    return (vectors, EmbeddingBackend::Semantic(embedder.name().to_string()));
                }
                Err(e) => warn!(
                    backend = embedder.name(),
                    error = %e,
                    "Embedding backend unavailable, falling back to lexical similarity"
                ),
            }
        }

        let backend = self.fallback.name().to_string();
        let vectors = names
            .iter()
            .map(|name| {
                self.cache.get(&backend, name).unwrap_or_else(|| {
                    let vector = self.fallback.embed(name);
                    self.cache.set(&backend, name, vector.clone());
                    vector
                })
            })
            .collect();
        (vectors, EmbeddingBackend::Lexical)
    }

    async fn embed_semantic(
        &self,
        embedder: &dyn Embedder,
        names: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let backend = embedder.name();
        let missing: Vec<String> = names
            .iter()
            .filter(|name| self.cache.get(backend, name).is_none())
            .cloned()
            .collect();

        let mut fetched: BTreeMap<&str, Vec<f32>> = BTreeMap::new();
        for batch in missing.chunks(self.config.batch_size.max(1)) {
            let vectors = self
                .retry
                .retry("embed", || embedder.embed_batch(batch))
                .await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::Shape {
                    expected: batch.len(),
                    got: vectors.len(),
                });
            }
            for (name, vector) in batch.iter().zip(vectors) {
                fetched.insert(name.as_str(), vector);
            }
        }

        let mut vectors = Vec::with_capacity(names.len());
        for name in names {
            let vector = match fetched.remove(name.as_str()) {
                Some(vector) => vector,
                None => self
                    .cache
                    .get(backend, name)
                    .ok_or(EmbeddingError::Shape {
                        expected: names.len(),
                        got: vectors.len(),
                    })?,
            };
            vectors.push(vector);
        }

        let dims = vectors.first().map_or(0, Vec::len);
        if dims == 0 || vectors.iter().any(|v| v.len() != dims) {
            return Err(EmbeddingError::Dimension);
        }

        for (name, vector) in names.iter().zip(&vectors) {
            self.cache.set(backend, name, vector.clone());
        }
        Ok(vectors)
    }
}

fn aggregate(concepts: &[ConceptCandidate]) -> BTreeMap<String, NameStats> {
    let mut stats: BTreeMap<String, NameStats> = BTreeMap::new();
    for concept in concepts {
        let entry = stats.entry(concept.entity.clone()).or_default();
        entry.importance_sum += concept.importance as u64;
        entry.importance_max = entry.importance_max.max(concept.importance);
        *entry.categories.entry(concept.category.clone()).or_default() += 1;
        entry.chunk_ids.insert(concept.chunk_id.clone());
    }
    stats
}

/// Highest aggregated importance, then longer name, then smallest string.
fn pick_representative(members: &[&String], stats: &BTreeMap<String, NameStats>) -> String {
    let score = |name: &String| {
        let importance = stats.get(name).map_or(0, |s| s.importance_sum);
        (importance, name.chars().count())
    };

    let mut best = members[0];
    for &candidate in &members[1..] {
        let (a, b) = (score(candidate), score(best));
        if a > b || (a == b && candidate < best) {
            best = candidate;
        }
    }
    best.clone()
}

fn build_concept(
    canonical_name: String,
    members: &[&String],
    stats: &BTreeMap<String, NameStats>,
) -> CanonicalConcept {
    let mut importance = 0;
    let mut categories: BTreeMap<&str, usize> = BTreeMap::new();
    let mut chunk_ids = BTreeSet::new();

    for name in members {
        if let Some(s) = stats.get(*name) {
            importance = importance.max(s.importance_max);
            for (category, count) in &s.categories {
                *categories.entry(category.as_str()).or_default() += count;
            }
            chunk_ids.extend(s.chunk_ids.iter().cloned());
        }
    }

    // Mode; BTreeMap order makes the smallest category win ties.
    let category = categories
        .iter()
        .fold(None::<(&str, usize)>, |best, (&category, &count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((category, count)),
        })
        .map(|(category, _)| category.to_string())
        .unwrap_or_default();

    CanonicalConcept {
        canonical_name,
        importance,
        category,
        contributing_chunk_ids: chunk_ids,
        aliases: members.iter().map(|name| (*name).clone()).collect(),
    }
}
