//! Canonicalization of extracted candidates.
//!
//! Rule-based alias resolution runs first, then embedding-based
//! deduplication of whatever names remain, then relationship merging through
//! the combined mapping and finally importance filtering.

pub mod cache;
pub mod cluster;
pub mod dedup;
pub mod embedding;
pub mod filter;
pub mod merger;
pub mod resolver;
pub mod similarity;
pub mod types;

pub use cache::EmbeddingCache;
pub use cluster::Linkage;
pub use dedup::{DedupConfig, DedupOutcome, EmbeddingBackend, SemanticDeduplicator};
pub use embedding::{Embedder, EmbeddingError, LexicalEmbedder, OllamaEmbedder};
pub use filter::{FilterConfig, FilterStats};
pub use resolver::{AliasRule, CanonicalResolver};
pub use types::{CanonicalConcept, CanonicalRelationship, ConceptMapping};

use extract::{ConceptCandidate, RelationshipCandidate};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct CanonicalStats {
    pub input_concepts: usize,
    pub input_relationships: usize,
    pub unique_names: usize,
    pub resolved_by_rules: usize,
    pub merged_by_similarity: usize,
    pub embedding_backend: EmbeddingBackend,
    pub filter: FilterStats,
}

/// The final deduplicated dataset.
#[derive(Debug, Clone)]
pub struct CanonicalDataset {
    pub concepts: Vec<CanonicalConcept>,
    pub relationships: Vec<CanonicalRelationship>,
    /// Observed name to canonical name, for every name in the input.
    pub mapping: ConceptMapping,
    pub stats: CanonicalStats,
}

pub struct Canonicalizer {
    resolver: CanonicalResolver,
    deduplicator: SemanticDeduplicator,
    filter: FilterConfig,
}

impl Canonicalizer {
    pub fn new(
        resolver: CanonicalResolver,
        deduplicator: SemanticDeduplicator,
        filter: FilterConfig,
    ) -> Self {
        Self {
            resolver,
            deduplicator,
            filter,
        }
    }

    pub async fn run(
        &self,
        concepts: &[ConceptCandidate],
        relationships: &[RelationshipCandidate],
    ) -> CanonicalDataset {
        // Relationship endpoints are resolved too so that the mapping covers
        // every observed name.
        let names = concepts
            .iter()
            .map(|c| c.entity.as_str())
            .chain(relationships.iter().flat_map(|r| [r.node_1.as_str(), r.node_2.as_str()]));
        let rule_mapping = self.resolver.batch_resolve(names);

        let resolved: Vec<ConceptCandidate> = concepts
            .iter()
            .map(|c| ConceptCandidate {
                entity: rule_mapping.resolve(&c.entity).to_string(),
                ..c.clone()
            })
            .collect();

        let outcome = self.deduplicator.dedupe(&resolved).await;
        let mapping = rule_mapping.then(&outcome.mapping);

        let merged = merger::merge(relationships, &mapping);
        let (concepts_out, relationships_out, filter_stats) =
            filter::filter(outcome.concepts, merged, &self.filter);

        let stats = CanonicalStats {
            input_concepts: concepts.len(),
            input_relationships: relationships.len(),
            unique_names: mapping.len(),
            resolved_by_rules: rule_mapping.renamed(),
            merged_by_similarity: outcome.mapping.renamed(),
            embedding_backend: outcome.backend,
            filter: filter_stats,
        };

        info!(
            concepts = concepts_out.len(),
            relationships = relationships_out.len(),
            resolved_by_rules = stats.resolved_by_rules,
            merged_by_similarity = stats.merged_by_similarity,
            "Canonicalization complete"
        );

        CanonicalDataset {
            concepts: concepts_out,
            relationships: relationships_out,
            mapping,
            stats,
        }
    }
}
