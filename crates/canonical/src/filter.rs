use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::info;

use crate::merger::normalize_weights;
use crate::types::{CanonicalConcept, CanonicalRelationship};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub min_importance: u8,
    pub min_connections: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_importance: 1,
            min_connections: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FilterStats {
    pub removed_low_importance: usize,
    pub removed_unconnected: usize,
    pub removed_relationships: usize,
}

/// Prune low-value concepts, then every relationship that lost an endpoint.
///
/// Importance goes first. Connections are counted over relationships whose
/// endpoints both passed the importance cut. Surviving weights are
/// renormalized so the heaviest edge stays at 1.0.
pub fn filter(
    concepts: Vec<CanonicalConcept>,
    relationships: Vec<CanonicalRelationship>,
    config: &FilterConfig,
) -> (Vec<CanonicalConcept>, Vec<CanonicalRelationship>, FilterStats) {
    let mut stats = FilterStats::default();

    let input = concepts.len();
    let important: Vec<CanonicalConcept> = concepts
        .into_iter()
        .filter(|c| c.importance >= config.min_importance)
        .collect();
    stats.removed_low_importance = input - important.len();

    let important_names: BTreeSet<&str> =
        important.iter().map(|c| c.canonical_name.as_str()).collect();

    let mut degree: HashMap<&str, usize> = HashMap::new();
    for rel in &relationships {
        if important_names.contains(rel.node_1.as_str())
            && important_names.contains(rel.node_2.as_str())
        {
            *degree.entry(rel.node_1.as_str()).or_default() += 1;
            *degree.entry(rel.node_2.as_str()).or_default() += 1;
        }
    }

    let kept: BTreeSet<String> = important
        .iter()
        .filter(|c| {
            degree.get(c.canonical_name.as_str()).copied().unwrap_or(0) >= config.min_connections
        })
        .map(|c| c.canonical_name.clone())
        .collect();
    stats.removed_unconnected = important.len() - kept.len();

    let concepts: Vec<CanonicalConcept> = important
        .into_iter()
        .filter(|c| kept.contains(&c.canonical_name))
        .collect();

    let input = relationships.len();
    let mut relationships: Vec<CanonicalRelationship> = relationships
        .into_iter()
        .filter(|r| kept.contains(&r.node_1) && kept.contains(&r.node_2))
        .collect();
    stats.removed_relationships = input - relationships.len();
    normalize_weights(&mut relationships);

    info!(
        concepts = concepts.len(),
        relationships = relationships.len(),
        removed_low_importance = stats.removed_low_importance,
        removed_unconnected = stats.removed_unconnected,
        "Importance filter applied"
    );

    (concepts, relationships, stats)
}
