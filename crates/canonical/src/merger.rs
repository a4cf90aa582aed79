use extract::RelationshipCandidate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::types::{CanonicalRelationship, ConceptMapping};

/// Parallel edges, keyed by directed endpoint pair.
#[derive(Default)]
struct EdgeAccumulator {
    labels: BTreeSet<String>,
    weight: f64,
    chunk_ids: BTreeSet<String>,
    provenance: BTreeSet<String>,
}

impl EdgeAccumulator {
    fn into_relationship(self, (node_1, node_2): (String, String)) -> CanonicalRelationship {
        CanonicalRelationship {
            node_1,
            node_2,
            edge_labels: self.labels,
            weight: self.weight,
            contributing_chunk_ids: self.chunk_ids,
            provenance: self.provenance,
        }
    }
}

/// Rewrite endpoints through `mapping`, drop self-loops, fold parallel edges
/// together and normalize weights.
///
/// Edges are directed: `(A, B)` and `(B, A)` stay separate.
pub fn merge(
    relationships: &[RelationshipCandidate],
    mapping: &ConceptMapping,
) -> Vec<CanonicalRelationship> {
    let mut edges: BTreeMap<(String, String), EdgeAccumulator> = BTreeMap::new();
    let mut self_loops = 0usize;

    for rel in relationships {
        let node_1 = mapping.resolve(&rel.node_1);
        let node_2 = mapping.resolve(&rel.node_2);
        if node_1 == node_2 {
            self_loops += 1;
            continue;
        }

        let acc = edges
            .entry((node_1.to_string(), node_2.to_string()))
            .or_default();
        acc.labels.insert(rel.edge.clone());
        acc.weight += rel.weight.max(0.0);
        acc.chunk_ids.insert(rel.chunk_id.clone());
        acc.provenance.insert(rel.provenance.clone());
    }

    debug!(
        input = relationships.len(),
        merged = edges.len(),
        self_loops,
        "Merged relationship candidates"
    );

    let mut merged: Vec<_> = edges
        .into_iter()
        .map(|(key, acc)| acc.into_relationship(key))
        .collect();
    normalize_weights(&mut merged);
    merged
}

/// Scale weights so the heaviest edge is exactly 1.0. A table whose weights
/// are all zero becomes uniform 1.0.
pub fn normalize_weights(relationships: &mut [CanonicalRelationship]) {
    let max = relationships
        .iter()
        .map(|r| r.weight)
        .filter(|w| w.is_finite())
        .fold(0.0f64, f64::max);

    for rel in relationships.iter_mut() {
        rel.weight = if max > 0.0 && rel.weight.is_finite() {
            (rel.weight / max).clamp(0.0, 1.0)
        } else {
            1.0
        };
    }
}
