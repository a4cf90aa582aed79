use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalConcept {
    pub canonical_name: String,
    /// Highest importance any mention in the cluster was given.
    pub importance: u8,
    /// Most frequent category across the cluster's mentions.
    pub category: String,
    pub contributing_chunk_ids: BTreeSet<String>,
    /// Every observed name that maps to `canonical_name`.
    pub aliases: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRelationship {
    pub node_1: String,
    pub node_2: String,
    pub edge_labels: BTreeSet<String>,
    /// In `[0, 1]`; the heaviest edge of a normalized table is exactly 1.0.
    pub weight: f64,
    pub contributing_chunk_ids: BTreeSet<String>,
    pub provenance: BTreeSet<String>,
}

/// Map from observed entity name to canonical name.
///
/// Names without an entry map to themselves, which keeps the mapping total
/// over any input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptMapping(BTreeMap<String, String>);

impl ConceptMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, canonical: impl Into<String>) {
        self.0.insert(name.into(), canonical.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.get(name).unwrap_or(name)
    }

    /// Apply `self`, then `next`.
    pub fn then(&self, next: &ConceptMapping) -> ConceptMapping {
        let mut composed = BTreeMap::new();
        for (name, canonical) in &self.0 {
            composed.insert(name.clone(), next.resolve(canonical).to_string());
        }
        for (name, canonical) in &next.0 {
            composed
                .entry(name.clone())
                .or_insert_with(|| canonical.clone());
        }
        ConceptMapping(composed)
    }

    /// True when every entry maps a name to itself.
    pub fn is_identity(&self) -> bool {
        self.0.iter().all(|(name, canonical)| name == canonical)
    }

    /// Number of names mapped to something other than themselves.
    pub fn renamed(&self) -> usize {
        self.0.iter().filter(|(name, canonical)| name != canonical).count()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for ConceptMapping {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        ConceptMapping(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmapped_names_resolve_to_themselves() {
        let mapping = ConceptMapping::new();
        assert_eq!(mapping.resolve("anything"), "anything");
    }

    #[test]
    fn test_composition() {
        let first: ConceptMapping = [("a", "b"), ("x", "x")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let second: ConceptMapping = [("b", "c"), ("y", "z")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let composed = first.then(&second);
        assert_eq!(composed.resolve("a"), "c");
        assert_eq!(composed.resolve("x"), "x");
        assert_eq!(composed.resolve("y"), "z");
        assert_eq!(composed.renamed(), 2);
        assert!(!composed.is_identity());
    }
}
