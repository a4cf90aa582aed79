use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::ExtractionError;

/// Provenance tag for relationships the service extracted.
pub const PROVENANCE_LLM: &str = "llm";
/// Provenance tag for co-occurrence edges added after extraction.
pub const PROVENANCE_PROXIMITY: &str = "proximity";
pub const PROXIMITY_EDGE: &str = "contextual proximity";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptCandidate {
    pub entity: String,
    pub importance: u8,
    pub category: String,
    pub chunk_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipCandidate {
    pub node_1: String,
    pub node_2: String,
    pub edge: String,
    pub weight: f64,
    pub chunk_id: String,
    pub provenance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub chunk_id: String,
    pub concepts: Vec<ConceptCandidate>,
    pub relationships: Vec<RelationshipCandidate>,
    /// Fraction of returned items that passed validation.
    pub confidence: f64,
}

// Wire shapes. Items are kept as raw values so one bad item does not sink
// the whole payload.
#[derive(Deserialize)]
struct RawPayload {
    concepts: Vec<serde_json::Value>,
    relationships: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawConcept {
    entity: String,
    importance: u8,
    category: String,
}

#[derive(Deserialize)]
struct RawRelationship {
    node_1: String,
    node_2: String,
    edge: String,
    #[serde(default)]
    weight: Option<f64>,
}

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Validate a free-form service response against the extraction schema.
///
/// Top-level shape violations fail the whole response. Individual items that
/// violate the schema are dropped, never repaired; if every item was dropped
/// the response counts as malformed.
pub fn parse_payload(chunk_id: &str, raw: &str) -> Result<ExtractionResult, ExtractionError> {
    let json = locate_json_object(raw)
        .ok_or_else(|| ExtractionError::malformed("no JSON object in response", raw))?;

    let payload: RawPayload = serde_json::from_str(json)
        .map_err(|e| ExtractionError::malformed(format!("schema violation: {}", e), raw))?;

    let total = payload.concepts.len() + payload.relationships.len();

    let concepts: Vec<ConceptCandidate> = payload
        .concepts
        .into_iter()
        .filter_map(|value| validate_concept(chunk_id, value))
        .collect();

    let relationships: Vec<RelationshipCandidate> = payload
        .relationships
        .into_iter()
        .filter_map(|value| validate_relationship(chunk_id, value))
        .collect();

    let valid = concepts.len() + relationships.len();
    if total > 0 && valid == 0 {
        return Err(ExtractionError::malformed(
            format!("none of {} items matched the schema", total),
            raw,
        ));
    }
    if valid < total {
        tracing::debug!(chunk_id, dropped = total - valid, "Dropped invalid extraction items");
    }

    let confidence = if total == 0 {
        1.0
    } else {
        valid as f64 / total as f64
    };

    Ok(ExtractionResult {
        chunk_id: chunk_id.to_string(),
        concepts,
        relationships,
        confidence,
    })
}

/// Find the JSON object in a response that may wrap it in prose or fences.
fn locate_json_object(raw: &str) -> Option<&str> {
    if let Some(captures) = FENCED_BLOCK.captures(raw) {
        return captures.get(1).map(|m| m.as_str());
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

pub(crate) fn clean_name(name: &str) -> String {
    WHITESPACE.replace_all(name.trim(), " ").to_string()
}

fn validate_concept(chunk_id: &str, value: serde_json::Value) -> Option<ConceptCandidate> {
    let raw: RawConcept = serde_json::from_value(value).ok()?;
    let entity = clean_name(&raw.entity);
    let category = clean_name(&raw.category);

    if entity.is_empty() || category.is_empty() || !(1..=5).contains(&raw.importance) {
        return None;
    }

    Some(ConceptCandidate {
        entity,
        importance: raw.importance,
        category,
        chunk_id: chunk_id.to_string(),
    })
}

fn validate_relationship(chunk_id: &str, value: serde_json::Value) -> Option<RelationshipCandidate> {
    let raw: RawRelationship = serde_json::from_value(value).ok()?;
    let node_1 = clean_name(&raw.node_1);
    let node_2 = clean_name(&raw.node_2);
    let edge = clean_name(&raw.edge);
    let weight = raw.weight.unwrap_or(1.0);

    if node_1.is_empty() || node_2.is_empty() || edge.is_empty() || node_1 == node_2 {
        return None;
    }
    if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
        return None;
    }

    Some(RelationshipCandidate {
        node_1,
        node_2,
        edge,
        weight,
        chunk_id: chunk_id.to_string(),
        provenance: PROVENANCE_LLM.to_string(),
    })
}

impl ExtractionResult {
    /// Link every pair of distinct concepts mentioned in this chunk.
    pub fn add_proximity_edges(&mut self, weight: f64) {
        let mut names: Vec<&str> = self.concepts.iter().map(|c| c.entity.as_str()).collect();
        names.sort_unstable();
        names.dedup();

        let mut edges = Vec::new();
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                edges.push(RelationshipCandidate {
                    node_1: a.to_string(),
                    node_2: b.to_string(),
                    edge: PROXIMITY_EDGE.to_string(),
                    weight,
                    chunk_id: self.chunk_id.clone(),
                    provenance: PROVENANCE_PROXIMITY.to_string(),
                });
            }
        }
        self.relationships.extend(edges);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const VALID: &str = r#"{
        "concepts": [
            {"entity": "松材线虫", "importance": 5, "category": "pathogen"},
            {"entity": "  Pinus   massoniana ", "importance": 3, "category": "host"}
        ],
        "relationships": [
            {"node_1": "松材线虫", "node_2": "Pinus massoniana", "edge": "infects"}
        ]
    }"#;

    #[test]
    fn test_parse_valid_payload() {
        let result = parse_payload("doc1_0", VALID).unwrap();

        assert_eq!(result.concepts.len(), 2);
        assert_eq!(result.concepts[1].entity, "Pinus massoniana");
        assert_eq!(result.relationships[0].weight, 1.0);
        assert_eq!(result.relationships[0].provenance, PROVENANCE_LLM);
        assert_eq!(result.relationships[0].chunk_id, "doc1_0");
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_parse_fenced_payload_with_prose() {
        let raw = format!("Here is the result:\n```json\n{}\n```\nDone.", VALID);
        let result = parse_payload("doc1_0", &raw).unwrap();
        assert_eq!(result.concepts.len(), 2);
    }

    #[test]
    fn test_invalid_items_dropped_not_coerced() {
        let raw = r#"{
            "concepts": [
                {"entity": "A", "importance": 9, "category": "x"},
                {"entity": "B", "importance": "high", "category": "x"},
                {"entity": "C", "importance": 2, "category": "x"}
            ],
            "relationships": [
                {"node_1": "C", "node_2": "C", "edge": "self"}
            ]
        }"#;
        let result = parse_payload("c", raw).unwrap();

        assert_eq!(result.concepts.len(), 1);
        assert_eq!(result.concepts[0].entity, "C");
        assert!(result.relationships.is_empty());
        assert_eq!(result.confidence, 0.25);
    }

    #[test]
    fn test_missing_section_is_malformed() {
        let err = parse_payload("c", r#"{"concepts": []}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_not_json_is_malformed() {
        let err = parse_payload("c", "I cannot help with that.").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_all_items_invalid_is_malformed() {
        let raw = r#"{"concepts": [{"entity": ""}], "relationships": []}"#;
        assert!(parse_payload("c", raw).is_err());
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let result = parse_payload("c", r#"{"concepts": [], "relationships": []}"#).unwrap();
        assert!(result.concepts.is_empty());
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_out_of_range_weight_dropped() {
        let raw = r#"{"concepts": [], "relationships": [
            {"node_1": "A", "node_2": "B", "edge": "e", "weight": 1.5},
            {"node_1": "A", "node_2": "B", "edge": "e", "weight": 0.4}
        ]}"#;
        let result = parse_payload("c", raw).unwrap();
        assert_eq!(result.relationships.len(), 1);
        assert_eq!(result.relationships[0].weight, 0.4);
    }

    #[test]
    fn test_proximity_edges() {
        let mut result = parse_payload("doc1_0", VALID).unwrap();
        result.add_proximity_edges(0.25);

        let proximity: Vec<_> = result
            .relationships
            .iter()
            .filter(|r| r.provenance == PROVENANCE_PROXIMITY)
            .collect();
        assert_eq!(proximity.len(), 1);
        assert_eq!(proximity[0].node_1, "Pinus massoniana");
        assert_eq!(proximity[0].weight, 0.25);
    }
}
