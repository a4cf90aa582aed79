use anyhow::{Context, Result};
use canonical::{CanonicalDataset, CanonicalStats};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::metrics::MetricsSnapshot;

pub const CONCEPTS_FILE: &str = "concepts.jsonl";
pub const RELATIONSHIPS_FILE: &str = "relationships.jsonl";
pub const MAPPING_FILE: &str = "mapping.json";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Serialize)]
struct Summary<'a> {
    generated_at: DateTime<Utc>,
    concepts: usize,
    relationships: usize,
    canonicalization: &'a CanonicalStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    extraction: Option<&'a MetricsSnapshot>,
}

/// Write the canonical dataset as one JSON object per line, plus the full
/// name mapping and a run summary.
pub async fn write_dataset(
    dir: &Path,
    dataset: &CanonicalDataset,
    extraction: Option<&MetricsSnapshot>,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let concepts = dir.join(CONCEPTS_FILE);
    write_jsonl(&concepts, &dataset.concepts).await?;

    let relationships = dir.join(RELATIONSHIPS_FILE);
    write_jsonl(&relationships, &dataset.relationships).await?;

    let mapping = dir.join(MAPPING_FILE);
    write_json(&mapping, &dataset.mapping).await?;

    let summary = dir.join(SUMMARY_FILE);
    write_json(
        &summary,
        &Summary {
            generated_at: Utc::now(),
            concepts: dataset.concepts.len(),
            relationships: dataset.relationships.len(),
            canonicalization: &dataset.stats,
            extraction,
        },
    )
    .await?;

    info!(
        dir = %dir.display(),
        concepts = dataset.concepts.len(),
        relationships = dataset.relationships.len(),
        "Exported canonical dataset"
    );
    Ok(vec![concepts, relationships, mapping, summary])
}

async fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut buf = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut buf, row)?;
        buf.push(b'\n');
    }

    let mut file = fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(&buf)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.flush().await?;
    Ok(())
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use canonical::{
        CanonicalResolver, Canonicalizer, DedupConfig, FilterConfig, SemanticDeduplicator,
    };
    use extract::{ConceptCandidate, RelationshipCandidate};

    #[tokio::test]
    async fn test_writes_one_row_per_record() {
        let canonicalizer = Canonicalizer::new(
            CanonicalResolver::new(),
            SemanticDeduplicator::new(None, DedupConfig::default()),
            FilterConfig::default(),
        );
        let concepts = vec![
            ConceptCandidate {
                entity: "PWN".into(),
                importance: 5,
                category: "organism".into(),
                chunk_id: "doc1_0".into(),
            },
            ConceptCandidate {
                entity: "黑松".into(),
                importance: 3,
                category: "plant".into(),
                chunk_id: "doc1_0".into(),
            },
        ];
        let relationships = vec![RelationshipCandidate {
            node_1: "PWN".into(),
            node_2: "黑松".into(),
            edge: "infects".into(),
            weight: 0.7,
            chunk_id: "doc1_0".into(),
            provenance: "llm".into(),
        }];
        let dataset = canonicalizer.run(&concepts, &relationships).await;

        let dir = tempfile::tempdir().unwrap();
        let written = write_dataset(dir.path(), &dataset, None).await.unwrap();
        assert_eq!(written.len(), 4);

        let concepts = tokio::fs::read_to_string(dir.path().join(CONCEPTS_FILE))
            .await
            .unwrap();
        assert_eq!(concepts.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(concepts.lines().next().unwrap()).unwrap();
        assert!(first.get("canonical_name").is_some());

        let relationships = tokio::fs::read_to_string(dir.path().join(RELATIONSHIPS_FILE))
            .await
            .unwrap();
        let row: serde_json::Value = serde_json::from_str(relationships.trim()).unwrap();
        assert_eq!(row["node_1"], "松材线虫");
        assert_eq!(row["weight"], 1.0);

        let summary: serde_json::Value = serde_json::from_str(
            &tokio::fs::read_to_string(dir.path().join(SUMMARY_FILE))
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(summary["concepts"], 2);
        assert!(summary.get("extraction").is_none());
    }
}
