use chrono::{DateTime, Utc};
use extract::{ConceptCandidate, RelationshipCandidate};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CheckpointError, Result};
use crate::log::IncrementalLog;
use crate::progress::Progress;

pub const PROGRESS_FILE: &str = "progress.json";
pub const CONCEPTS_LOG: &str = "concepts.jsonl";
pub const RELATIONSHIPS_LOG: &str = "relationships.jsonl";
pub const SNAPSHOT_DIR: &str = "snapshots";

/// Durable record of completed chunks.
///
/// One store per checkpoint directory and one writer per store: every
/// mutation takes `&mut self`.
pub struct CheckpointStore {
    dir: PathBuf,
    progress: Progress,
    concepts: IncrementalLog<ConceptCandidate>,
    relationships: IncrementalLog<RelationshipCandidate>,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    index: usize,
    taken_at: DateTime<Utc>,
    progress: &'a Progress,
    concepts: &'a [ConceptCandidate],
    relationships: &'a [RelationshipCandidate],
}

impl CheckpointStore {
    /// Open (or create) the checkpoint directory and load prior progress.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CheckpointError::io(&dir, e))?;

        let progress = Progress::load(&dir.join(PROGRESS_FILE)).await;
        info!(
            dir = %dir.display(),
            processed = progress.processed_chunk_ids.len(),
            concepts = progress.total_concepts,
            relationships = progress.total_relationships,
            "Opened checkpoint store"
        );

        Ok(Self {
            concepts: IncrementalLog::new(dir.join(CONCEPTS_LOG)),
            relationships: IncrementalLog::new(dir.join(RELATIONSHIPS_LOG)),
            dir,
            progress,
        })
    }

    /// Flush the progress descriptor one last time and release the store.
    pub async fn close(self) -> Result<()> {
        self.progress.save(&self.progress_path()).await?;
        debug!(dir = %self.dir.display(), "Closed checkpoint store");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn is_processed(&self, chunk_id: &str) -> bool {
        self.progress.is_processed(chunk_id)
    }

    /// Durably record one chunk's candidates, then mark it processed.
    ///
    /// Rows are written and synced before the progress descriptor is
    /// replaced, and in-memory progress only changes once that succeeds. On
    /// error the chunk stays unprocessed; any rows already written belong to
    /// a batch the descriptor never references and are ignored on load.
    pub async fn record_chunk_result(
        &mut self,
        chunk_id: &str,
        concepts: &[ConceptCandidate],
        relationships: &[RelationshipCandidate],
    ) -> Result<()> {
        if self.is_processed(chunk_id) {
            debug!(chunk_id, "Chunk already recorded, ignoring");
            return Ok(());
        }

        check_chunk_ids(chunk_id, concepts.iter().map(|c| c.chunk_id.as_str()))?;
        check_chunk_ids(chunk_id, relationships.iter().map(|r| r.chunk_id.as_str()))?;

        let batch = Uuid::new_v4();
        self.concepts.append(batch, concepts).await?;
        self.relationships.append(batch, relationships).await?;

        let next = self
            .progress
            .with_chunk(chunk_id, batch, concepts.len(), relationships.len());
        next.save(&self.progress_path()).await?;
        self.progress = next;

        debug!(
            chunk_id,
            concepts = concepts.len(),
            relationships = relationships.len(),
            "Recorded chunk"
        );
        Ok(())
    }

    /// Write a timestamped full dump under `snapshots/`. Separate from the
    /// incremental logs; nothing reads it back.
    pub async fn snapshot(
        &self,
        index: usize,
        concepts: &[ConceptCandidate],
        relationships: &[RelationshipCandidate],
    ) -> Result<PathBuf> {
        let snapshot_dir = self.dir.join(SNAPSHOT_DIR);
        fs::create_dir_all(&snapshot_dir)
            .await
            .map_err(|e| CheckpointError::io(&snapshot_dir, e))?;

        let taken_at = Utc::now();
        let path = snapshot_dir.join(format!(
            "snapshot_{:06}_{}.json",
            index,
            taken_at.format("%Y%m%dT%H%M%S%.3f")
        ));

        let snapshot = Snapshot {
            index,
            taken_at,
            progress: &self.progress,
            concepts,
            relationships,
        };
        let json = serde_json::to_vec(&snapshot)?;
        fs::write(&path, json)
            .await
            .map_err(|e| CheckpointError::io(&path, e))?;

        info!(index, path = %path.display(), "Wrote snapshot");
        Ok(path)
    }

    /// Rebuild the aggregate tables from the incremental logs.
    ///
    /// Only rows written by the batch the descriptor recorded for a processed
    /// chunk are returned, so torn or superseded writes never surface.
    pub async fn load_incremental(
        &self,
    ) -> Result<(Vec<ConceptCandidate>, Vec<RelationshipCandidate>)> {
        let concepts: Vec<ConceptCandidate> = self
            .concepts
            .read_all()
            .await?
            .into_iter()
            .filter(|logged| self.progress.batch_for(&logged.row.chunk_id) == Some(&logged.batch))
            .map(|logged| logged.row)
            .collect();

        let relationships: Vec<RelationshipCandidate> = self
            .relationships
            .read_all()
            .await?
            .into_iter()
            .filter(|logged| self.progress.batch_for(&logged.row.chunk_id) == Some(&logged.batch))
            .map(|logged| logged.row)
            .collect();

        if concepts.len() != self.progress.total_concepts
            || relationships.len() != self.progress.total_relationships
        {
            warn!(
                concepts = concepts.len(),
                expected_concepts = self.progress.total_concepts,
                relationships = relationships.len(),
                expected_relationships = self.progress.total_relationships,
                "Incremental logs disagree with progress totals"
            );
        }

        Ok((concepts, relationships))
    }

    /// Delete all durable state and start from empty progress.
    pub async fn reset(&mut self) -> Result<()> {
        self.concepts.remove().await?;
        self.relationships.remove().await?;

        let progress_path = self.progress_path();
        remove_if_exists(&progress_path).await?;

        let snapshot_dir = self.dir.join(SNAPSHOT_DIR);
        match fs::remove_dir_all(&snapshot_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CheckpointError::io(&snapshot_dir, e)),
        }

        self.progress = Progress::new();
        info!(dir = %self.dir.display(), "Checkpoint store reset");
        Ok(())
    }

    fn progress_path(&self) -> PathBuf {
        self.dir.join(PROGRESS_FILE)
    }
}

fn check_chunk_ids<'a>(expected: &str, found: impl Iterator<Item = &'a str>) -> Result<()> {
    for id in found {
        if id != expected {
            return Err(CheckpointError::ChunkMismatch {
                expected: expected.to_string(),
                found: id.to_string(),
            });
        }
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CheckpointError::io(path, e)),
    }
}
