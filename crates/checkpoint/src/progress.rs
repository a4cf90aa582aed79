use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::error::{CheckpointError, Result};

/// The progress descriptor: which chunks are done and running totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub processed_chunk_ids: BTreeSet<String>,
    pub total_concepts: usize,
    pub total_relationships: usize,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    /// Batch id of the rows that count for each processed chunk. Rows from
    /// any other batch were left behind by an interrupted write.
    #[serde(default)]
    pub batches: BTreeMap<String, Uuid>,
}

impl Progress {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            processed_chunk_ids: BTreeSet::new(),
            total_concepts: 0,
            total_relationships: 0,
            started_at: now,
            last_update: now,
            batches: BTreeMap::new(),
        }
    }

    pub fn is_processed(&self, chunk_id: &str) -> bool {
        self.processed_chunk_ids.contains(chunk_id)
    }

    pub fn batch_for(&self, chunk_id: &str) -> Option<&Uuid> {
        self.batches.get(chunk_id)
    }

    /// Progress with one more chunk marked done.
    pub(crate) fn with_chunk(&self, chunk_id: &str, batch: Uuid, concepts: usize, relationships: usize) -> Self {
        let mut next = self.clone();
        next.processed_chunk_ids.insert(chunk_id.to_string());
        next.batches.insert(chunk_id.to_string(), batch);
        next.total_concepts += concepts;
        next.total_relationships += relationships;
        next.last_update = Utc::now();
        next
    }

    /// Load the descriptor at `path`. A missing or unreadable descriptor
    /// means no prior progress.
    pub async fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read progress, starting fresh");
                return Self::new();
            }
        };

        match serde_json::from_str::<Progress>(&content) {
            Ok(progress) => progress,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt progress descriptor, starting fresh");
                Self::new()
            }
        }
    }

    /// Write the descriptor atomically: temp file, fsync, rename.
    ///
    /// The whole descriptor is rewritten on every call, so the cost of a
    /// save grows with the number of processed chunks.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(self)?;

        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| CheckpointError::io(&tmp, e))?;
        file.write_all(&json)
            .await
            .map_err(|e| CheckpointError::io(&tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| CheckpointError::io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, path)
            .await
            .map_err(|e| CheckpointError::io(path, e))?;
        Ok(())
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}
