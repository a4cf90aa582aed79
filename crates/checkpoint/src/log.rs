use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::warn;
use uuid::Uuid;

use crate::error::{CheckpointError, Result};

/// One row of an incremental log: the candidate plus the batch that wrote it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedRow<T> {
    pub batch: Uuid,
    #[serde(flatten)]
    pub row: T,
}

/// Append-only JSON-lines log of candidate rows.
pub struct IncrementalLog<T> {
    path: PathBuf,
    _row: PhantomData<T>,
}

impl<T> IncrementalLog<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _row: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `rows` under `batch` and fsync before returning.
    pub async fn append(&self, batch: Uuid, rows: &[T]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))?;

        let mut buffer = Vec::new();
        // A crash mid-line leaves an unterminated fragment; start on a fresh line.
        if ends_mid_line(&mut file)
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))?
        {
            buffer.push(b'\n');
        }
        for row in rows {
            serde_json::to_writer(&mut buffer, &LoggedRow { batch, row })?;
            buffer.push(b'\n');
        }

        file.write_all(&buffer)
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))?;
        Ok(())
    }

    /// Read every parseable row. A line cut short by a crash is skipped, even
    /// when the cut lands inside a multi-byte character.
    pub async fn read_all(&self) -> Result<Vec<LoggedRow<T>>> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::io(&self.path, e)),
        };

        let mut rows = Vec::new();
        for (index, line) in content.split(|&b| b == b'\n').enumerate() {
            if line.trim_ascii().is_empty() {
                continue;
            }
            match serde_json::from_slice::<LoggedRow<T>>(line) {
                Ok(row) => rows.push(row),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable log row"
                ),
            }
        }
        Ok(rows)
    }

    pub async fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::io(&self.path, e)),
        }
    }
}

async fn ends_mid_line(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        entity: String,
    }

    fn row(entity: &str) -> Row {
        Row {
            entity: entity.to_string(),
        }
    }

    #[tokio::test]
    async fn test_line_cut_inside_multibyte_char_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = IncrementalLog::<Row>::new(dir.path().join("rows.jsonl"));
        let batch = Uuid::new_v4();
        log.append(batch, &[row("松材线虫")]).await.unwrap();

        // Tear a row in the middle of the three-byte "马".
        let torn = serde_json::to_vec(&LoggedRow {
            batch,
            row: row("松墨天牛马尾松"),
        })
        .unwrap();
        let cut = torn.iter().position(|&b| b == 0xE9).unwrap() + 1;
        let mut file = OpenOptions::new().append(true).open(log.path()).await.unwrap();
        file.write_all(&torn[..cut]).await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let rows = log.read_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row, row("松材线虫"));

        log.append(batch, &[row("黑松")]).await.unwrap();
        let entities: Vec<String> = log
            .read_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.row.entity)
            .collect();
        assert_eq!(entities, vec!["松材线虫", "黑松"]);
    }

    #[tokio::test]
    async fn test_missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = IncrementalLog::<Row>::new(dir.path().join("absent.jsonl"));
        assert!(log.read_all().await.unwrap().is_empty());
    }
}
