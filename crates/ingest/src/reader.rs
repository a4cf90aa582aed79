use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;
use walkdir::WalkDir;

use crate::chunk::Chunk;
use crate::chunker::Chunker;

/// One line of a JSONL chunk file. `position` defaults to the line index.
#[derive(Deserialize)]
struct ChunkRecord {
    id: String,
    text: String,
    position: Option<usize>,
}

pub struct FileReader;

impl FileReader {
    /// Read pre-chunked input: one JSON object per line.
    pub async fn read_chunk_file(path: &Path) -> Result<Vec<Chunk>> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read chunk file: {:?}", path))?;

        let mut chunks = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: ChunkRecord = serde_json::from_str(line)
                .with_context(|| format!("Invalid chunk record on line {} of {:?}", index + 1, path))?;
            chunks.push(Chunk::new(
                record.id,
                record.text,
                record.position.unwrap_or(index),
            ));
        }

        Ok(chunks)
    }

    /// Read and chunk every `.txt`/`.md` file under `dir`, in path order.
    pub async fn read_directory(dir: &Path, chunker: &Chunker) -> Result<Vec<Chunk>> {
        let mut paths: Vec<_> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_text_file(path))
            .collect();
        paths.sort();

        let mut chunks = Vec::new();
        for path in paths {
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read file: {:?}", path))?;
            let doc_id = doc_id_for(&path);
            chunks.extend(chunker.chunk_text(&doc_id, &content));
        }

        Ok(chunks)
    }
}

fn is_text_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("txt") | Some("md")
    )
}

/// Documents are identified by file stem so chunk ids read as `doc1_3`.
pub fn doc_id_for(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
