pub mod chunk;
pub mod chunker;
pub mod reader;

pub use chunk::Chunk;
pub use chunker::{Chunker, ChunkerConfig};
pub use reader::FileReader;

use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;

/// Load chunks from a JSONL chunk file or a directory of text documents.
///
/// Resume correctness depends on chunk ids being unique and stable, so a
/// source that repeats an id is rejected.
pub async fn load_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let chunks = if path.is_dir() {
        let chunker = Chunker::new(ChunkerConfig::default());
        FileReader::read_directory(path, &chunker).await?
    } else {
        FileReader::read_chunk_file(path).await?
    };

    ensure_unique_ids(&chunks)?;
    tracing::info!(chunks = chunks.len(), source = %path.display(), "Loaded chunks");
    Ok(chunks)
}

pub fn ensure_unique_ids(chunks: &[Chunk]) -> Result<()> {
    let mut seen = HashSet::new();
    for chunk in chunks {
        if !seen.insert(chunk.id.as_str()) {
            anyhow::bail!("Duplicate chunk id in source: {}", chunk.id);
        }
    }
    Ok(())
}
