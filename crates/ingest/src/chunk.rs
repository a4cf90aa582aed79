use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub position: usize,
}

impl Chunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>, position: usize) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            position,
        }
    }

    /// Build a chunk whose id is derived from its document and position.
    ///
    /// The id only depends on `doc_id` and `position`, so re-chunking the
    /// same document with the same settings yields the same ids.
    pub fn for_document(doc_id: &str, position: usize, text: impl Into<String>) -> Self {
        Self::new(Self::generate_chunk_id(doc_id, position), text, position)
    }

    fn generate_chunk_id(doc_id: &str, position: usize) -> String {
        format!("{}_{}", doc_id, position)
    }
}
