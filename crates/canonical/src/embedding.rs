use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("embedding service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("embedding response has {got} vectors for {expected} inputs")]
    Shape { expected: usize, got: usize },

    #[error("embedding vectors have inconsistent or zero dimension")]
    Dimension,
}

/// Produces one fixed-length vector per input text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifies the backend; vectors from different backends never mix.
    fn name(&self) -> &str;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Clone)]
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    name: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(base_url: String, model: String, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            name: format!("ollama:{}", model),
            model,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/api/embed", self.base_url);
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: EmbeddingResponse = response.json().await?;
        if body.embeddings.len() != texts.len() {
            return Err(EmbeddingError::Shape {
                expected: texts.len(),
                got: body.embeddings.len(),
            });
        }
        Ok(body.embeddings)
    }
}

/// Character n-gram hashing. Captures surface similarity only, but needs no
/// service, so it is what deduplication falls back to.
#[derive(Debug, Clone)]
pub struct LexicalEmbedder {
    dims: usize,
}

impl LexicalEmbedder {
    pub const DEFAULT_DIMS: usize = 512;

    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let chars: Vec<char> = text.trim().to_lowercase().chars().collect();
        let mut vector = vec![0.0f32; self.dims];

        for n in 1..=3 {
            if chars.len() < n {
                break;
            }
            for window in chars.windows(n) {
                let index = (fnv1a(window, n) % self.dims as u64) as usize;
                vector[index] += n as f32;
            }
        }

        vector
    }
}

impl Default for LexicalEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMS)
    }
}

#[async_trait]
impl Embedder for LexicalEmbedder {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

/// FNV-1a over the n-gram, seeded with its length so "a" and "aa" differ.
fn fnv1a(window: &[char], n: usize) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325 ^ n as u64;
    for c in window {
        for byte in (*c as u32).to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    hash
}
