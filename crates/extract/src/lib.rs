pub mod error;
pub mod llm;
pub mod prompt;
pub mod retry;
pub mod schema;

pub use error::{ErrorKind, ExtractionError};
pub use llm::{GenerationOptions, GenerationRequest, OllamaClient, TextGenerator};
pub use retry::RetryPolicy;
pub use schema::{ConceptCandidate, ExtractionResult, RelationshipCandidate};

use ingest::Chunk;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default number of times a response is requested before a chunk whose
/// output never matches the schema is given up on.
pub const DEFAULT_MALFORMED_ATTEMPTS: usize = 3;

/// Turns chunks into typed extraction results. Holds no per-chunk state,
/// so extracting the same chunk twice is harmless.
pub struct Extractor {
    generator: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
    malformed_attempts: usize,
    options: GenerationOptions,
    proximity_weight: Option<f64>,
}

impl Extractor {
    pub fn new(generator: Arc<dyn TextGenerator>, retry: RetryPolicy) -> Self {
        Self {
            generator,
            retry,
            malformed_attempts: DEFAULT_MALFORMED_ATTEMPTS,
            options: GenerationOptions::default(),
            proximity_weight: None,
        }
    }

    pub fn with_malformed_attempts(mut self, attempts: usize) -> Self {
        self.malformed_attempts = attempts.max(1);
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Also link concepts that co-occur in a chunk, at `weight`.
    pub fn with_proximity_edges(mut self, weight: f64) -> Self {
        self.proximity_weight = Some(weight.clamp(0.0, 1.0));
        self
    }

    /// Extract concepts and relationships from one chunk.
    ///
    /// Transient failures are retried under the retry policy and become
    /// `Unreachable` when it is exhausted. Malformed responses are re-asked
    /// with a correction prompt up to the malformed-attempt limit.
    pub async fn extract(&self, chunk: &Chunk) -> Result<ExtractionResult, ExtractionError> {
        let mut request = GenerationRequest {
            system: prompt::SYSTEM_PROMPT.to_string(),
            prompt: prompt::build_extraction_prompt(&chunk.text),
            options: self.options.clone(),
        };

        let mut last_error = None;

        for attempt in 1..=self.malformed_attempts {
            let response = self.generate_with_retry(&request).await?;

            match schema::parse_payload(&chunk.id, &response) {
                Ok(mut result) => {
                    if let Some(weight) = self.proximity_weight {
                        result.add_proximity_edges(weight);
                    }
                    debug!(
                        chunk_id = %chunk.id,
                        concepts = result.concepts.len(),
                        relationships = result.relationships.len(),
                        confidence = result.confidence,
                        "Extracted chunk"
                    );
                    return Ok(result);
                }
                Err(e) => {
                    warn!(
                        chunk_id = %chunk.id,
                        attempt,
                        max_attempts = self.malformed_attempts,
                        error = %e,
                        "Malformed extraction output"
                    );
                    request.prompt = prompt::build_retry_prompt(&chunk.text, &response);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ExtractionError::malformed("no attempts made", "")))
    }

    async fn generate_with_retry(&self, request: &GenerationRequest) -> Result<String, ExtractionError> {
        self.retry
            .retry_if("generate", ExtractionError::is_transient, || {
                self.generator.generate(request)
            })
            .await
            .map_err(|e| match e {
                ExtractionError::Transient(last_error) => ExtractionError::Unreachable {
                    attempts: self.retry.max_attempts(),
                    last_error,
                },
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const GOOD: &str = r#"{"concepts": [{"entity": "A", "importance": 4, "category": "c"},
        {"entity": "B", "importance": 2, "category": "c"}],
        "relationships": [{"node_1": "A", "node_2": "B", "edge": "feeds"}]}"#;

    /// Replays a fixed script of responses and records the prompts it saw.
    struct ScriptedGenerator {
        script: Mutex<VecDeque<Result<String, ExtractionError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(script: Vec<Result<String, ExtractionError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, ExtractionError> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ExtractionError::Transient("script exhausted".into())))
        }
    }

    fn chunk() -> Chunk {
        Chunk::new("doc1_0", "A feeds B.", 0)
    }

    #[tokio::test]
    async fn test_extract_success() {
        let generator = ScriptedGenerator::new(vec![Ok(GOOD.to_string())]);
        let extractor = Extractor::new(generator.clone(), RetryPolicy::new(2, 0, 0));

        let result = extractor.extract(&chunk()).await.unwrap();
        assert_eq!(result.chunk_id, "doc1_0");
        assert_eq!(result.concepts.len(), 2);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let generator = ScriptedGenerator::new(vec![
            Err(ExtractionError::Transient("timeout".into())),
            Err(ExtractionError::Transient("connection refused".into())),
            Ok(GOOD.to_string()),
        ]);
        let extractor = Extractor::new(generator.clone(), RetryPolicy::new(2, 0, 0));

        assert!(extractor.extract(&chunk()).await.is_ok());
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_unreachable() {
        let generator = ScriptedGenerator::new(vec![]);
        let extractor = Extractor::new(generator.clone(), RetryPolicy::new(2, 0, 0));

        let err = extractor.extract(&chunk()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unreachable);
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_malformed_output_retried_with_correction_prompt() {
        let generator = ScriptedGenerator::new(vec![
            Ok("{not json".to_string()),
            Ok(GOOD.to_string()),
        ]);
        let extractor = Extractor::new(generator.clone(), RetryPolicy::new(0, 0, 0));

        assert!(extractor.extract(&chunk()).await.is_ok());
        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("{not json"));
    }

    #[tokio::test]
    async fn test_correction_prompt_repeats_chunk_text() {
        let generator = ScriptedGenerator::new(vec![
            Ok("I cannot help with that.".to_string()),
            Ok(GOOD.to_string()),
        ]);
        let extractor = Extractor::new(generator.clone(), RetryPolicy::new(0, 0, 0));

        let result = extractor.extract(&chunk()).await.unwrap();
        assert_eq!(result.concepts.len(), 2);

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("A feeds B."));
        assert!(prompts[1].contains("I cannot help with that."));
    }

    #[tokio::test]
    async fn test_malformed_output_gives_up_after_bounded_attempts() {
        let generator = ScriptedGenerator::new(vec![
            Ok("nope".to_string()),
            Ok("still nope".to_string()),
            Ok(GOOD.to_string()),
        ]);
        let extractor = Extractor::new(generator.clone(), RetryPolicy::new(0, 0, 0))
            .with_malformed_attempts(2);

        let err = extractor.extract(&chunk()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_permanent_rejection_not_retried() {
        let generator = ScriptedGenerator::new(vec![Err(error::classify_status(
            404,
            "model not found".into(),
        ))]);
        let extractor = Extractor::new(generator.clone(), RetryPolicy::new(3, 0, 0));

        let err = extractor.extract(&chunk()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unreachable);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_proximity_edges_added_when_enabled() {
        let generator = ScriptedGenerator::new(vec![Ok(GOOD.to_string())]);
        let extractor =
            Extractor::new(generator, RetryPolicy::new(0, 0, 0)).with_proximity_edges(0.5);

        let result = extractor.extract(&chunk()).await.unwrap();
        assert_eq!(result.relationships.len(), 2);
    }
}
