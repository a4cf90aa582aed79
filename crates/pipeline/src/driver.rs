use checkpoint::CheckpointStore;
use extract::{ConceptCandidate, Extractor, RelationshipCandidate};
use futures::stream::{FuturesUnordered, StreamExt};
use ingest::Chunk;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics::{MetricsSnapshot, RunMetrics, TimedOperation};

/// What one run produced.
#[derive(Debug)]
pub struct RunReport {
    pub summary: MetricsSnapshot,
    /// The run stopped early because cancellation was requested.
    pub cancelled: bool,
    /// Everything recorded so far, earlier runs included.
    pub concepts: Vec<ConceptCandidate>,
    pub relationships: Vec<RelationshipCandidate>,
}

/// Feeds chunks through the extractor and records each result durably.
///
/// Up to `max_concurrent` extraction calls run at once, but only this loop
/// writes to the checkpoint store.
pub struct PipelineDriver {
    extractor: Arc<Extractor>,
    store: CheckpointStore,
    snapshot_interval: usize,
    max_concurrent: usize,
    metrics: Arc<RunMetrics>,
}

impl PipelineDriver {
    pub fn new(extractor: Extractor, store: CheckpointStore) -> Self {
        Self {
            extractor: Arc::new(extractor),
            store,
            snapshot_interval: 50,
            max_concurrent: 1,
            metrics: RunMetrics::new(),
        }
    }

    pub fn with_snapshot_interval(mut self, interval: usize) -> Self {
        self.snapshot_interval = interval.max(1);
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn metrics(&self) -> Arc<RunMetrics> {
        self.metrics.clone()
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn into_store(self) -> CheckpointStore {
        self.store
    }

    /// Process every chunk not yet recorded, in input order.
    ///
    /// Chunk failures are logged and counted, never returned. Cancellation
    /// is honoured between chunks: nothing new starts once `cancel` fires,
    /// and calls already in flight are awaited and recorded.
    pub async fn run(
        &mut self,
        chunks: &[Chunk],
        cancel: &CancellationToken,
    ) -> checkpoint::Result<RunReport> {
        let (mut concepts, mut relationships) = self.store.load_incremental().await?;

        let pending: Vec<&Chunk> = chunks
            .iter()
            .filter(|chunk| {
                let done = self.store.is_processed(&chunk.id);
                if done {
                    self.metrics.record_skipped_existing();
                }
                !done
            })
            .collect();

        info!(
            total = chunks.len(),
            pending = pending.len(),
            already_processed = chunks.len() - pending.len(),
            max_concurrent = self.max_concurrent,
            "Starting extraction run"
        );

        let mut pending = pending.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut recorded = 0usize;
        let mut cancelled = false;

        loop {
            while !cancelled && in_flight.len() < self.max_concurrent {
                if cancel.is_cancelled() {
                    info!(in_flight = in_flight.len(), "Cancellation requested, finishing in-flight chunks");
                    cancelled = true;
                    break;
                }
                let Some(chunk) = pending.next() else { break };

                let extractor = self.extractor.clone();
                let chunk = chunk.clone();
                in_flight.push(async move {
                    let timer = TimedOperation::start();
                    let result = extractor.extract(&chunk).await;
                    (chunk.id, result, timer.elapsed())
                });
            }

            let Some((chunk_id, result, elapsed)) = in_flight.next().await else {
                break;
            };

            let extraction = match result {
                Ok(extraction) => extraction,
                Err(e) => {
                    warn!(
                        chunk_id = %chunk_id,
                        kind = e.kind().as_str(),
                        error = %e,
                        "Extraction failed, skipping chunk"
                    );
                    self.metrics.record_failure(e.kind());
                    continue;
                }
            };

            if let Err(e) = self
                .store
                .record_chunk_result(&chunk_id, &extraction.concepts, &extraction.relationships)
                .await
            {
                error!(chunk_id = %chunk_id, error = %e, "Failed to record chunk, it will be retried next run");
                self.metrics.record_persist_failure();
                continue;
            }

            self.metrics.record_success(
                elapsed,
                extraction.concepts.len(),
                extraction.relationships.len(),
            );
            concepts.extend(extraction.concepts);
            relationships.extend(extraction.relationships);
            recorded += 1;

            if recorded % self.snapshot_interval == 0 {
                let index = self.store.progress().processed_chunk_ids.len();
                match self.store.snapshot(index, &concepts, &relationships).await {
                    Ok(_) => self.metrics.record_snapshot(),
                    Err(e) => warn!(index, error = %e, "Snapshot failed, continuing"),
                }
            }
        }

        let summary = self.metrics.snapshot();
        info!(
            processed = summary.processed,
            skipped_existing = summary.skipped_existing,
            failed = summary.failed,
            cancelled,
            "Extraction run finished"
        );

        Ok(RunReport {
            summary,
            cancelled,
            concepts,
            relationships,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use extract::{ExtractionError, GenerationRequest, RetryPolicy, TextGenerator};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers with one concept per `@word` in the chunk text, chained by
    /// relationships. Text containing `@fail` is unreachable.
    struct MarkerGenerator {
        calls: AtomicUsize,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl MarkerGenerator {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                cancel_after: None,
            })
        }

        fn cancelling_after(calls: usize, token: CancellationToken) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                cancel_after: Some((calls, token)),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for MarkerGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, ExtractionError> {
            let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((limit, token)) = &self.cancel_after {
                if calls >= *limit {
                    token.cancel();
                }
            }

            let markers: Vec<&str> = request
                .prompt
                .split('@')
                .skip(1)
                .filter_map(|rest| rest.split(|c: char| !c.is_alphanumeric()).next())
                .collect();

            if markers.contains(&"fail") {
                return Err(ExtractionError::Unreachable {
                    attempts: 1,
                    last_error: "connection refused".into(),
                });
            }

            let concepts: Vec<_> = markers
                .iter()
                .map(|m| serde_json::json!({"entity": m, "importance": 3, "category": "organism"}))
                .collect();
            let relationships: Vec<_> = markers
                .windows(2)
                .map(|pair| serde_json::json!({"node_1": pair[0], "node_2": pair[1], "edge": "near"}))
                .collect();

            Ok(serde_json::json!({"concepts": concepts, "relationships": relationships}).to_string())
        }
    }

    fn chunks() -> Vec<Chunk> {
        vec![
            Chunk::new("doc1_0", "@pine and @nematode", 0),
            Chunk::new("doc1_1", "@beetle carries @nematode", 1),
            Chunk::new("doc1_2", "@pine dies", 2),
            Chunk::new("doc1_3", "@emamectin protects @pine", 3),
        ]
    }

    async fn driver(dir: &std::path::Path, generator: Arc<MarkerGenerator>) -> PipelineDriver {
        let store = CheckpointStore::open(dir).await.unwrap();
        PipelineDriver::new(
            Extractor::new(generator, RetryPolicy::new(0, 0, 0)),
            store,
        )
    }

    fn names(concepts: &[ConceptCandidate]) -> Vec<(String, String)> {
        let mut names: Vec<_> = concepts
            .iter()
            .map(|c| (c.chunk_id.clone(), c.entity.clone()))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_full_run_records_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = driver(dir.path(), MarkerGenerator::new()).await;

        let report = driver.run(&chunks(), &CancellationToken::new()).await.unwrap();

        assert!(!report.cancelled);
        assert_eq!(report.summary.processed, 4);
        assert_eq!(report.concepts.len(), 7);
        assert_eq!(report.relationships.len(), 3);
        assert_eq!(driver.store().progress().processed_chunk_ids.len(), 4);
    }

    #[tokio::test]
    async fn test_interrupted_then_resumed_matches_uninterrupted() {
        let full_dir = tempfile::tempdir().unwrap();
        let mut full = driver(full_dir.path(), MarkerGenerator::new()).await;
        let expected = full.run(&chunks(), &CancellationToken::new()).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let mut first = driver(dir.path(), MarkerGenerator::cancelling_after(2, token.clone())).await;
        let partial = first.run(&chunks(), &token).await.unwrap();
        assert!(partial.cancelled);
        assert_eq!(partial.summary.processed, 2);
        first.into_store().close().await.unwrap();

        let generator = MarkerGenerator::new();
        let mut second = driver(dir.path(), generator.clone()).await;
        let resumed = second.run(&chunks(), &CancellationToken::new()).await.unwrap();

        assert_eq!(resumed.summary.skipped_existing, 2);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(names(&resumed.concepts), names(&expected.concepts));
        assert_eq!(resumed.relationships.len(), expected.relationships.len());
    }

    #[tokio::test]
    async fn test_failed_chunk_is_skipped_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = driver(dir.path(), MarkerGenerator::new()).await;
        let mut input = chunks();
        input.insert(1, Chunk::new("doc1_9", "@fail here", 9));

        let report = driver.run(&input, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.summary.processed, 4);
        assert_eq!(report.summary.failed_unreachable, 1);
        assert!(!driver.store().is_processed("doc1_9"));
        assert!(report.concepts.iter().all(|c| c.chunk_id != "doc1_9"));
    }

    #[tokio::test]
    async fn test_snapshots_taken_every_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = driver(dir.path(), MarkerGenerator::new())
            .await
            .with_snapshot_interval(2);

        let report = driver.run(&chunks(), &CancellationToken::new()).await.unwrap();

        assert_eq!(report.summary.snapshots, 2);
        let mut entries = tokio::fs::read_dir(dir.path().join(checkpoint::store::SNAPSHOT_DIR))
            .await
            .unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_failed_record_leaves_chunk_unprocessed() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the descriptor belongs makes every save fail.
        let blocker = dir.path().join(checkpoint::store::PROGRESS_FILE);
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), b"x").unwrap();

        let mut blocked = driver(dir.path(), MarkerGenerator::new()).await;
        let report = blocked.run(&chunks(), &CancellationToken::new()).await.unwrap();

        assert_eq!(report.summary.processed, 0);
        assert_eq!(report.summary.failed_persist, 4);
        assert_eq!(report.summary.failed, 4);
        assert!(report.concepts.is_empty());
        assert!(chunks().iter().all(|c| !blocked.store().is_processed(&c.id)));
        drop(blocked);

        std::fs::remove_dir_all(&blocker).unwrap();
        let generator = MarkerGenerator::new();
        let mut retry = driver(dir.path(), generator.clone()).await;
        let report = retry.run(&chunks(), &CancellationToken::new()).await.unwrap();

        assert_eq!(generator.calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.summary.processed, 4);
        assert_eq!(report.concepts.len(), 7);
        assert_eq!(report.relationships.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_snapshot_does_not_stop_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(checkpoint::store::SNAPSHOT_DIR), b"not a dir").unwrap();

        let mut driver = driver(dir.path(), MarkerGenerator::new())
            .await
            .with_snapshot_interval(1);
        let report = driver.run(&chunks(), &CancellationToken::new()).await.unwrap();

        assert_eq!(report.summary.processed, 4);
        assert_eq!(report.summary.snapshots, 0);
        assert_eq!(report.summary.failed, 0);
        assert_eq!(driver.store().progress().processed_chunk_ids.len(), 4);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let generator = MarkerGenerator::new();
        let mut driver = driver(dir.path(), generator.clone()).await;
        let token = CancellationToken::new();
        token.cancel();

        let report = driver.run(&chunks(), &token).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.summary.processed, 0);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_parallel_run_records_same_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = driver(dir.path(), MarkerGenerator::new())
            .await
            .with_max_concurrent(3);

        let report = driver.run(&chunks(), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.summary.processed, 4);

        let store = driver.into_store();
        let (concepts, relationships) = store.load_incremental().await.unwrap();
        assert_eq!(names(&concepts), names(&report.concepts));
        assert_eq!(relationships.len(), 3);
    }
}
