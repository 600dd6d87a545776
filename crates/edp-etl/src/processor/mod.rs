//! Streaming chunk processor
//!
//! Drives one job through extract -> transform -> load under a concurrency
//! cap and a memory-based admission gate. Extraction is page-at-a-time, so
//! peak memory is bounded by the pages currently in flight, never by the
//! full result set. Each admitted page becomes one chunk task; a failure
//! inside a chunk is recorded against its sequence index and the job keeps
//! going until the failed fraction crosses the configured threshold.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{EtlError, EtlResult};
use crate::model::{Event, RawRecord};
use crate::registry::StrategyRegistry;
use crate::retry::{retry_if, RetryPolicy};
use crate::writer::EventSink;

pub use memory::{MemoryProbe, ProcStatusProbe};

/// Tuning parameters for one job, immutable for its lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Items extracted per page/chunk
    pub extract_chunk_size: usize,
    /// Raw items transformed per batch inside a chunk
    pub transform_batch_size: usize,
    /// Events per store round trip
    pub load_batch_size: usize,
    /// Chunk pipelines allowed in flight at once
    pub max_concurrent_chunks: usize,
    /// Resident-set size above which chunk admission blocks
    pub memory_threshold_mb: u64,
    /// How often the admission gate re-samples memory
    pub backpressure_poll: Duration,
    /// How long admission may stay blocked before the job fails
    pub backpressure_max_wait: Duration,
    /// Fraction of failed chunks (0.0..=1.0) above which the job fails
    pub failure_threshold: f64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            extract_chunk_size: 100,
            transform_batch_size: 1000,
            load_batch_size: 500,
            max_concurrent_chunks: 3,
            memory_threshold_mb: 500,
            backpressure_poll: Duration::from_millis(250),
            backpressure_max_wait: Duration::from_secs(30),
            failure_threshold: 0.5,
        }
    }
}

impl StreamingConfig {
    fn validate(&self) -> EtlResult<()> {
        if self.extract_chunk_size == 0
            || self.transform_batch_size == 0
            || self.load_batch_size == 0
            || self.max_concurrent_chunks == 0
        {
            return Err(EtlError::Config(
                "chunk, batch, and concurrency sizes must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_threshold) {
            return Err(EtlError::Config(format!(
                "failure_threshold must be within 0.0..=1.0, got {}",
                self.failure_threshold
            )));
        }
        Ok(())
    }
}

/// Job descriptor handed in by the durable-execution collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Key of the registered query builder, e.g. "launchpad"
    pub source_key: String,
    /// Key of the registered extractor, e.g. "launchpad-bugs"
    pub extraction_key: String,
    /// Source-defined query arguments
    pub args: Map<String, Value>,
}

/// Terminal state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// One recorded failure, attributable to a chunk when possible
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFailure {
    /// Chunk sequence index; None when the failure cannot be attributed
    pub chunk: Option<usize>,
    /// Pipeline stage: "extract", "transform", "load", or "backpressure"
    pub stage: String,
    pub message: String,
}

/// Aggregate result of one job. Partial success is always reported: the
/// counts reflect what actually happened even when the status is Failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// Secret-free query summary, for traceability of what was extracted
    pub summary: Map<String, Value>,
    /// Events successfully transformed
    pub items_processed: u64,
    /// Raw items dropped by transform validation
    pub items_skipped: u64,
    /// Rows actually written (conflicts excluded)
    pub items_inserted: u64,
    /// Chunks that ran to completion
    pub chunks_processed: u64,
    /// Chunks that failed in extract or load
    pub chunks_failed: u64,
    /// Whether the job was cut short by the cancellation signal
    pub cancelled: bool,
    pub errors: Vec<ChunkFailure>,
}

/// Shared accumulator between chunk tasks and the store.
///
/// Transformed events from all chunks collect here; every time the buffer
/// reaches `batch_size` events, exactly one batch of that size is flushed.
/// Chunk completion order does not matter: the writer's `event_id` handling
/// makes interleaving and re-delivery safe.
struct LoadBuffer {
    sink: Arc<dyn EventSink>,
    batch_size: usize,
    buf: Mutex<Vec<Event>>,
}

impl LoadBuffer {
    fn new(sink: Arc<dyn EventSink>, batch_size: usize) -> Self {
        Self {
            sink,
            batch_size,
            buf: Mutex::new(Vec::new()),
        }
    }

    /// Append events and flush any full batches. Returns rows inserted.
    async fn push(&self, events: Vec<Event>) -> EtlResult<u64> {
        let mut ready = Vec::new();
        {
            let mut buf = self.buf.lock().await;
            buf.extend(events);
            while buf.len() >= self.batch_size {
                let rest = buf.split_off(self.batch_size);
                ready.push(std::mem::replace(&mut *buf, rest));
            }
        }

        let mut inserted = 0;
        for batch in ready {
            inserted += self.sink.insert_batch(&batch).await?;
        }
        Ok(inserted)
    }

    /// Flush whatever remains below one full batch.
    async fn flush(&self) -> EtlResult<u64> {
        let remainder = std::mem::take(&mut *self.buf.lock().await);
        if remainder.is_empty() {
            return Ok(0);
        }
        self.sink.insert_batch(&remainder).await
    }
}

/// What one chunk task reports back to the coordinator
struct ChunkOutcome {
    index: usize,
    processed: u64,
    skipped: u64,
    inserted: u64,
    /// Summary of item-level validation failures, when any occurred
    skipped_note: Option<ChunkFailure>,
    /// Chunk-level failure, when the chunk did not complete
    failure: Option<ChunkFailure>,
}

/// The orchestration core: resolves strategies, pages through extraction,
/// and fans admitted chunks out to a bounded task pool.
pub struct ChunkProcessor {
    registry: StrategyRegistry,
    sink: Arc<dyn EventSink>,
    config: StreamingConfig,
    probe: Arc<dyn MemoryProbe>,
    page_retry: RetryPolicy,
}

impl ChunkProcessor {
    pub fn new(
        registry: StrategyRegistry,
        sink: Arc<dyn EventSink>,
        config: StreamingConfig,
    ) -> Self {
        Self {
            registry,
            sink,
            config,
            probe: Arc::new(ProcStatusProbe),
            page_retry: RetryPolicy::default(),
        }
    }

    /// Substitute the memory probe backing the admission gate.
    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Override the page-fetch retry schedule.
    pub fn with_page_retry(mut self, policy: RetryPolicy) -> Self {
        self.page_retry = policy;
        self
    }

    /// Execute one job to completion.
    ///
    /// Fatal errors (invalid configuration, unknown strategy keys) reject
    /// the job before any chunk runs. Everything after that is reported
    /// through the returned [`JobReport`], including a Failed status when
    /// sustained backpressure or the chunk-failure threshold ends the job
    /// early.
    pub async fn run(&self, spec: JobSpec, cancel: CancellationToken) -> EtlResult<JobReport> {
        self.config.validate()?;

        let query = self.registry.resolve_query(&spec.source_key, &spec.args)?;
        let extractor = self.registry.resolve_extractor(&spec.extraction_key)?;

        let job_id = Uuid::new_v4();
        let source_kind_id = query.source_kind_id().to_string();
        let event_type = query.event_type().to_string();

        info!(
            job_id = %job_id,
            source = %source_kind_id,
            event_type = %event_type,
            extraction = %spec.extraction_key,
            "starting streaming job"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_chunks));
        let buffer = Arc::new(LoadBuffer::new(self.sink.clone(), self.config.load_batch_size));
        let mut tasks: JoinSet<ChunkOutcome> = JoinSet::new();

        let mut report = JobReport {
            job_id,
            status: JobStatus::Completed,
            summary: query.summary(),
            items_processed: 0,
            items_skipped: 0,
            items_inserted: 0,
            chunks_processed: 0,
            chunks_failed: 0,
            cancelled: false,
            errors: Vec::new(),
        };

        let mut token: Option<String> = None;
        let mut chunk_index = 0usize;
        let mut fatal = false;

        loop {
            if cancel.is_cancelled() {
                info!(job_id = %job_id, "cancellation requested, no further chunks admitted");
                report.cancelled = true;
                break;
            }

            if self.threshold_exceeded(&report, chunk_index) {
                error!(
                    job_id = %job_id,
                    chunks_failed = report.chunks_failed,
                    "chunk failure threshold exceeded, aborting job"
                );
                break;
            }

            // Backpressure gate: one chunk's worth of memory headroom must
            // exist before another page is pulled.
            if let Err(e) = self.wait_for_memory(&cancel).await {
                report.errors.push(ChunkFailure {
                    chunk: Some(chunk_index),
                    stage: "backpressure".to_string(),
                    message: e.to_string(),
                });
                fatal = true;
                break;
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let fetched = retry_if(
                &self.page_retry,
                "fetch_page",
                |_| extractor.fetch_page(query.as_ref(), token.as_deref(), self.config.extract_chunk_size),
                EtlError::is_retryable,
            )
            .await;

            let page = match fetched {
                Ok(page) => page,
                Err(e) => {
                    error!(job_id = %job_id, chunk = chunk_index, error = %e, "extraction failed");
                    report.errors.push(ChunkFailure {
                        chunk: Some(chunk_index),
                        stage: "extract".to_string(),
                        message: e.to_string(),
                    });
                    report.chunks_failed += 1;
                    chunk_index += 1;
                    // The pagination chain is broken; nothing further can be
                    // fetched for this job.
                    break;
                },
            };

            let done = page.next.is_none();

            if !page.items.is_empty() {
                let permit = tokio::select! {
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    },
                    permit = semaphore.clone().acquire_owned() => {
                        permit.map_err(|_| EtlError::Config("chunk semaphore closed".to_string()))?
                    },
                };

                debug!(job_id = %job_id, chunk = chunk_index, items = page.items.len(), "chunk admitted");

                let buffer = buffer.clone();
                let source_kind_id = source_kind_id.clone();
                let event_type = event_type.clone();
                let transform_batch_size = self.config.transform_batch_size;
                let items = page.items;
                tasks.spawn(async move {
                    let outcome = process_chunk(
                        chunk_index,
                        items,
                        &source_kind_id,
                        &event_type,
                        transform_batch_size,
                        buffer,
                    )
                    .await;
                    drop(permit);
                    outcome
                });
            }

            chunk_index += 1;
            token = page.next;

            // Fold in whatever finished while this page was being fetched.
            while let Some(joined) = tasks.try_join_next() {
                merge_outcome(&mut report, joined);
            }

            if done {
                break;
            }
        }

        // Let in-flight chunks finish; they were admitted before the loop
        // ended and their results belong in the report either way.
        while let Some(joined) = tasks.join_next().await {
            merge_outcome(&mut report, joined);
        }

        match buffer.flush().await {
            Ok(inserted) => report.items_inserted += inserted,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "final load flush failed");
                report.errors.push(ChunkFailure {
                    chunk: None,
                    stage: "load".to_string(),
                    message: e.to_string(),
                });
                report.chunks_failed += 1;
            },
        }

        if fatal || self.threshold_exceeded(&report, chunk_index) {
            report.status = JobStatus::Failed;
        }

        info!(
            job_id = %job_id,
            status = report.status.as_str(),
            items_processed = report.items_processed,
            items_inserted = report.items_inserted,
            chunks_processed = report.chunks_processed,
            chunks_failed = report.chunks_failed,
            "streaming job finished"
        );

        Ok(report)
    }

    fn threshold_exceeded(&self, report: &JobReport, chunks_seen: usize) -> bool {
        if chunks_seen == 0 || report.chunks_failed == 0 {
            return false;
        }
        (report.chunks_failed as f64 / chunks_seen as f64) > self.config.failure_threshold
    }

    /// Block until process memory drops below the threshold, the wait budget
    /// runs out, or the job is cancelled.
    async fn wait_for_memory(&self, cancel: &CancellationToken) -> EtlResult<()> {
        let threshold = self.config.memory_threshold_mb;
        if threshold == 0 {
            return Ok(());
        }

        let started = tokio::time::Instant::now();
        loop {
            let rss = self.probe.rss_mb();
            if rss < threshold {
                return Ok(());
            }
            if started.elapsed() >= self.config.backpressure_max_wait {
                return Err(EtlError::BackpressureTimeout {
                    waited: started.elapsed(),
                    threshold_mb: threshold,
                });
            }

            debug!(
                rss_mb = rss,
                threshold_mb = threshold,
                "memory above threshold, delaying chunk admission"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.backpressure_poll) => {},
            }
        }
    }
}

/// Transform one page and hand the events to the load buffer.
///
/// Stages are strictly sequential within the chunk. Item-level validation
/// failures are skipped and summarized; a load failure ends the chunk with
/// whatever was already inserted accounted for.
async fn process_chunk(
    index: usize,
    items: Vec<RawRecord>,
    source_kind_id: &str,
    event_type: &str,
    transform_batch_size: usize,
    buffer: Arc<LoadBuffer>,
) -> ChunkOutcome {
    let mut outcome = ChunkOutcome {
        index,
        processed: 0,
        skipped: 0,
        inserted: 0,
        skipped_note: None,
        failure: None,
    };
    let mut first_skip: Option<String> = None;

    for slice in items.chunks(transform_batch_size) {
        let mut events = Vec::with_capacity(slice.len());
        for raw in slice {
            match Event::from_raw(raw, source_kind_id, event_type) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(chunk = index, error = %e, "skipping malformed item");
                    outcome.skipped += 1;
                    first_skip.get_or_insert_with(|| e.to_string());
                },
            }
        }
        outcome.processed += events.len() as u64;

        match buffer.push(events).await {
            Ok(inserted) => outcome.inserted += inserted,
            Err(e) => {
                error!(chunk = index, error = %e, "load failed");
                outcome.failure = Some(ChunkFailure {
                    chunk: Some(index),
                    stage: "load".to_string(),
                    message: e.to_string(),
                });
                return outcome;
            },
        }
    }

    if outcome.skipped > 0 {
        outcome.skipped_note = Some(ChunkFailure {
            chunk: Some(index),
            stage: "transform".to_string(),
            message: format!(
                "{} of {} items failed validation (first: {})",
                outcome.skipped,
                items.len(),
                first_skip.unwrap_or_default()
            ),
        });
    }

    outcome
}

fn merge_outcome(
    report: &mut JobReport,
    joined: Result<ChunkOutcome, tokio::task::JoinError>,
) {
    match joined {
        Ok(outcome) => {
            report.items_processed += outcome.processed;
            report.items_skipped += outcome.skipped;
            report.items_inserted += outcome.inserted;
            if let Some(note) = outcome.skipped_note {
                report.errors.push(note);
            }
            match outcome.failure {
                Some(failure) => {
                    report.chunks_failed += 1;
                    report.errors.push(failure);
                },
                None => {
                    report.chunks_processed += 1;
                    debug!(chunk = outcome.index, inserted = outcome.inserted, "chunk complete");
                },
            }
        },
        Err(join_error) => {
            error!(error = %join_error, "chunk task aborted");
            report.chunks_failed += 1;
            report.errors.push(ChunkFailure {
                chunk: None,
                stage: "task".to_string(),
                message: join_error.to_string(),
            });
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(StreamingConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = StreamingConfig {
            load_batch_size: 0,
            ..StreamingConfig::default()
        };
        assert!(config.validate().is_err());

        let config = StreamingConfig {
            failure_threshold: 1.5,
            ..StreamingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn job_status_round_trip() {
        assert_eq!(JobStatus::Completed.as_str(), "completed");
        assert_eq!(JobStatus::Failed.as_str(), "failed");
    }
}
