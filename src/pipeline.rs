//! Batch controller: bounded admission, per-image jobs, failure handling.
//!
//! ## Job lifecycle
//!
//! ```text
//!   admitted ─▶ decode ─▶ step 1 ─▶ … ─▶ step N ─▶ encode ─▶ persisted
//!                  │         │              │         │
//!                  └─────────┴── failed ────┴─────────┘
//!   every exit: buffer disposed ─▶ memory check ─▶ permit released
//! ```
//!
//! The controller walks the inputs in order on the calling thread. Before
//! dispatching input *n* it takes a permit from the [`AdmissionGate`]
//! (capacity `max_parallel`), so at most `max_parallel` images are ever in
//! flight. The job itself runs on a dedicated rayon pool of the same size.
//! Steps inside a job are strictly sequential.
//!
//! When a job ends, its buffer has already gone back to the pool. The job
//! then runs the [`MemoryPolicy`] check and only afterwards releases its
//! permit: under memory pressure the next image waits for reclamation.
//! After the last job one more reclamation pass runs unconditionally.
//!
//! ## Failure policies
//!
//! | Policy | On a failed image |
//! |---|---|
//! | [`FailurePolicy::Abort`] | the batch continues; once every job has finished, [`PipelineController::run`] returns the failure of the earliest input |
//! | [`FailurePolicy::Isolate`] | the batch continues; the [`BatchReport`] lists every failure |
//!
//! ## Cancellation
//!
//! A [`CancelToken`] is checked before admission and between steps. A
//! cancelled job stops at the next boundary, is reported as failed with
//! [`JobError::Cancelled`], and writes no output. Inputs not yet admitted
//! are reported as skipped.

use crate::buffer::{BufferError, PixelBuffer};
use crate::imaging::{CodecError, ImageCodec};
use crate::memory::{DEFAULT_THRESHOLD_BYTES, MemoryPolicy, MemorySource};
use crate::operations::{JobContext, OperationChain, OperationError};
use crate::pool::{BufferPool, PoolError};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Cancellation and policy
// ============================================================================

/// Cooperative cancellation flag shared by the controller and its jobs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Abort,
    Isolate,
}

// ============================================================================
// Admission gate
// ============================================================================

#[derive(Debug, Default)]
struct GateState {
    in_use: usize,
    peak: usize,
}

/// Counting semaphore bounding the number of images in flight.
///
/// Waiters are not served in FIFO order.
#[derive(Debug)]
pub struct AdmissionGate {
    capacity: usize,
    state: Mutex<GateState>,
    released: Condvar,
}

impl AdmissionGate {
    /// A gate admitting `capacity` holders at once (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(GateState::default()),
            released: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block until a slot is free and take it.
    pub fn acquire(&self) -> Permit<'_> {
        let mut state = self.lock();
        while state.in_use >= self.capacity {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.in_use += 1;
        state.peak = state.peak.max(state.in_use);
        Permit { gate: self }
    }

    pub fn in_use(&self) -> usize {
        self.lock().in_use
    }

    /// Highest number of permits held at once.
    pub fn peak(&self) -> usize {
        self.lock().peak
    }
}

/// A held slot; dropping it frees the slot.
#[derive(Debug)]
pub struct Permit<'a> {
    gate: &'a AdmissionGate,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        state.in_use -= 1;
        drop(state);
        self.gate.released.notify_one();
    }
}

// ============================================================================
// Job results
// ============================================================================

/// Where in its lifecycle a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum JobStage {
    Admission,
    Decode,
    Transform { step: usize, operation: &'static str },
    Encode,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStage::Admission => f.write_str("admission"),
            JobStage::Decode => f.write_str("decode"),
            JobStage::Transform { step, operation } => write!(f, "step {step} ({operation})"),
            JobStage::Encode => f.write_str("encode"),
        }
    }
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Operation(#[from] OperationError),
    #[error("cancelled")]
    Cancelled,
}

impl From<BufferError> for JobError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Codec(e) => JobError::Codec(e),
            BufferError::Pool(e) => JobError::Pool(e),
        }
    }
}

fn serialize_display<T: fmt::Display, S: Serializer>(value: &T, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(value)
}

/// A failed image: which input, at which stage, and why.
#[derive(Debug, Serialize)]
pub struct JobFailure {
    pub sequence: u64,
    pub input: PathBuf,
    #[serde(flatten)]
    pub stage: JobStage,
    #[serde(rename = "reason", serialize_with = "serialize_display")]
    pub error: JobError,
}

impl JobFailure {
    fn new(job: &JobContext, stage: JobStage, error: impl Into<JobError>) -> Self {
        Self {
            sequence: job.sequence,
            input: job.source.clone(),
            stage,
            error: error.into(),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self.error, JobError::Cancelled)
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} failed: {}",
            self.input.display(),
            self.stage,
            self.error
        )
    }
}

/// A persisted image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub sequence: u64,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Summary of a batch run. Entries are ordered by input position.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<JobOutcome>,
    pub failed: Vec<JobFailure>,
    /// Inputs never admitted because the batch was cancelled.
    pub skipped: Vec<PathBuf>,
    /// Highest number of images that were in flight at once.
    pub peak_in_flight: usize,
    pub reclaim_passes: usize,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{}: {stage} failed: {source}", input.display())]
    Job {
        input: PathBuf,
        stage: JobStage,
        #[source]
        source: JobError,
    },
    #[error("cannot create output directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

// ============================================================================
// Progress events
// ============================================================================

/// Progress reported while a batch runs.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    BatchStarted {
        total: usize,
        max_parallel: usize,
        steps: Vec<&'static str>,
    },
    JobSucceeded {
        sequence: u64,
        input: PathBuf,
        output: PathBuf,
        millis: u128,
    },
    JobFailed {
        sequence: u64,
        input: PathBuf,
        stage: JobStage,
        reason: String,
    },
    JobSkipped {
        sequence: u64,
        input: PathBuf,
    },
    Reclaimed {
        /// The job whose completion triggered the pass; `None` for the final pass.
        after_sequence: Option<u64>,
        measured_bytes: u64,
        freed_bytes: usize,
    },
}

// ============================================================================
// Controller
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub max_parallel: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_parallel: crate::config::DEFAULT_MAX_PARALLEL,
            failure_policy: FailurePolicy::default(),
        }
    }
}

pub struct PipelineController<C: ImageCodec> {
    chain: OperationChain,
    codec: C,
    pool: Arc<BufferPool>,
    memory: MemoryPolicy,
    settings: PipelineSettings,
    events: Option<Sender<PipelineEvent>>,
}

impl<C: ImageCodec> PipelineController<C> {
    /// A controller with the default memory policy (resident memory, 1 GB).
    pub fn new(
        chain: OperationChain,
        codec: C,
        pool: Arc<BufferPool>,
        settings: PipelineSettings,
    ) -> Self {
        let memory =
            MemoryPolicy::for_pool(&pool, DEFAULT_THRESHOLD_BYTES, MemorySource::default());
        Self {
            chain,
            codec,
            pool,
            memory,
            settings,
            events: None,
        }
    }

    pub fn with_memory_policy(mut self, memory: MemoryPolicy) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_events(mut self, events: Sender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            tx.send(event).ok();
        }
    }

    /// Process every source into `output_dir`.
    pub fn run(&self, sources: &[PathBuf], output_dir: &Path) -> Result<BatchReport, PipelineError> {
        self.run_with_cancel(sources, output_dir, &CancelToken::new())
    }

    /// [`run`](Self::run) with an externally controlled cancel token.
    ///
    /// Cancellation alone never produces an error: the report lists the
    /// cancelled and skipped inputs.
    pub fn run_with_cancel(
        &self,
        sources: &[PathBuf],
        output_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<BatchReport, PipelineError> {
        std::fs::create_dir_all(output_dir).map_err(|source| PipelineError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let max_parallel = self.settings.max_parallel.max(1);
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(max_parallel)
            .thread_name(|i| format!("pixel-batch-{i}"))
            .build()?;
        let gate = AdmissionGate::new(max_parallel);
        let reclaim_passes_before = self.memory.passes();
        let succeeded = Mutex::new(Vec::new());
        let failed = Mutex::new(Vec::new());

        info!(
            total = sources.len(),
            max_parallel,
            steps = self.chain.len(),
            "batch started"
        );
        self.emit(PipelineEvent::BatchStarted {
            total: sources.len(),
            max_parallel,
            steps: self.chain.names(),
        });

        let skipped = workers.in_place_scope(|scope| {
            let mut skipped = Vec::new();
            for (index, source) in sources.iter().enumerate() {
                let sequence = index as u64 + 1;
                if cancel.is_cancelled() {
                    self.skip(sequence, source, &mut skipped);
                    continue;
                }
                let permit = gate.acquire();
                if cancel.is_cancelled() {
                    drop(permit);
                    self.skip(sequence, source, &mut skipped);
                    continue;
                }

                let job = JobContext::new(sequence, source.clone()).with_cancel(cancel.clone());
                let (succeeded, failed) = (&succeeded, &failed);
                scope.spawn(move |_| {
                    let started = Instant::now();
                    match self.process(&job, output_dir) {
                        Ok(outcome) => {
                            debug!(sequence, output = %outcome.output.display(), "persisted");
                            self.emit(PipelineEvent::JobSucceeded {
                                sequence,
                                input: outcome.input.clone(),
                                output: outcome.output.clone(),
                                millis: started.elapsed().as_millis(),
                            });
                            lock(succeeded).push(outcome);
                        }
                        Err(failure) => {
                            warn!(sequence, "{failure}");
                            self.emit(PipelineEvent::JobFailed {
                                sequence,
                                input: failure.input.clone(),
                                stage: failure.stage.clone(),
                                reason: failure.error.to_string(),
                            });
                            lock(failed).push(failure);
                        }
                    }
                    if let Some(outcome) = self.memory.check() {
                        self.emit(PipelineEvent::Reclaimed {
                            after_sequence: Some(sequence),
                            measured_bytes: outcome.measured_bytes,
                            freed_bytes: outcome.freed_bytes,
                        });
                    }
                    drop(permit);
                });
            }
            skipped
        });

        let final_pass = self.memory.reclaim_now();
        self.emit(PipelineEvent::Reclaimed {
            after_sequence: None,
            measured_bytes: final_pass.measured_bytes,
            freed_bytes: final_pass.freed_bytes,
        });

        let mut succeeded = succeeded.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mut failed = failed.into_inner().unwrap_or_else(PoisonError::into_inner);
        succeeded.sort_by_key(|o| o.sequence);
        failed.sort_by_key(|f| f.sequence);
        info!(
            succeeded = succeeded.len(),
            failed = failed.len(),
            skipped = skipped.len(),
            "batch finished"
        );

        // Every job has joined; abort reports the earliest input that failed.
        if self.settings.failure_policy == FailurePolicy::Abort
            && let Some(first) = failed.iter().position(|f| !f.is_cancellation())
        {
            let failure = failed.swap_remove(first);
            return Err(PipelineError::Job {
                input: failure.input,
                stage: failure.stage,
                source: failure.error,
            });
        }

        Ok(BatchReport {
            succeeded,
            failed,
            skipped,
            peak_in_flight: gate.peak(),
            reclaim_passes: self.memory.passes() - reclaim_passes_before,
        })
    }

    fn skip(&self, sequence: u64, source: &Path, skipped: &mut Vec<PathBuf>) {
        debug!(sequence, "not admitted");
        self.emit(PipelineEvent::JobSkipped {
            sequence,
            input: source.to_path_buf(),
        });
        skipped.push(source.to_path_buf());
    }

    /// Decode, transform, encode. The buffer is gone when this returns.
    fn process(&self, job: &JobContext, output_dir: &Path) -> Result<JobOutcome, JobFailure> {
        if job.cancel.is_cancelled() {
            return Err(JobFailure::new(job, JobStage::Admission, JobError::Cancelled));
        }

        let mut buffer = PixelBuffer::load_from(&self.codec, &self.pool, &job.source)
            .map_err(|e| JobFailure::new(job, JobStage::Decode, e))?;

        for (index, step) in self.chain.steps().enumerate() {
            let stage = JobStage::Transform {
                step: index + 1,
                operation: step.name(),
            };
            if job.cancel.is_cancelled() {
                return Err(JobFailure::new(job, stage, JobError::Cancelled));
            }
            if let Err(e) = step.apply(&mut buffer, job) {
                return Err(JobFailure::new(job, stage, e));
            }
        }
        if job.cancel.is_cancelled() {
            return Err(JobFailure::new(job, JobStage::Encode, JobError::Cancelled));
        }

        let output = output_dir.join(buffer.file_name());
        let external = buffer.to_external();
        buffer.dispose();
        self.codec
            .encode(&external, &output)
            .map_err(|e| JobFailure::new(job, JobStage::Encode, e))?;

        Ok(JobOutcome {
            sequence: job.sequence,
            input: job.source.clone(),
            output,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
