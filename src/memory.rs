//! Memory-pressure backpressure.
//!
//! After every job, while the job still holds its admission permit, the
//! controller asks the [`MemoryPolicy`] to measure process memory. Above the
//! threshold it runs a reclamation pass and the job waits for it to finish
//! before releasing the permit, so no new job is admitted on top of a
//! bloated heap. One more pass runs after the whole batch.
//!
//! ## Measurement
//!
//! | Source | Reads |
//! |---|---|
//! | [`MemorySource::Resident`] | resident set size (`VmRSS` in `/proc/self/status`), falling back to pool accounting where that file does not exist |
//! | [`MemorySource::Pool`] | bytes the buffer pool has handed out plus bytes it keeps idle |
//!
//! Reclamation frees the pool's idle blocks ([`BufferPool::trim`]). Passes
//! are serialized: two jobs crossing the threshold at once reclaim one after
//! the other.

use crate::pool::BufferPool;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Default threshold: one gigabyte.
pub const DEFAULT_THRESHOLD_BYTES: u64 = 1_000_000_000;

const STATUS_PATH: &str = "/proc/self/status";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    #[default]
    Resident,
    Pool,
}

/// Reports the current memory footprint in bytes.
pub trait MemoryProbe: Send + Sync {
    fn current_bytes(&self) -> u64;
}

/// Frees memory. Returns the number of bytes released.
pub trait Reclaimer: Send + Sync {
    fn reclaim(&self) -> usize;
}

/// Pool-side accounting: outstanding plus retained capacity.
pub struct PoolAccounting {
    pool: Arc<BufferPool>,
}

impl PoolAccounting {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self { pool }
    }
}

impl MemoryProbe for PoolAccounting {
    fn current_bytes(&self) -> u64 {
        let stats = self.pool.stats();
        (stats.outstanding_bytes + stats.retained_bytes) as u64
    }
}

/// Resident set size of this process.
pub struct ResidentMemory {
    fallback: PoolAccounting,
}

impl ResidentMemory {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            fallback: PoolAccounting::new(pool),
        }
    }
}

/// Resident bytes from the `VmRSS:` line of a `/proc/<pid>/status` file.
///
/// The kernel reports kB, so the result does not depend on the page size.
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let mut fields = line["VmRSS:".len()..].split_whitespace();
    let kib: u64 = fields.next()?.parse().ok()?;
    match fields.next() {
        Some("kB") => kib.checked_mul(1024),
        _ => None,
    }
}

impl MemoryProbe for ResidentMemory {
    fn current_bytes(&self) -> u64 {
        std::fs::read_to_string(STATUS_PATH)
            .ok()
            .as_deref()
            .and_then(parse_vm_rss)
            .unwrap_or_else(|| self.fallback.current_bytes())
    }
}

/// Reclaims by dropping the pool's idle blocks.
pub struct PoolReclaimer {
    pool: Arc<BufferPool>,
}

impl PoolReclaimer {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self { pool }
    }
}

impl Reclaimer for PoolReclaimer {
    fn reclaim(&self) -> usize {
        self.pool.trim()
    }
}

/// Result of one reclamation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimOutcome {
    pub measured_bytes: u64,
    pub freed_bytes: usize,
}

pub struct MemoryPolicy {
    threshold_bytes: u64,
    probe: Box<dyn MemoryProbe>,
    reclaimer: Box<dyn Reclaimer>,
    pass_lock: Mutex<()>,
    passes: AtomicUsize,
}

impl MemoryPolicy {
    pub fn new(
        threshold_bytes: u64,
        probe: Box<dyn MemoryProbe>,
        reclaimer: Box<dyn Reclaimer>,
    ) -> Self {
        Self {
            threshold_bytes,
            probe,
            reclaimer,
            pass_lock: Mutex::new(()),
            passes: AtomicUsize::new(0),
        }
    }

    /// Policy measuring `source` and reclaiming from `pool`.
    pub fn for_pool(pool: &Arc<BufferPool>, threshold_bytes: u64, source: MemorySource) -> Self {
        let probe: Box<dyn MemoryProbe> = match source {
            MemorySource::Resident => Box::new(ResidentMemory::new(Arc::clone(pool))),
            MemorySource::Pool => Box::new(PoolAccounting::new(Arc::clone(pool))),
        };
        Self::new(
            threshold_bytes,
            probe,
            Box::new(PoolReclaimer::new(Arc::clone(pool))),
        )
    }

    pub fn threshold_bytes(&self) -> u64 {
        self.threshold_bytes
    }

    /// Number of reclamation passes run so far.
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }

    /// Measure, and reclaim if strictly above the threshold.
    ///
    /// Blocks until the pass completes; returns `None` when no pass ran.
    pub fn check(&self) -> Option<ReclaimOutcome> {
        let measured = self.probe.current_bytes();
        if measured <= self.threshold_bytes {
            return None;
        }
        debug!(
            measured,
            threshold = self.threshold_bytes,
            "memory above threshold, reclaiming"
        );
        Some(self.reclaim_measured(measured))
    }

    /// Run a pass regardless of the measurement.
    pub fn reclaim_now(&self) -> ReclaimOutcome {
        self.reclaim_measured(self.probe.current_bytes())
    }

    fn reclaim_measured(&self, measured_bytes: u64) -> ReclaimOutcome {
        let _pass = self.pass_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let freed_bytes = self.reclaimer.reclaim();
        self.passes.fetch_add(1, Ordering::SeqCst);
        debug!(freed_bytes, "reclamation pass complete");
        ReclaimOutcome {
            measured_bytes,
            freed_bytes,
        }
    }
}

impl std::fmt::Debug for MemoryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPolicy")
            .field("threshold_bytes", &self.threshold_bytes)
            .field("passes", &self.passes())
            .finish()
    }
}
