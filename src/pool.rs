//! Reusable byte blocks for pixel storage.
//!
//! Decoding a batch of photos allocates one large block per image, and the
//! geometry operations (crop, resize, rotate) allocate another each time they
//! change the dimensions. The pool keeps released blocks around, grouped by
//! size class, so the next image of a similar size reuses memory instead of
//! going back to the allocator.
//!
//! ## Size classes
//!
//! A request for `n` bytes is served from the class `max(4096, n.next_power_of_two())`.
//! The granted block is therefore usually larger than requested; a [`Rental`]
//! only ever exposes the first `n` bytes.
//!
//! ## Ownership
//!
//! A [`Rental`] is the single live owner of its block. Dropping it (or calling
//! [`Rental::release`]) hands the block back exactly once. There is no way to
//! return a block twice or to keep using it after it went back.
//!
//! ## Limits
//!
//! - `max_retained_bytes` caps the idle memory the pool holds on to. Blocks
//!   released beyond that cap are freed immediately.
//! - `max_outstanding_bytes` (optional) caps the memory rented out at once.
//!   A rent past the cap fails with [`PoolError::Exhausted`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Smallest block the pool hands out.
pub const MIN_BLOCK_SIZE: usize = 4096;

/// Default cap on idle memory kept for reuse (256 MiB).
pub const DEFAULT_MAX_RETAINED_BYTES: usize = 256 * 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error(
        "pool exhausted: cannot rent {requested} bytes with {outstanding} outstanding (limit {limit})"
    )]
    Exhausted {
        requested: usize,
        outstanding: usize,
        limit: usize,
    },
    #[error("allocation of {requested} bytes failed")]
    AllocationFailed { requested: usize },
}

/// Capacity limits for a [`BufferPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    pub max_retained_bytes: usize,
    pub max_outstanding_bytes: Option<usize>,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_retained_bytes: DEFAULT_MAX_RETAINED_BYTES,
            max_outstanding_bytes: None,
        }
    }
}

/// Point-in-time counters of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub outstanding_blocks: usize,
    /// Granted capacity currently rented out (size-class bytes, not logical bytes).
    pub outstanding_bytes: usize,
    pub peak_outstanding_bytes: usize,
    pub retained_blocks: usize,
    pub retained_bytes: usize,
    pub rents: u64,
    /// Rents served from an idle block instead of a fresh allocation.
    pub reuses: u64,
}

#[derive(Default)]
struct PoolState {
    idle: BTreeMap<usize, Vec<Vec<u8>>>,
    stats: PoolStats,
}

/// Thread-safe store of reusable byte blocks keyed by size class.
pub struct BufferPool {
    limits: PoolLimits,
    state: Mutex<PoolState>,
}

static SHARED: LazyLock<Arc<BufferPool>> =
    LazyLock::new(|| Arc::new(BufferPool::new(PoolLimits::default())));

/// Size class serving a request of `len` bytes.
pub fn size_class(len: usize) -> usize {
    len.max(MIN_BLOCK_SIZE).next_power_of_two()
}

fn allocate(class: usize) -> Result<Vec<u8>, PoolError> {
    let mut block = Vec::new();
    block
        .try_reserve_exact(class)
        .map_err(|_| PoolError::AllocationFailed { requested: class })?;
    block.resize(class, 0);
    Ok(block)
}

impl BufferPool {
    pub fn new(limits: PoolLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// The process-wide pool, created with default limits on first use.
    pub fn shared() -> Arc<BufferPool> {
        Arc::clone(&SHARED)
    }

    pub fn limits(&self) -> PoolLimits {
        self.limits
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Critical sections never leave counters half-updated; poison is ignored.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rent a block whose logical view is exactly `len` bytes.
    ///
    /// The block may contain bytes from a previous renter; callers overwrite
    /// the whole view before reading it.
    pub fn rent(self: &Arc<Self>, len: usize) -> Result<Rental, PoolError> {
        let class = size_class(len);

        let reused = {
            let mut state = self.lock();
            if let Some(limit) = self.limits.max_outstanding_bytes
                && state.stats.outstanding_bytes + class > limit
            {
                return Err(PoolError::Exhausted {
                    requested: len,
                    outstanding: state.stats.outstanding_bytes,
                    limit,
                });
            }
            let reused = state.idle.get_mut(&class).and_then(Vec::pop);
            let stats = &mut state.stats;
            if reused.is_some() {
                stats.retained_blocks -= 1;
                stats.retained_bytes -= class;
                stats.reuses += 1;
            }
            stats.rents += 1;
            stats.outstanding_blocks += 1;
            stats.outstanding_bytes += class;
            stats.peak_outstanding_bytes =
                stats.peak_outstanding_bytes.max(stats.outstanding_bytes);
            reused
        };

        let block = match reused {
            Some(block) => block,
            None => match allocate(class) {
                Ok(block) => block,
                Err(err) => {
                    let mut state = self.lock();
                    state.stats.outstanding_blocks -= 1;
                    state.stats.outstanding_bytes -= class;
                    return Err(err);
                }
            },
        };

        tracing::trace!(len, class, "rent");
        Ok(Rental {
            block,
            len,
            pool: Arc::clone(self),
        })
    }

    /// Fail with [`PoolError::Exhausted`] if a rent of `len` bytes would
    /// break `max_outstanding_bytes` once `releasing` bytes of outstanding
    /// capacity have been returned. Nothing is rented.
    pub fn check_fits(&self, len: usize, releasing: usize) -> Result<(), PoolError> {
        let Some(limit) = self.limits.max_outstanding_bytes else {
            return Ok(());
        };
        let outstanding = self.lock().stats.outstanding_bytes.saturating_sub(releasing);
        if outstanding + size_class(len) > limit {
            return Err(PoolError::Exhausted {
                requested: len,
                outstanding,
                limit,
            });
        }
        Ok(())
    }

    fn give_back(&self, block: Vec<u8>) {
        let class = block.len();
        if class == 0 {
            return;
        }
        let mut state = self.lock();
        state.stats.outstanding_blocks -= 1;
        state.stats.outstanding_bytes -= class;
        if state.stats.retained_bytes + class <= self.limits.max_retained_bytes {
            state.stats.retained_blocks += 1;
            state.stats.retained_bytes += class;
            state.idle.entry(class).or_default().push(block);
        } else {
            drop(state);
            drop(block);
        }
        tracing::trace!(class, "release");
    }

    /// Free every idle block. Returns the number of bytes handed back to the
    /// allocator. Outstanding rentals are untouched.
    pub fn trim(&self) -> usize {
        let (idle, freed) = {
            let mut state = self.lock();
            state.stats.retained_blocks = 0;
            let freed = std::mem::take(&mut state.stats.retained_bytes);
            (std::mem::take(&mut state.idle), freed)
        };
        drop(idle);
        tracing::debug!(freed, "pool trimmed");
        freed
    }

    pub fn stats(&self) -> PoolStats {
        self.lock().stats
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("limits", &self.limits)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Exclusive lease on one pooled block.
///
/// Exposes only the requested length; the rest of the granted capacity is
/// never visible. The block returns to its pool when the rental is released
/// or dropped.
pub struct Rental {
    block: Vec<u8>,
    len: usize,
    pool: Arc<BufferPool>,
}

impl Rental {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Granted capacity (the size class), always `>= len()`.
    pub fn capacity(&self) -> usize {
        self.block.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.block[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.block[..self.len]
    }

    /// Hand the block back to the pool now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Rental {
    fn drop(&mut self) {
        let block = std::mem::take(&mut self.block);
        self.pool.give_back(block);
    }
}

impl fmt::Debug for Rental {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rental")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Arc<BufferPool> {
        Arc::new(BufferPool::new(PoolLimits::default()))
    }

    #[test]
    fn size_class_rounds_up_to_power_of_two() {
        assert_eq!(size_class(0), 4096);
        assert_eq!(size_class(1), 4096);
        assert_eq!(size_class(4096), 4096);
        assert_eq!(size_class(4097), 8192);
        assert_eq!(size_class(300_000), 524_288);
    }

    #[test]
    fn rental_exposes_only_requested_length() {
        let pool = pool();
        let rental = pool.rent(30).unwrap();
        assert_eq!(rental.len(), 30);
        assert_eq!(rental.as_slice().len(), 30);
        assert!(rental.capacity() >= 30);
        assert_eq!(rental.capacity(), 4096);
    }

    #[test]
    fn released_block_is_reused_for_same_class() {
        let pool = pool();
        let first = pool.rent(5000).unwrap();
        first.release();
        assert_eq!(pool.stats().retained_blocks, 1);

        let second = pool.rent(6000).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.reuses, 1);
        assert_eq!(stats.retained_blocks, 0);
        assert_eq!(second.capacity(), 8192);
    }

    #[test]
    fn different_class_allocates_fresh() {
        let pool = pool();
        pool.rent(100).unwrap().release();
        let _big = pool.rent(100_000).unwrap();
        assert_eq!(pool.stats().reuses, 0);
        assert_eq!(pool.stats().retained_blocks, 1);
    }

    #[test]
    fn drop_returns_block_exactly_once() {
        let pool = pool();
        {
            let _a = pool.rent(10).unwrap();
            let _b = pool.rent(10).unwrap();
            assert_eq!(pool.stats().outstanding_blocks, 2);
        }
        let stats = pool.stats();
        assert_eq!(stats.outstanding_blocks, 0);
        assert_eq!(stats.outstanding_bytes, 0);
        assert_eq!(stats.retained_blocks, 2);
    }

    #[test]
    fn outstanding_limit_reports_exhaustion() {
        let pool = Arc::new(BufferPool::new(PoolLimits {
            max_retained_bytes: DEFAULT_MAX_RETAINED_BYTES,
            max_outstanding_bytes: Some(8192),
        }));
        let _a = pool.rent(4096).unwrap();
        let _b = pool.rent(4096).unwrap();
        let err = pool.rent(1).unwrap_err();
        assert!(matches!(
            err,
            PoolError::Exhausted {
                requested: 1,
                outstanding: 8192,
                limit: 8192
            }
        ));
        // The failed rent must not leak accounting.
        assert_eq!(pool.stats().outstanding_blocks, 2);
    }

    #[test]
    fn check_fits_counts_capacity_about_to_be_released() {
        let pool = Arc::new(BufferPool::new(PoolLimits {
            max_retained_bytes: DEFAULT_MAX_RETAINED_BYTES,
            max_outstanding_bytes: Some(8192),
        }));
        let held = pool.rent(4096).unwrap();
        assert!(pool.check_fits(8192, held.capacity()).is_ok());
        assert!(matches!(
            pool.check_fits(8192, 0),
            Err(PoolError::Exhausted {
                requested: 8192,
                outstanding: 4096,
                limit: 8192
            })
        ));
        assert!(pool.check_fits(8193, held.capacity()).is_err());
        assert_eq!(pool.stats().rents, 1);
    }

    #[test]
    fn check_fits_without_limit_always_passes() {
        assert!(pool().check_fits(usize::MAX / 4, 0).is_ok());
    }

    #[test]
    fn exhaustion_clears_after_release() {
        let pool = Arc::new(BufferPool::new(PoolLimits {
            max_retained_bytes: DEFAULT_MAX_RETAINED_BYTES,
            max_outstanding_bytes: Some(4096),
        }));
        let a = pool.rent(4096).unwrap();
        assert!(pool.rent(4096).is_err());
        a.release();
        assert!(pool.rent(4096).is_ok());
    }

    #[test]
    fn retained_cap_frees_excess_blocks() {
        let pool = Arc::new(BufferPool::new(PoolLimits {
            max_retained_bytes: 4096,
            max_outstanding_bytes: None,
        }));
        let a = pool.rent(10).unwrap();
        let b = pool.rent(10).unwrap();
        a.release();
        b.release();
        let stats = pool.stats();
        assert_eq!(stats.retained_blocks, 1);
        assert_eq!(stats.retained_bytes, 4096);
    }

    #[test]
    fn trim_frees_idle_blocks_only() {
        let pool = pool();
        let keep = pool.rent(10).unwrap();
        pool.rent(10).unwrap().release();
        pool.rent(10_000).unwrap().release();

        let freed = pool.trim();
        assert_eq!(freed, 4096 + 16384);
        let stats = pool.stats();
        assert_eq!(stats.retained_blocks, 0);
        assert_eq!(stats.outstanding_blocks, 1);
        assert_eq!(keep.len(), 10);
    }

    #[test]
    fn peak_tracks_high_water_mark() {
        let pool = pool();
        let a = pool.rent(10).unwrap();
        let b = pool.rent(10).unwrap();
        drop(a);
        drop(b);
        let _c = pool.rent(10).unwrap();
        assert_eq!(pool.stats().peak_outstanding_bytes, 8192);
    }

    #[test]
    fn concurrent_rent_and_release_balance() {
        let pool = pool();
        std::thread::scope(|s| {
            for _ in 0..8 {
                let pool = Arc::clone(&pool);
                s.spawn(move || {
                    for i in 0..200 {
                        let mut rental = pool.rent(1000 + i).unwrap();
                        rental.as_mut_slice()[0] = 1;
                    }
                });
            }
        });
        let stats = pool.stats();
        assert_eq!(stats.outstanding_blocks, 0);
        assert_eq!(stats.outstanding_bytes, 0);
        assert_eq!(stats.rents, 1600);
    }

    #[test]
    fn shared_pool_is_a_single_instance() {
        assert!(Arc::ptr_eq(&BufferPool::shared(), &BufferPool::shared()));
    }
}
