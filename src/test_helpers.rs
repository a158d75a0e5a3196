//! Shared test utilities for the pixel-batch test suite.
//!
//! Provides image fixtures (in memory and on disk), buffer helpers, and a
//! handful of instrumented [`Operation`]s used to observe the controller's
//! concurrency from inside a running chain.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let pool = test_pool();
//! let buf = buffer_from_pixels("a.png", 2, 1, &[[200, 10, 10], [0, 0, 0]], &pool);
//! assert_eq!(pixels(&buf), vec![[200, 10, 10], [0, 0, 0]]);
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};

use crate::buffer::PixelBuffer;
use crate::config::ConfigError;
use crate::imaging::ExternalImage;
use crate::operations::{JobContext, Operation, OperationError};
use crate::pool::{BufferPool, PoolLimits};

// =========================================================================
// Image fixtures
// =========================================================================

/// A private pool with default limits, so tests never share statistics.
pub fn test_pool() -> Arc<BufferPool> {
    Arc::new(BufferPool::new(PoolLimits::default()))
}

/// Deterministic RGB pattern where neighbouring pixels differ.
pub fn gradient_rgb(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 37 % 256) as u8,
            (y * 53 % 256) as u8,
            ((x + y) * 19 % 256) as u8,
        ])
    })
}

pub fn write_png(path: &Path, image: &RgbImage) {
    image.save_with_format(path, ImageFormat::Png).unwrap();
}

/// Build an external image from R,G,B triples in row-major order.
pub fn external_from_pixels(width: u32, height: u32, pixels: &[[u8; 3]]) -> ExternalImage {
    let raw: Vec<u8> = pixels.iter().flatten().copied().collect();
    let rgb = RgbImage::from_raw(width, height, raw).expect("pixel count matches dimensions");
    ExternalImage::from_rgb_image(&rgb)
}

pub fn buffer_from_pixels(
    name: &str,
    width: u32,
    height: u32,
    pixels: &[[u8; 3]],
    pool: &Arc<BufferPool>,
) -> PixelBuffer {
    PixelBuffer::from_external(name, &external_from_pixels(width, height, pixels), pool).unwrap()
}

pub fn gradient_buffer(name: &str, width: u32, height: u32, pool: &Arc<BufferPool>) -> PixelBuffer {
    PixelBuffer::from_external(
        name,
        &ExternalImage::from_rgb_image(&gradient_rgb(width, height)),
        pool,
    )
    .unwrap()
}

/// The buffer's pixels as R,G,B triples.
pub fn pixels(buffer: &PixelBuffer) -> Vec<[u8; 3]> {
    buffer
        .as_bytes()
        .chunks_exact(3)
        .map(|p| [p[0], p[1], p[2]])
        .collect()
}

pub fn job(sequence: u64) -> JobContext {
    JobContext::new(sequence, format!("/in/{sequence}.png"))
}

// =========================================================================
// Instrumented operations
// =========================================================================

/// Records how many jobs are inside `apply` at once.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Holds each job for `hold` while counting concurrent callers.
pub struct GaugedStep {
    pub gauge: Arc<ConcurrencyGauge>,
    pub hold: Duration,
}

impl Operation for GaugedStep {
    fn name(&self) -> &'static str {
        "gauged"
    }

    fn configure(&mut self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn apply(&self, _buffer: &mut PixelBuffer, _job: &JobContext) -> Result<(), OperationError> {
        let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        self.gauge.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.hold);
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One-shot gate: closed until [`Latch::open`] is called.
#[derive(Debug, Default)]
pub struct Latch {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }

    /// Wait until open. Panics after ten seconds so a broken test cannot hang.
    pub fn wait(&self) {
        let guard = self.open.lock().unwrap();
        let (guard, timeout) = self
            .cond
            .wait_timeout_while(guard, Duration::from_secs(10), |open| !*open)
            .unwrap();
        assert!(*guard && !timeout.timed_out(), "latch never opened");
    }
}

/// Blocks the job with sequence `sequence` until the latch opens.
pub struct StallUntil {
    pub latch: Arc<Latch>,
    pub sequence: u64,
}

impl Operation for StallUntil {
    fn name(&self) -> &'static str {
        "stall"
    }

    fn configure(&mut self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn apply(&self, _buffer: &mut PixelBuffer, job: &JobContext) -> Result<(), OperationError> {
        if job.sequence == self.sequence {
            self.latch.wait();
        }
        Ok(())
    }
}

/// Opens the latch when the job with sequence `sequence` reaches this step.
pub struct OpenLatch {
    pub latch: Arc<Latch>,
    pub sequence: u64,
}

impl Operation for OpenLatch {
    fn name(&self) -> &'static str {
        "open-latch"
    }

    fn configure(&mut self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn apply(&self, _buffer: &mut PixelBuffer, job: &JobContext) -> Result<(), OperationError> {
        if job.sequence == self.sequence {
            self.latch.open();
        }
        Ok(())
    }
}

/// Fails with a processing error for the job with sequence `sequence`.
pub struct FailOn {
    pub sequence: u64,
}

impl Operation for FailOn {
    fn name(&self) -> &'static str {
        "fail"
    }

    fn configure(&mut self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn apply(&self, _buffer: &mut PixelBuffer, job: &JobContext) -> Result<(), OperationError> {
        if job.sequence == self.sequence {
            return Err(OperationError::Processing("induced failure".to_string()));
        }
        Ok(())
    }
}

/// Trips the batch's cancel token from inside the job with `sequence`.
pub struct CancelOn {
    pub sequence: u64,
}

impl Operation for CancelOn {
    fn name(&self) -> &'static str {
        "cancel"
    }

    fn configure(&mut self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn apply(&self, _buffer: &mut PixelBuffer, job: &JobContext) -> Result<(), OperationError> {
        if job.sequence == self.sequence {
            job.cancel.cancel();
        }
        Ok(())
    }
}
