//! Resample to exact output dimensions.

use super::{JobContext, Operation, OperationError, rgb_image};
use crate::buffer::PixelBuffer;
use crate::config::ConfigError;
use crate::imaging::ExternalImage;
use image::imageops::{self, FilterType};

/// Resize to exactly `width` x `height` with a Lanczos3 filter. Aspect ratio
/// is not preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    width: u32,
    height: u32,
}

/// Largest output a resize may produce, in R,G,B bytes (4 GiB).
pub const MAX_OUTPUT_BYTES: u64 = 1 << 32;

impl Resize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Operation for Resize {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn describe(&self) -> String {
        format!("resize {}x{}", self.width, self.height)
    }

    fn configure(&mut self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Validation(format!(
                "resize dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        let bytes = u64::from(self.width)
            .saturating_mul(u64::from(self.height))
            .saturating_mul(3);
        if bytes > MAX_OUTPUT_BYTES {
            return Err(ConfigError::Validation(format!(
                "resize to {}x{} needs {bytes} bytes, more than the {MAX_OUTPUT_BYTES} byte limit",
                self.width, self.height
            )));
        }
        Ok(())
    }

    fn apply(&self, buffer: &mut PixelBuffer, _job: &JobContext) -> Result<(), OperationError> {
        if buffer.dimensions() == (self.width, self.height) {
            return Ok(());
        }
        // Resampling allocates the full target outside the pool.
        buffer.check_replace(self.width, self.height)?;
        let src = rgb_image(buffer)?;
        let resized = imageops::resize(&src, self.width, self.height, FilterType::Lanczos3);
        buffer.replace(&ExternalImage::from_rgb_image(&resized))?;
        Ok(())
    }
}
