//! Luminance conversion.

use super::{JobContext, Operation, OperationError};
use crate::buffer::PixelBuffer;
use crate::config::ConfigError;

/// Weighted luminance of one R,G,B pixel, in integer arithmetic.
///
/// Weights are 0.30 / 0.59 / 0.11. For a pixel that is already gray the
/// weights sum to exactly 100, so the result equals the input.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((30 * r as u32 + 59 * g as u32 + 11 * b as u32) / 100) as u8
}

/// Replaces every channel with the pixel's luminance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Grayscale;

impl Operation for Grayscale {
    fn name(&self) -> &'static str {
        "grayscale"
    }

    fn configure(&mut self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn apply(&self, buffer: &mut PixelBuffer, _job: &JobContext) -> Result<(), OperationError> {
        for px in buffer.as_bytes_mut().chunks_exact_mut(3) {
            let y = luma(px[0], px[1], px[2]);
            px.fill(y);
        }
        Ok(())
    }
}
