//! Replace strongly coloured pixels with a pure primary.
//!
//! A pixel "is" a channel when that channel is above [`STRONG`] and both
//! others are below [`WEAK`]. Matching pixels become pure `replace`
//! (that channel 255, the others 0); everything else is left alone.

use super::{JobContext, Operation, OperationError};
use crate::buffer::PixelBuffer;
use crate::config::ConfigError;
use crate::imaging::Channel;

/// The detected channel must exceed this.
pub const STRONG: u8 = 150;
/// Both other channels must be below this.
pub const WEAK: u8 = 100;

/// Whether an R,G,B pixel is dominated by `channel`.
pub fn is_dominant(px: &[u8], channel: Channel) -> bool {
    let c = channel.rgb_offset();
    (0..3).all(|i| if i == c { px[i] > STRONG } else { px[i] < WEAK })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorMap {
    detect: Channel,
    replace: Channel,
}

impl ColorMap {
    pub fn new(detect: Channel, replace: Channel) -> Self {
        Self { detect, replace }
    }
}

impl Operation for ColorMap {
    fn name(&self) -> &'static str {
        "color_map"
    }

    fn describe(&self) -> String {
        format!("color_map {} -> {}", self.detect, self.replace)
    }

    fn configure(&mut self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn apply(&self, buffer: &mut PixelBuffer, _job: &JobContext) -> Result<(), OperationError> {
        let mut target = [0u8; 3];
        target[self.replace.rgb_offset()] = 255;
        for px in buffer.as_bytes_mut().chunks_exact_mut(3) {
            if is_dominant(px, self.detect) {
                px.copy_from_slice(&target);
            }
        }
        Ok(())
    }
}
