//! Rotation about the image centre on a canvas of the original size.
//!
//! Positive angles turn the picture clockwise. Each destination pixel is
//! mapped back into the source and sampled bilinearly; destinations that
//! map outside the source stay black. Corners are clipped for angles that
//! are not multiples of 180°.

use super::{JobContext, Operation, OperationError};
use crate::buffer::PixelBuffer;
use crate::config::ConfigError;
use crate::imaging::ExternalImage;
use crate::imaging::calculations::{bilinear_cell, inverse_rotate};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotate {
    degrees: f64,
}

impl Rotate {
    pub fn new(degrees: f64) -> Self {
        Self { degrees }
    }
}

fn lerp(a: u8, b: u8, t: f64) -> f64 {
    a as f64 + (b as f64 - a as f64) * t
}

/// Render `src` (packed R,G,B, `dims`) rotated by `radians` into a B,G,R
/// external image of the same size.
fn rotate_rgb(src: &[u8], dims: (u32, u32), radians: f64) -> ExternalImage {
    let (w, h) = dims;
    let mut out = ExternalImage::new(w, h);
    let center = (w as f64 / 2.0, h as f64 / 2.0);
    let at = |x: u32, y: u32, c: usize| src[(y as usize * w as usize + x as usize) * 3 + c];

    for y in 0..h {
        let row = out.row_mut(y);
        for x in 0..w {
            let (sx, sy) = inverse_rotate((x as f64 + 0.5, y as f64 + 0.5), center, radians);
            let Some((x0, y0, fx, fy)) = bilinear_cell(sx - 0.5, sy - 0.5, dims) else {
                continue;
            };
            let x1 = (x0 + 1).min(w - 1);
            let y1 = (y0 + 1).min(h - 1);
            let dst = &mut row[x as usize * 3..x as usize * 3 + 3];
            for c in 0..3 {
                let top = lerp(at(x0, y0, c), at(x1, y0, c), fx);
                let bottom = lerp(at(x0, y1, c), at(x1, y1, c), fx);
                let v = top + (bottom - top) * fy;
                // External layout is B,G,R.
                dst[2 - c] = v.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

impl Operation for Rotate {
    fn name(&self) -> &'static str {
        "rotate"
    }

    fn describe(&self) -> String {
        format!("rotate {}°", self.degrees)
    }

    fn configure(&mut self) -> Result<(), ConfigError> {
        if !self.degrees.is_finite() {
            return Err(ConfigError::Validation(format!(
                "rotation angle must be finite, got {}",
                self.degrees
            )));
        }
        Ok(())
    }

    fn apply(&self, buffer: &mut PixelBuffer, _job: &JobContext) -> Result<(), OperationError> {
        if self.degrees.rem_euclid(360.0) == 0.0 {
            return Ok(());
        }
        let rotated = rotate_rgb(buffer.as_bytes(), buffer.dimensions(), self.degrees.to_radians());
        buffer.replace(&rotated)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{buffer_from_pixels, gradient_buffer, job, pixels, test_pool};

    const A: [u8; 3] = [10, 0, 0];
    const B: [u8; 3] = [20, 0, 0];
    const C: [u8; 3] = [30, 0, 0];
    const D: [u8; 3] = [40, 0, 0];

    #[test]
    fn quarter_turn_clockwise() {
        // A B      C A
        // C D  ->  D B
        let pool = test_pool();
        let mut buf = buffer_from_pixels("a.png", 2, 2, &[A, B, C, D], &pool);
        Rotate::new(90.0).apply(&mut buf, &job(1)).unwrap();
        assert_eq!(pixels(&buf), vec![C, A, D, B]);
    }

    #[test]
    fn negative_quarter_turn_is_counter_clockwise() {
        let pool = test_pool();
        let mut buf = buffer_from_pixels("a.png", 2, 2, &[A, B, C, D], &pool);
        Rotate::new(-90.0).apply(&mut buf, &job(1)).unwrap();
        assert_eq!(pixels(&buf), vec![B, D, A, C]);
    }

    #[test]
    fn half_turn_reverses_pixels() {
        let pool = test_pool();
        let mut buf = gradient_buffer("a.png", 5, 3, &pool);
        let mut expected = pixels(&buf);
        expected.reverse();
        Rotate::new(180.0).apply(&mut buf, &job(1)).unwrap();
        assert_eq!(pixels(&buf), expected);
    }

    #[test]
    fn full_turn_is_noop() {
        let pool = test_pool();
        let mut buf = gradient_buffer("a.png", 4, 4, &pool);
        let before = buf.as_bytes().to_vec();
        Rotate::new(720.0).apply(&mut buf, &job(1)).unwrap();
        assert_eq!(buf.as_bytes(), before.as_slice());
    }

    #[test]
    fn keeps_canvas_and_fills_corners_black() {
        let pool = test_pool();
        let mut buf = buffer_from_pixels("a.png", 9, 9, &[[255, 255, 255]; 81], &pool);
        Rotate::new(45.0).apply(&mut buf, &job(1)).unwrap();
        assert_eq!(buf.dimensions(), (9, 9));
        let px = pixels(&buf);
        assert_eq!(px[0], [0, 0, 0]);
        assert_eq!(px[4 * 9 + 4], [255, 255, 255]);
    }

    #[test]
    fn non_square_quarter_turn_keeps_dimensions() {
        let pool = test_pool();
        let mut buf = gradient_buffer("a.png", 8, 4, &pool);
        Rotate::new(90.0).apply(&mut buf, &job(1)).unwrap();
        assert_eq!(buf.dimensions(), (8, 4));
        assert_eq!(buf.as_bytes().len(), 8 * 4 * 3);
    }

    #[test]
    fn non_finite_angle_rejected() {
        assert!(Rotate::new(f64::NAN).configure().is_err());
        assert!(Rotate::new(f64::INFINITY).configure().is_err());
        assert!(Rotate::new(12.5).configure().is_ok());
    }
}
