//! Keep a rectangle of the image.

use super::{JobContext, Operation, OperationError};
use crate::buffer::PixelBuffer;
use crate::config::ConfigError;
use crate::imaging::CropRect;
use crate::imaging::calculations::crop_fits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    rect: CropRect,
}

impl Crop {
    pub fn new(rect: CropRect) -> Self {
        Self { rect }
    }
}

impl Operation for Crop {
    fn name(&self) -> &'static str {
        "crop"
    }

    fn describe(&self) -> String {
        format!("crop {}", self.rect)
    }

    fn configure(&mut self) -> Result<(), ConfigError> {
        if self.rect.width == 0 || self.rect.height == 0 {
            return Err(ConfigError::Validation(format!(
                "crop rectangle must be non-empty, got {}",
                self.rect
            )));
        }
        Ok(())
    }

    /// Fails with [`OperationError::OutOfBounds`] before touching the buffer
    /// when the rectangle does not fit.
    fn apply(&self, buffer: &mut PixelBuffer, _job: &JobContext) -> Result<(), OperationError> {
        let (width, height) = buffer.dimensions();
        if !crop_fits(self.rect, (width, height)) {
            return Err(OperationError::OutOfBounds {
                rect: self.rect,
                width,
                height,
            });
        }
        let cropped = buffer.to_external().crop(self.rect);
        buffer.replace(&cropped)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{buffer_from_pixels, gradient_buffer, job, pixels, test_pool};

    fn rect(x: u32, y: u32, width: u32, height: u32) -> CropRect {
        CropRect {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn in_bounds_has_exact_dimensions() {
        let pool = test_pool();
        let mut buf = gradient_buffer("a.png", 10, 8, &pool);
        Crop::new(rect(2, 3, 5, 4)).apply(&mut buf, &job(1)).unwrap();
        assert_eq!(buf.dimensions(), (5, 4));
        assert_eq!(buf.as_bytes().len(), 5 * 4 * 3);
    }

    #[test]
    fn copies_the_right_pixels() {
        let pool = test_pool();
        let px: Vec<[u8; 3]> = (0..9).map(|i| [i as u8, 0, 0]).collect();
        let mut buf = buffer_from_pixels("a.png", 3, 3, &px, &pool);
        Crop::new(rect(1, 1, 2, 2)).apply(&mut buf, &job(1)).unwrap();
        assert_eq!(pixels(&buf), vec![[4, 0, 0], [5, 0, 0], [7, 0, 0], [8, 0, 0]]);
    }

    #[test]
    fn full_image_crop_is_allowed() {
        let pool = test_pool();
        let mut buf = gradient_buffer("a.png", 4, 4, &pool);
        let before = buf.as_bytes().to_vec();
        Crop::new(rect(0, 0, 4, 4)).apply(&mut buf, &job(1)).unwrap();
        assert_eq!(buf.as_bytes(), before.as_slice());
    }

    #[test]
    fn out_of_bounds_errors_and_leaves_buffer_unchanged() {
        let pool = test_pool();
        let mut buf = gradient_buffer("a.png", 10, 8, &pool);
        let before = buf.as_bytes().to_vec();

        let err = Crop::new(rect(6, 0, 5, 8)).apply(&mut buf, &job(1)).unwrap_err();

        assert!(matches!(
            err,
            OperationError::OutOfBounds {
                width: 10,
                height: 8,
                ..
            }
        ));
        assert_eq!(buf.dimensions(), (10, 8));
        assert_eq!(buf.as_bytes(), before.as_slice());
    }

    #[test]
    fn out_of_bounds_message() {
        let pool = test_pool();
        let mut buf = gradient_buffer("a.png", 4, 4, &pool);
        let err = Crop::new(rect(0, 2, 4, 4)).apply(&mut buf, &job(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "crop rectangle 4x4 at (0, 2) does not fit a 4x4 image"
        );
    }

    #[test]
    fn empty_rect_rejected_at_configure() {
        assert!(Crop::new(rect(0, 0, 0, 3)).configure().is_err());
    }
}
