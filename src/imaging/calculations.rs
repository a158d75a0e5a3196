//! Pure geometry used by the crop and rotate operations.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::CropRect;

/// Whether `rect` lies fully inside an image of `dims = (width, height)`,
/// i.e. within `[0, width) x [0, height)`, and is non-empty.
pub fn crop_fits(rect: CropRect, dims: (u32, u32)) -> bool {
    let (w, h) = dims;
    rect.width > 0
        && rect.height > 0
        && (rect.x as u64 + rect.width as u64) <= w as u64
        && (rect.y as u64 + rect.height as u64) <= h as u64
}

/// Map a destination pixel centre back into the source image for a rotation
/// of `radians` (clockwise in image coordinates) about `center`.
///
/// Returns the source coordinate to sample, in pixel-centre space.
pub fn inverse_rotate(point: (f64, f64), center: (f64, f64), radians: f64) -> (f64, f64) {
    let (sin, cos) = radians.sin_cos();
    let dx = point.0 - center.0;
    let dy = point.1 - center.1;
    (
        center.0 + dx * cos + dy * sin,
        center.1 - dx * sin + dy * cos,
    )
}

/// Bilinear weights for sampling at `(sx, sy)`: the top-left integer
/// coordinate and fractional offsets. `None` when the sample falls outside
/// `[0, w-1] x [0, h-1]` (those pixels become background).
pub fn bilinear_cell(sx: f64, sy: f64, dims: (u32, u32)) -> Option<(u32, u32, f64, f64)> {
    let (w, h) = dims;
    let max_x = (w - 1) as f64;
    let max_y = (h - 1) as f64;
    // Half-pixel tolerance so edge pixels survive float error at 0/90/180/270.
    if sx < -0.5 || sy < -0.5 || sx > max_x + 0.5 || sy > max_y + 0.5 {
        return None;
    }
    let sx = sx.clamp(0.0, max_x);
    let sy = sy.clamp(0.0, max_y);
    let x0 = sx.floor();
    let y0 = sy.floor();
    Some((x0 as u32, y0 as u32, sx - x0, sy - y0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: u32, y: u32, width: u32, height: u32) -> CropRect {
        CropRect {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn crop_fits_full_image() {
        assert!(crop_fits(rect(0, 0, 10, 8), (10, 8)));
    }

    #[test]
    fn crop_fits_rejects_overhang() {
        assert!(!crop_fits(rect(1, 0, 10, 8), (10, 8)));
        assert!(!crop_fits(rect(0, 1, 10, 8), (10, 8)));
        assert!(!crop_fits(rect(10, 0, 1, 1), (10, 8)));
    }

    #[test]
    fn crop_fits_rejects_empty_rect() {
        assert!(!crop_fits(rect(0, 0, 0, 5), (10, 8)));
        assert!(!crop_fits(rect(0, 0, 5, 0), (10, 8)));
    }

    #[test]
    fn crop_fits_does_not_overflow() {
        assert!(!crop_fits(rect(u32::MAX, 0, 2, 1), (10, 8)));
    }

    #[test]
    fn inverse_rotate_zero_is_identity() {
        let p = inverse_rotate((3.0, 4.0), (5.0, 5.0), 0.0);
        assert!((p.0 - 3.0).abs() < 1e-9);
        assert!((p.1 - 4.0).abs() < 1e-9);
    }

    #[test]
    fn inverse_rotate_half_turn_mirrors_through_center() {
        let p = inverse_rotate((0.0, 0.0), (2.0, 1.0), std::f64::consts::PI);
        assert!((p.0 - 4.0).abs() < 1e-9);
        assert!((p.1 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn bilinear_cell_outside_is_none() {
        assert!(bilinear_cell(-1.0, 0.0, (4, 4)).is_none());
        assert!(bilinear_cell(0.0, 3.6, (4, 4)).is_none());
    }

    #[test]
    fn bilinear_cell_splits_integer_and_fraction() {
        let (x, y, fx, fy) = bilinear_cell(1.25, 2.5, (4, 4)).unwrap();
        assert_eq!((x, y), (1, 2));
        assert!((fx - 0.25).abs() < 1e-9);
        assert!((fy - 0.5).abs() < 1e-9);
    }
}
