//! The codec-side pixel representation.
//!
//! Decoders and encoders speak a different layout than the pipeline:
//!
//! | | [`ExternalImage`] | [`PixelBuffer`](crate::buffer::PixelBuffer) |
//! |---|---|---|
//! | Channel order | B, G, R | R, G, B |
//! | Row length | `stride`, padded to a multiple of 4 | exactly `width * 3` |
//! | Storage | owned `Vec<u8>` | pooled [`Rental`](crate::pool::Rental) |
//!
//! Converting between the two is the job of `PixelBuffer`; this module only
//! describes the external side and the conversions to and from the `image`
//! crate's `RgbImage`, which the geometry operations use for resampling.

use super::params::CropRect;
use image::RgbImage;

/// Row stride for a 24-bit image of `width` pixels: `width * 3` rounded up
/// to a multiple of 4 bytes.
pub fn padded_stride(width: u32) -> usize {
    (width as usize * 3 + 3) & !3
}

/// A decoded image in B,G,R byte order with padded rows.
#[derive(Clone, PartialEq, Eq)]
pub struct ExternalImage {
    width: u32,
    height: u32,
    stride: usize,
    data: Vec<u8>,
}

impl ExternalImage {
    /// A black image. Padding bytes are zero.
    pub fn new(width: u32, height: u32) -> Self {
        let stride = padded_stride(width);
        Self {
            width,
            height,
            stride,
            data: vec![0; stride * height as usize],
        }
    }

    /// Wrap raw B,G,R rows. Returns `None` when the stride is shorter than a
    /// packed row or `data` does not hold `stride * height` bytes.
    pub fn from_raw(width: u32, height: u32, stride: usize, data: Vec<u8>) -> Option<Self> {
        if stride < width as usize * 3 || data.len() != stride * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            stride,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// Full padded row `y`.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.stride]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        &mut self.data[start..start + self.stride]
    }

    /// B,G,R triple at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = y as usize * self.stride + x as usize * 3;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ]
    }

    pub fn from_rgb_image(rgb: &RgbImage) -> Self {
        let (width, height) = rgb.dimensions();
        let mut out = Self::new(width, height);
        let packed = width as usize * 3;
        for (y, src) in rgb.as_raw().chunks_exact(packed.max(1)).enumerate() {
            let dst = out.row_mut(y as u32);
            for (d, s) in dst[..packed].chunks_exact_mut(3).zip(src.chunks_exact(3)) {
                d[0] = s[2];
                d[1] = s[1];
                d[2] = s[0];
            }
        }
        out
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        let packed = self.width as usize * 3;
        let mut raw = Vec::with_capacity(packed * self.height as usize);
        for y in 0..self.height {
            for px in self.row(y)[..packed].chunks_exact(3) {
                raw.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        }
        // Length is width * height * 3 by construction.
        RgbImage::from_raw(self.width, self.height, raw).unwrap_or_default()
    }

    /// Copy out a sub-rectangle. The caller checks bounds first
    /// (see [`crop_fits`](super::calculations::crop_fits)).
    pub fn crop(&self, rect: CropRect) -> Self {
        let mut out = Self::new(rect.width, rect.height);
        let start = rect.x as usize * 3;
        let len = rect.width as usize * 3;
        for y in 0..rect.height {
            let src = &self.row(rect.y + y)[start..start + len];
            out.row_mut(y)[..len].copy_from_slice(src);
        }
        out
    }
}

impl std::fmt::Debug for ExternalImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish()
    }
}
