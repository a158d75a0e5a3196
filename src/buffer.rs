//! Pooled R,G,B pixel storage for one image.
//!
//! A [`PixelBuffer`] holds a file name, dimensions, and exactly one
//! [`Rental`] from a [`BufferPool`]. Its logical view is always
//! `width * height * 3` bytes, row-major, unpadded, in R,G,B order.
//!
//! ```text
//!   codec ──decode──▶ ExternalImage (B,G,R, padded) ──load_from──▶ PixelBuffer (R,G,B, packed)
//!   codec ◀─encode─── ExternalImage ◀──────────to_external─────── PixelBuffer
//! ```
//!
//! Geometry operations build a new `ExternalImage` and call
//! [`PixelBuffer::replace`], which releases the current rental *before*
//! renting one sized for the new dimensions, so a buffer never holds two
//! blocks at once.

use crate::imaging::{CodecError, ExternalImage, ImageCodec};
use crate::pool::{BufferPool, PoolError, Rental};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BufferError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Logical length in bytes of a packed R,G,B image.
pub fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Copy `src` into a packed R,G,B slice, dropping row padding and swapping
/// B,G,R to R,G,B.
fn copy_from_external(src: &ExternalImage, dst: &mut [u8]) {
    let packed = src.width() as usize * 3;
    if packed == 0 {
        return;
    }
    for (y, dst_row) in dst.chunks_exact_mut(packed).enumerate() {
        let src_row = &src.row(y as u32)[..packed];
        for (d, s) in dst_row.chunks_exact_mut(3).zip(src_row.chunks_exact(3)) {
            d[0] = s[2];
            d[1] = s[1];
            d[2] = s[0];
        }
    }
}

/// Single image in flight: file name, dimensions, pooled pixels.
pub struct PixelBuffer {
    file_name: String,
    width: u32,
    height: u32,
    rental: Option<Rental>,
    pool: Arc<BufferPool>,
}

impl PixelBuffer {
    /// Decode `path` through `codec` and copy its pixels into a fresh rental.
    ///
    /// The file name is the last path component.
    pub fn load_from(
        codec: &(impl ImageCodec + ?Sized),
        pool: &Arc<BufferPool>,
        path: &Path,
    ) -> Result<Self, BufferError> {
        let external = codec.decode(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::from_external(file_name, &external, pool)?)
    }

    /// Build a buffer from an already decoded image.
    pub fn from_external(
        file_name: impl Into<String>,
        external: &ExternalImage,
        pool: &Arc<BufferPool>,
    ) -> Result<Self, PoolError> {
        let mut rental = pool.rent(rgb_len(external.width(), external.height()))?;
        copy_from_external(external, rental.as_mut_slice());
        Ok(Self {
            file_name: file_name.into(),
            width: external.width(),
            height: external.height(),
            rental: Some(rental),
            pool: Arc::clone(pool),
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn set_file_name(&mut self, name: impl Into<String>) {
        self.file_name = name.into();
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The logical R,G,B bytes, never the pool's over-allocated capacity.
    pub fn as_bytes(&self) -> &[u8] {
        self.rental.as_ref().map(Rental::as_slice).unwrap_or_default()
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.rental.as_mut().map(Rental::as_mut_slice).unwrap_or_default()
    }

    /// Convert back to the codec layout (B,G,R, padded rows).
    pub fn to_external(&self) -> ExternalImage {
        let mut out = ExternalImage::new(self.width, self.height);
        let packed = self.width as usize * 3;
        if packed == 0 {
            return out;
        }
        for (y, src_row) in self.as_bytes().chunks_exact(packed).enumerate() {
            let dst_row = &mut out.row_mut(y as u32)[..packed];
            for (d, s) in dst_row.chunks_exact_mut(3).zip(src_row.chunks_exact(3)) {
                d[0] = s[2];
                d[1] = s[1];
                d[2] = s[0];
            }
        }
        out
    }

    /// Swap in new content, possibly with new dimensions.
    ///
    /// The current block goes back to the pool first, then a block sized for
    /// `source` is rented. If that rent fails the buffer is left empty (0x0)
    /// and the error is returned.
    pub fn replace(&mut self, source: &ExternalImage) -> Result<(), PoolError> {
        if let Some(old) = self.rental.take() {
            old.release();
        }
        self.width = 0;
        self.height = 0;

        let mut rental = self.pool.rent(rgb_len(source.width(), source.height()))?;
        copy_from_external(source, rental.as_mut_slice());
        self.width = source.width();
        self.height = source.height();
        self.rental = Some(rental);
        Ok(())
    }

    /// Check, without renting, that [`replace`](Self::replace) with a
    /// `width` x `height` image would fit the pool's outstanding limit.
    pub fn check_replace(&self, width: u32, height: u32) -> Result<(), PoolError> {
        let releasing = self.rental.as_ref().map_or(0, Rental::capacity);
        self.pool.check_fits(rgb_len(width, height), releasing)
    }

    /// Return the current block to the pool.
    ///
    /// Consumes the buffer, so it can only happen once and always releases
    /// whatever block the buffer holds at that moment. Dropping the buffer
    /// has the same effect.
    pub fn dispose(mut self) {
        if let Some(rental) = self.rental.take() {
            rental.release();
        }
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("file_name", &self.file_name)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rental", &self.rental)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::codec::tests::MockCodec;
    use crate::pool::PoolLimits;
    use crate::test_helpers::{external_from_pixels, gradient_rgb, test_pool};

    #[test]
    fn rgb_len_is_three_bytes_per_pixel() {
        assert_eq!(rgb_len(4, 3), 36);
        assert_eq!(rgb_len(0, 10), 0);
    }

    #[test]
    fn load_strips_padding_and_reorders_channels() {
        // 2x2 image: stride 8, two padding bytes per row set to 0xAA.
        let data = vec![
            3, 2, 1, 6, 5, 4, 0xAA, 0xAA, //
            9, 8, 7, 12, 11, 10, 0xAA, 0xAA,
        ];
        let ext = ExternalImage::from_raw(2, 2, 8, data).unwrap();
        let codec = MockCodec::new().with_source("p.bmp", ext);
        let pool = test_pool();

        let buf = PixelBuffer::load_from(&codec, &pool, Path::new("/in/p.bmp")).unwrap();
        assert_eq!(buf.file_name(), "p.bmp");
        assert_eq!(buf.dimensions(), (2, 2));
        assert_eq!(buf.as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn view_length_matches_dimensions_not_capacity() {
        let pool = test_pool();
        let ext = ExternalImage::from_rgb_image(&gradient_rgb(7, 5));
        let buf = PixelBuffer::from_external("g.png", &ext, &pool).unwrap();
        assert_eq!(buf.as_bytes().len(), 7 * 5 * 3);
        assert_eq!(pool.stats().outstanding_bytes, 4096);
    }

    #[test]
    fn to_external_restores_bgr_layout() {
        let pool = test_pool();
        let ext = ExternalImage::from_rgb_image(&gradient_rgb(3, 2));
        let buf = PixelBuffer::from_external("g.png", &ext, &pool).unwrap();
        assert_eq!(buf.to_external(), ext);
    }

    #[test]
    fn load_decode_failure_is_codec_error() {
        let pool = test_pool();
        let err = PixelBuffer::load_from(&MockCodec::new(), &pool, Path::new("x.png")).unwrap_err();
        assert!(matches!(err, BufferError::Codec(CodecError::Decode { .. })));
        assert_eq!(pool.stats().outstanding_blocks, 0);
    }

    #[test]
    fn replace_resizes_view_and_keeps_one_rental() {
        let pool = test_pool();
        let mut buf = PixelBuffer::from_external(
            "a.png",
            &ExternalImage::from_rgb_image(&gradient_rgb(40, 40)),
            &pool,
        )
        .unwrap();

        let smaller = external_from_pixels(2, 1, &[[1, 2, 3], [4, 5, 6]]);
        buf.replace(&smaller).unwrap();

        assert_eq!(buf.dimensions(), (2, 1));
        assert_eq!(buf.as_bytes(), &[1, 2, 3, 4, 5, 6]);
        let stats = pool.stats();
        assert_eq!(stats.outstanding_blocks, 1);
        // Old block went back before the new one was rented.
        assert_eq!(stats.peak_outstanding_bytes, 8192);
        assert_eq!(stats.retained_blocks, 1);
    }

    #[test]
    fn check_replace_counts_own_block_as_released() {
        let pool = Arc::new(BufferPool::new(PoolLimits {
            max_retained_bytes: 0,
            max_outstanding_bytes: Some(8192),
        }));
        let buf = PixelBuffer::from_external("a.png", &ExternalImage::new(4, 4), &pool).unwrap();

        // 40x40x3 = 4800 bytes, class 8192: fits once the 4096 block is back.
        assert!(buf.check_replace(40, 40).is_ok());
        assert!(matches!(
            buf.check_replace(100, 100),
            Err(PoolError::Exhausted { .. })
        ));
        assert_eq!(pool.stats().rents, 1);
    }

    #[test]
    fn replace_with_same_class_reuses_released_block() {
        let pool = test_pool();
        let img = ExternalImage::from_rgb_image(&gradient_rgb(10, 10));
        let mut buf = PixelBuffer::from_external("a.png", &img, &pool).unwrap();
        buf.replace(&img).unwrap();
        assert_eq!(pool.stats().reuses, 1);
        assert_eq!(pool.stats().outstanding_blocks, 1);
    }

    #[test]
    fn dispose_after_replace_releases_current_block_only() {
        let pool = test_pool();
        let mut buf = PixelBuffer::from_external(
            "a.png",
            &ExternalImage::from_rgb_image(&gradient_rgb(50, 50)),
            &pool,
        )
        .unwrap();
        buf.replace(&ExternalImage::new(1, 1)).unwrap();
        buf.dispose();

        let stats = pool.stats();
        assert_eq!(stats.outstanding_blocks, 0);
        assert_eq!(stats.outstanding_bytes, 0);
        assert_eq!(stats.retained_blocks, 2);
    }

    #[test]
    fn drop_releases_rental() {
        let pool = test_pool();
        {
            let _buf =
                PixelBuffer::from_external("a.png", &ExternalImage::new(3, 3), &pool).unwrap();
            assert_eq!(pool.stats().outstanding_blocks, 1);
        }
        assert_eq!(pool.stats().outstanding_blocks, 0);
    }

    #[test]
    fn failed_replace_leaves_consistent_empty_buffer() {
        let pool = Arc::new(BufferPool::new(PoolLimits {
            max_retained_bytes: 0,
            max_outstanding_bytes: Some(4096),
        }));
        let mut buf =
            PixelBuffer::from_external("a.png", &ExternalImage::new(2, 2), &pool).unwrap();

        let err = buf.replace(&ExternalImage::new(100, 100)).unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { .. }));
        assert_eq!(buf.dimensions(), (0, 0));
        assert_eq!(buf.as_bytes().len(), rgb_len(buf.width(), buf.height()));
        assert_eq!(pool.stats().outstanding_blocks, 0);
    }
}
