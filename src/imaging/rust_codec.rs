//! Pure Rust codec built on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP, BMP) | `image::ImageReader` with format sniffing |
//! | Encode | `image::RgbImage::save_with_format`, format from the output extension |
//!
//! Every decoded image is flattened to 8-bit RGB (alpha is dropped, 16-bit
//! samples are truncated) and handed over in the external B,G,R layout.

use super::codec::{CodecError, ImageCodec};
use super::external::ExternalImage;
use image::{ImageFormat, ImageReader};
use std::path::Path;
use std::sync::LazyLock;

/// Extensions the enabled `image` features can decode.
const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
    ("bmp", ImageFormat::Bmp),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Whether `path` has an extension we can decode (case-insensitive).
pub fn is_supported_input(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| supported_input_extensions().contains(&e.as_str()))
}

/// Codec backed by the `image` crate's pure Rust decoders and encoders.
pub struct RustCodec;

impl RustCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCodec for RustCodec {
    fn decode(&self, path: &Path) -> Result<ExternalImage, CodecError> {
        let img = ImageReader::open(path)
            .map_err(|e| CodecError::decode(path, e))?
            .with_guessed_format()
            .map_err(|e| CodecError::decode(path, e))?
            .decode()
            .map_err(|e| CodecError::decode(path, e))?;
        if img.width() == 0 || img.height() == 0 {
            return Err(CodecError::decode(path, "image has no pixels"));
        }
        Ok(ExternalImage::from_rgb_image(&img.to_rgb8()))
    }

    fn encode(&self, image: &ExternalImage, path: &Path) -> Result<(), CodecError> {
        let format = ImageFormat::from_path(path).map_err(|e| CodecError::encode(path, e))?;
        if !format.writing_enabled() {
            return Err(CodecError::encode(
                path,
                format!("no encoder for {format:?}"),
            ));
        }
        image
            .to_rgb_image()
            .save_with_format(path, format)
            .map_err(|e| CodecError::encode(path, e))
    }
}
