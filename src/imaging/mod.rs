//! Image I/O and pixel geometry, pure Rust with no system libraries.
//!
//! | Piece | Crate / function |
//! |---|---|
//! | **Decode / encode** | `image` crate via [`RustCodec`] |
//! | **External layout** | [`ExternalImage`]: B,G,R with 4-byte padded rows |
//! | **Resampling** | `image::imageops::resize` (Lanczos3) |
//!
//! The module is split into:
//! - **Codec**: [`ImageCodec`] trait + [`RustCodec`]
//! - **External**: the codec-side pixel layout
//! - **Parameters**: data types describing operation inputs
//! - **Calculations**: pure geometry (unit testable)

pub mod calculations;
pub mod codec;
pub mod external;
mod params;
pub mod rust_codec;

pub use codec::{CodecError, ImageCodec};
pub use external::{ExternalImage, padded_stride};
pub use params::{Channel, CropRect};
pub use rust_codec::{RustCodec, is_supported_input, supported_input_extensions};
