//! Image codec trait and shared error type.
//!
//! The [`ImageCodec`] trait is the boundary between the pipeline and image
//! container formats: it turns a file into an [`ExternalImage`] and back.
//! The production implementation is
//! [`RustCodec`](super::rust_codec::RustCodec); tests use an in-memory mock.

use super::external::ExternalImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("failed to encode {}: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },
}

impl CodecError {
    pub fn decode(path: &Path, reason: impl ToString) -> Self {
        CodecError::Decode {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn encode(path: &Path, reason: impl ToString) -> Self {
        CodecError::Encode {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Reads and writes image files in the external (B,G,R, padded) layout.
///
/// Implementations are shared across worker threads.
pub trait ImageCodec: Sync {
    /// Decode `path`. Fails with [`CodecError::Decode`] on unreadable,
    /// unsupported or empty input.
    fn decode(&self, path: &Path) -> Result<ExternalImage, CodecError>;

    /// Encode `image` to `path`, choosing the container from the extension.
    fn encode(&self, image: &ExternalImage, path: &Path) -> Result<(), CodecError>;
}
