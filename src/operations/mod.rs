//! Per-image operations and the chain that runs them.
//!
//! ## Lifecycle
//!
//! ```text
//!   OperationSpec (config) ──build──▶ Box<dyn Operation>
//!   ChainBuilder::push ... ──configure()──▶ OperationChain (frozen, shared)
//!   job: for step in chain { step.apply(&mut buffer, &job) }
//! ```
//!
//! Every operation is configured exactly once, single-threaded, before any
//! job starts. After that the chain is immutable: `apply` takes `&self`, so
//! per-image work cannot touch configuration. An operation that needs state
//! across calls (the shared rename counter) keeps it in atomics.
//!
//! ## Operations
//!
//! | `kind` | Parameters | Effect |
//! |---|---|---|
//! | `grayscale` | — | `(30 r + 59 g + 11 b) / 100` in every channel |
//! | `color_map` | `detect`, `replace` | strong `detect` pixels become pure `replace` |
//! | `rename` | `template` / `custom_text`, `index` | new file name, extension kept |
//! | `resize` | `width`, `height` | exact dimensions, Lanczos3 |
//! | `rotate` | `degrees` | clockwise about the centre, same canvas, black fill |
//! | `crop` | `x`, `y`, `width`, `height` | keep a rectangle inside the image |

pub mod color_map;
pub mod crop;
pub mod grayscale;
pub mod rename;
pub mod resize;
pub mod rotate;

pub use color_map::ColorMap;
pub use crop::Crop;
pub use grayscale::Grayscale;
pub use rename::{IndexSource, Rename};
pub use resize::Resize;
pub use rotate::Rotate;

use crate::buffer::PixelBuffer;
use crate::config::ConfigError;
use crate::imaging::{Channel, CropRect};
use crate::pipeline::CancelToken;
use crate::pool::PoolError;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OperationError {
    #[error("crop rectangle {rect} does not fit a {width}x{height} image")]
    OutOfBounds {
        rect: CropRect,
        width: u32,
        height: u32,
    },
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("{0}")]
    Processing(String),
}

/// What an operation may know about the job it is working on.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// 1-based position of the input in the batch.
    pub sequence: u64,
    pub source: PathBuf,
    pub cancel: CancelToken,
}

impl JobContext {
    pub fn new(sequence: u64, source: impl Into<PathBuf>) -> Self {
        Self {
            sequence,
            source: source.into(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A step applied to every image in the batch.
pub trait Operation: Send + Sync {
    /// Short identifier used in logs and failure reports.
    fn name(&self) -> &'static str;

    /// One-line human description including parameters.
    fn describe(&self) -> String {
        self.name().to_string()
    }

    /// Validate and prepare parameters. Called once before any job runs.
    fn configure(&mut self) -> Result<(), ConfigError>;

    /// Transform `buffer` in place or through [`PixelBuffer::replace`].
    ///
    /// On error the buffer must be left as it was, except that a failed
    /// rent inside `replace` leaves it empty.
    fn apply(&self, buffer: &mut PixelBuffer, job: &JobContext) -> Result<(), OperationError>;
}

/// Collects operations and configures them into an [`OperationChain`].
#[derive(Default)]
pub struct ChainBuilder {
    steps: Vec<Box<dyn Operation>>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(self, operation: impl Operation + 'static) -> Self {
        self.push_boxed(Box::new(operation))
    }

    pub fn push_boxed(mut self, operation: Box<dyn Operation>) -> Self {
        self.steps.push(operation);
        self
    }

    /// Configure every step in order, stopping at the first failure.
    pub fn configure(mut self) -> Result<OperationChain, ConfigError> {
        for (index, step) in self.steps.iter_mut().enumerate() {
            step.configure().map_err(|e| match e {
                ConfigError::Validation(reason) => ConfigError::Operation {
                    step: index + 1,
                    name: step.name(),
                    reason,
                },
                other => other,
            })?;
        }
        Ok(OperationChain {
            steps: self.steps.into(),
        })
    }
}

/// A configured, immutable sequence of operations shared by all jobs.
#[derive(Clone)]
pub struct OperationChain {
    steps: Arc<[Box<dyn Operation>]>,
}

impl OperationChain {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> impl Iterator<Item = &dyn Operation> {
        self.steps.iter().map(|s| &**s)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps().map(|s| s.name()).collect()
    }
}

impl fmt::Debug for OperationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Operation parameters as written in the `[[operations]]` config tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum OperationSpec {
    Grayscale,
    ColorMap {
        detect: Channel,
        replace: Channel,
    },
    Rename {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_text: Option<String>,
        #[serde(default)]
        index: IndexSource,
    },
    Resize {
        width: u32,
        height: u32,
    },
    Rotate {
        degrees: f64,
    },
    Crop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

impl OperationSpec {
    /// Instantiate the (not yet configured) operation.
    pub fn build(&self) -> Box<dyn Operation> {
        match self {
            OperationSpec::Grayscale => Box::new(Grayscale),
            OperationSpec::ColorMap { detect, replace } => Box::new(ColorMap::new(*detect, *replace)),
            OperationSpec::Rename {
                template,
                custom_text,
                index,
            } => Box::new(Rename::from_parts(
                template.as_deref(),
                custom_text.as_deref(),
                *index,
            )),
            OperationSpec::Resize { width, height } => Box::new(Resize::new(*width, *height)),
            OperationSpec::Rotate { degrees } => Box::new(Rotate::new(*degrees)),
            OperationSpec::Crop {
                x,
                y,
                width,
                height,
            } => Box::new(Crop::new(CropRect {
                x: *x,
                y: *y,
                width: *width,
                height: *height,
            })),
        }
    }
}

/// Build and configure a chain from config entries.
pub fn build_chain(specs: &[OperationSpec]) -> Result<OperationChain, ConfigError> {
    specs
        .iter()
        .fold(ChainBuilder::new(), |builder, spec| {
            builder.push_boxed(spec.build())
        })
        .configure()
}

/// Copy the buffer's packed R,G,B view into an `image` crate buffer.
pub(crate) fn rgb_image(buffer: &PixelBuffer) -> Result<RgbImage, OperationError> {
    RgbImage::from_raw(buffer.width(), buffer.height(), buffer.as_bytes().to_vec()).ok_or_else(
        || OperationError::Processing(format!("{} has no pixel data", buffer.file_name())),
    )
}
