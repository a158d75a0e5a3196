//! # pixel-batch
//!
//! Batch image transformation: every input image is decoded, run through an
//! ordered chain of operations, and encoded to an output directory.
//! Several images are processed at once, but never more than a configured
//! bound, and every image's pixels live in a buffer rented from a shared pool.
//!
//! # Architecture
//!
//! ```text
//!   inputs ─▶ scan ─▶ PipelineController ─┬─ job 1: decode ─▶ chain ─▶ encode
//!                     (admission gate,     ├─ job 2: …
//!                      memory policy)      └─ job n  (≤ max_parallel in flight)
//!
//!   job pixels: ImageCodec ─▶ ExternalImage ─▶ PixelBuffer ◀─ Rental ◀─ BufferPool
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pool`] | Size-classed pool of reusable byte blocks and the exclusive [`pool::Rental`] |
//! | [`buffer`] | [`buffer::PixelBuffer`]: one image's packed R,G,B pixels in a single rental |
//! | [`imaging`] | Codec trait, `image`-crate codec, external B,G,R layout, geometry helpers |
//! | [`operations`] | The [`operations::Operation`] contract, chain building, the six operations |
//! | [`naming`] | Rename templates and file-name splitting |
//! | [`memory`] | Memory-pressure measurement and reclamation |
//! | [`pipeline`] | Admission gate, job lifecycle, failure policies, cancellation, reports |
//! | [`config`] | TOML batch configuration, validation, stock template |
//! | [`scan`] | Expands command-line inputs into the ordered source list |
//! | [`output`] | CLI output formatting for progress, reports and `check` |
//!
//! # Design Decisions
//!
//! ## One Rental per Image
//!
//! A [`buffer::PixelBuffer`] owns exactly one [`pool::Rental`]. Operations
//! that change the dimensions go through [`buffer::PixelBuffer::replace`],
//! which hands the old block back *before* renting the new one. Releasing
//! consumes the rental, so a block cannot be returned twice or used after
//! return.
//!
//! ## Configure, Then Freeze
//!
//! Operations are configured once through [`operations::ChainBuilder`],
//! which yields an immutable [`operations::OperationChain`]. Jobs only see
//! `&self`, so nothing can reconfigure an operation while images are in
//! flight. The one piece of cross-job state, the shared rename counter, is
//! an atomic.
//!
//! ## Backpressure Before Admission
//!
//! A finished job runs the memory check while it still holds its admission
//! permit. Under pressure the next image is not admitted until idle pool
//! blocks have been released.

pub mod buffer;
pub mod config;
pub mod imaging;
pub mod memory;
pub mod naming;
pub mod operations;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod scan;

#[cfg(test)]
pub(crate) mod test_helpers;
