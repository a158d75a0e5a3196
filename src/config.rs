//! Batch configuration.
//!
//! Loaded from a single TOML file passed with `--config`. Every section and
//! key is optional; the defaults below apply to anything left out. The
//! `[[operations]]` array lists the chain in order.
//!
//! ## Configuration Options
//!
//! ```toml
//! [pipeline]
//! max_parallel = 2              # Images in flight at once (>= 1)
//! failure_policy = "abort"      # "abort" or "isolate"
//!
//! [memory]
//! threshold_bytes = 1000000000  # Reclaim after a job when above this
//! source = "resident"           # "resident" (process RSS) or "pool"
//!
//! [pool]
//! max_retained_bytes = 268435456  # Idle bytes kept for reuse
//! # max_outstanding_bytes = ...   # Cap on rented bytes (unset = no cap)
//!
//! [[operations]]
//! kind = "grayscale"
//!
//! [[operations]]
//! kind = "rename"
//! template = "IMG_{index}"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::memory::{DEFAULT_THRESHOLD_BYTES, MemorySource};
use crate::operations::OperationSpec;
use crate::pipeline::FailurePolicy;
use crate::pool::{DEFAULT_MAX_RETAINED_BYTES, PoolLimits};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default number of images processed at once.
pub const DEFAULT_MAX_PARALLEL: usize = 2;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("operation {step} ({name}): {reason}")]
    Operation {
        step: usize,
        name: &'static str,
        reason: String,
    },
}

/// Complete batch configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Concurrency and failure handling.
    pub pipeline: PipelineConfig,
    /// Memory-pressure policy.
    pub memory: MemoryConfig,
    /// Buffer pool limits.
    pub pool: PoolConfig,
    /// The operation chain, applied in order to every image.
    pub operations: Vec<OperationSpec>,
}

impl BatchConfig {
    /// Validate values that do not depend on any image.
    ///
    /// Operation parameters are checked separately when the chain is
    /// configured (see [`crate::operations::build_chain`]).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_parallel == 0 {
            return Err(ConfigError::Validation(
                "pipeline.max_parallel must be at least 1".into(),
            ));
        }
        if self.memory.threshold_bytes == 0 {
            return Err(ConfigError::Validation(
                "memory.threshold_bytes must be non-zero".into(),
            ));
        }
        if self.pool.max_outstanding_bytes == Some(0) {
            return Err(ConfigError::Validation(
                "pool.max_outstanding_bytes must be non-zero when set".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Maximum number of images in flight. Not capped by the core count:
    /// this bounds memory as much as CPU.
    pub max_parallel: usize,
    /// What happens to the batch when one image fails.
    pub failure_policy: FailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            failure_policy: FailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    /// Footprint above which a finished job triggers a reclamation pass.
    pub threshold_bytes: u64,
    /// How the footprint is measured.
    pub source: MemorySource,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: DEFAULT_THRESHOLD_BYTES,
            source: MemorySource::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub max_retained_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_outstanding_bytes: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_retained_bytes: DEFAULT_MAX_RETAINED_BYTES,
            max_outstanding_bytes: None,
        }
    }
}

impl PoolConfig {
    pub fn limits(&self) -> PoolLimits {
        PoolLimits {
            max_retained_bytes: self.max_retained_bytes,
            max_outstanding_bytes: self.max_outstanding_bytes,
        }
    }
}

/// Resolve the number of images in flight: a CLI override wins over config.
pub fn effective_max_parallel(config: &PipelineConfig, cli_override: Option<usize>) -> usize {
    cli_override.unwrap_or(config.max_parallel).max(1)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(toml_src: &str) -> Result<BatchConfig, ConfigError> {
    let config: BatchConfig = toml::from_str(toml_src)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate the config file at `path`.
pub fn load_config(path: &Path) -> Result<BatchConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Returns a fully-commented stock config with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# pixel-batch configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Pipeline
# ---------------------------------------------------------------------------
[pipeline]
# Maximum number of images decoded, transformed and encoded at the same time.
# Each image in flight holds one full-size pixel buffer, so this bounds
# memory as well as CPU. Overridden by --max-parallel.
max_parallel = 2

# What to do when an image fails:
#   "abort"   - process every image, then fail the batch with the
#               earliest input that failed.
#   "isolate" - keep going; the final report lists every failure.
# Overridden to "isolate" by --isolate.
failure_policy = "abort"

# ---------------------------------------------------------------------------
# Memory pressure
# ---------------------------------------------------------------------------
[memory]
# After each image, if the measured footprint is above this many bytes,
# idle pool buffers are released before the next image is admitted.
threshold_bytes = 1000000000

# How the footprint is measured:
#   "resident" - process resident set size (falls back to "pool" where
#                /proc is unavailable)
#   "pool"     - bytes rented from plus bytes held idle by the buffer pool
source = "resident"

# ---------------------------------------------------------------------------
# Buffer pool
# ---------------------------------------------------------------------------
[pool]
# Idle buffer bytes kept for reuse. Released buffers beyond this are freed.
max_retained_bytes = 268435456

# Upper bound on bytes rented at once. A rent beyond it fails the image
# with a pool-exhausted error. Unset means no bound.
# max_outstanding_bytes = 536870912

# ---------------------------------------------------------------------------
# Operations
# ---------------------------------------------------------------------------
# Applied in order to every image. Each entry needs a `kind`:
#
#   kind = "grayscale"
#
#   kind = "color_map"
#   detect = "red"        # red | green | blue
#   replace = "blue"      # red | green | blue
#   # Pixels where `detect` is > 150 and both others are < 100 become pure
#   # `replace`.
#
#   kind = "rename"
#   template = "{originalName}_{index}"  # or "IMG_{index}"
#   # custom_text = "Holiday"            # shorthand for "Holiday_{index}"
#   index = "job"         # "job": input position (stable)
#                         # "shared": order images reach this step
#
#   kind = "resize"
#   width = 800
#   height = 600          # exact size, aspect ratio not kept
#
#   kind = "rotate"
#   degrees = 90.0        # clockwise, canvas size kept, corners black
#
#   kind = "crop"
#   x = 0
#   y = 0
#   width = 400
#   height = 300          # must fit inside the image
#
# Example chain:
#
# [[operations]]
# kind = "grayscale"
#
# [[operations]]
# kind = "rename"
# template = "IMG_{index}"
"##
}
