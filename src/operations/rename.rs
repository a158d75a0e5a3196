//! Give each output a templated file name.
//!
//! The `{index}` placeholder comes from one of two sources:
//!
//! - [`IndexSource::Job`] — the job's sequence number, assigned by the
//!   controller before dispatch. Stable: input *n* always gets index *n*.
//! - [`IndexSource::Shared`] — a counter inside the operation, bumped
//!   atomically by each call. Indices are unique but follow the order in
//!   which jobs *reach* this step, which under concurrency need not match
//!   input order.

use super::{JobContext, Operation, OperationError};
use crate::buffer::PixelBuffer;
use crate::config::ConfigError;
use crate::naming::{ORIGINAL_INDEX_TEMPLATE, RenameTemplate, custom_template};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexSource {
    #[default]
    Job,
    Shared,
}

#[derive(Debug)]
pub struct Rename {
    source: String,
    template: Option<RenameTemplate>,
    index: IndexSource,
    counter: AtomicU64,
}

impl Rename {
    pub fn new(template: impl Into<String>, index: IndexSource) -> Self {
        Self {
            source: template.into(),
            template: None,
            index,
            counter: AtomicU64::new(0),
        }
    }

    /// Resolve the config form: an explicit template wins, then custom text
    /// (`"<text>_{index}"`), then the default `{originalName}_{index}`.
    pub fn from_parts(template: Option<&str>, custom_text: Option<&str>, index: IndexSource) -> Self {
        let source = match (template, custom_text) {
            (Some(t), _) => t.to_string(),
            (None, Some(text)) => custom_template(text),
            (None, None) => ORIGINAL_INDEX_TEMPLATE.to_string(),
        };
        Self::new(source, index)
    }

    fn next_index(&self, job: &JobContext) -> u64 {
        match self.index {
            IndexSource::Job => job.sequence,
            IndexSource::Shared => self.counter.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }
}

impl Operation for Rename {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn describe(&self) -> String {
        let index = match self.index {
            IndexSource::Job => "job",
            IndexSource::Shared => "shared",
        };
        format!("rename \"{}\" (index: {index})", self.source)
    }

    fn configure(&mut self) -> Result<(), ConfigError> {
        let parsed =
            RenameTemplate::parse(&self.source).map_err(|e| ConfigError::Validation(e.to_string()))?;
        self.template = Some(parsed);
        *self.counter.get_mut() = 0;
        Ok(())
    }

    fn apply(&self, buffer: &mut PixelBuffer, job: &JobContext) -> Result<(), OperationError> {
        let template = self
            .template
            .as_ref()
            .ok_or_else(|| OperationError::Processing("rename used before configure".into()))?;
        let name = template.render(buffer.file_name(), self.next_index(job));
        buffer.set_file_name(name);
        Ok(())
    }
}
