//! Input discovery.
//!
//! Turns the command-line input list into the ordered list of source files
//! for one batch:
//!
//! - A **file** is taken as given, whatever its extension; the codec decides
//!   whether it can read it.
//! - A **directory** contributes every supported image inside it (see
//!   [`is_supported_input`]), sorted by file name. Hidden entries (leading
//!   `.`) are skipped. Subdirectories are only entered with `recursive`.
//!
//! Order follows the command line, so a batch's job sequence numbers are
//! predictable. A path listed twice is kept once, at its first position.

use crate::imaging::is_supported_input;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("input not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("cannot read input directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Walk options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub recursive: bool,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn images_in(dir: &Path, options: ScanOptions) -> Result<Vec<PathBuf>, ScanError> {
    let max_depth = if options.recursive { usize::MAX } else { 1 };
    let mut found = Vec::new();
    for entry in WalkDir::new(dir)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry?;
        if entry.file_type().is_file() && is_supported_input(entry.path()) {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// Expand `inputs` into an ordered, de-duplicated list of source files.
pub fn collect_inputs(inputs: &[PathBuf], options: ScanOptions) -> Result<Vec<PathBuf>, ScanError> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for input in inputs {
        let expanded = if input.is_dir() {
            images_in(input, options)?
        } else if input.is_file() {
            vec![input.clone()]
        } else {
            return Err(ScanError::NotFound(input.clone()));
        };
        for path in expanded {
            if seen.insert(path.clone()) {
                sources.push(path);
            }
        }
    }
    tracing::debug!(count = sources.len(), "inputs collected");
    Ok(sources)
}
