//! CLI output formatting.
//!
//! Every `format_*` function is pure and returns display lines; the
//! `print_*` wrappers write them to stdout. Progress events arrive from
//! worker threads over a channel and are printed by a single printer thread
//! in `main`, so lines from concurrent jobs never interleave.
//!
//! # Output Format
//!
//! ## Run
//!
//! ```text
//! Processing 3 images, 2 at a time
//!     Chain: grayscale → rename
//! 001 cat.png → cat_1.png (12 ms)
//! 003 fox.png → fox_3.png (15 ms)
//! 002 dog.png failed at step 1 (crop): crop rectangle 4x4 at (0, 2) does not fit a 4x4 image
//!     Memory 1.1 GB over threshold after 003, released 48.0 MB
//! Done: 2 succeeded, 1 failed, 0 skipped (peak 2 in flight)
//! ```
//!
//! ## Check
//!
//! ```text
//! Inputs (2)
//! 001 cat.png
//!     Source: photos/cat.png
//! 002 dog.png
//!     Source: photos/dog.png
//! Chain (1 step)
//! 001 grayscale
//! Pipeline
//!     max_parallel: 2
//!     failure_policy: abort
//! ```

use crate::operations::OperationChain;
use crate::pipeline::{BatchReport, FailurePolicy, PipelineEvent, PipelineSettings};
use std::path::Path;

/// Zero-padded three-digit position (`001`, `042`, `1234`).
fn format_index(pos: u64) -> String {
    format!("{pos:03}")
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Human-readable byte count with one decimal (`512 B`, `3.5 MB`, `1.1 GB`).
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}

fn plural(count: usize, one: &str, many: &str) -> String {
    if count == 1 {
        format!("{count} {one}")
    } else {
        format!("{count} {many}")
    }
}

fn policy_name(policy: FailurePolicy) -> &'static str {
    match policy {
        FailurePolicy::Abort => "abort",
        FailurePolicy::Isolate => "isolate",
    }
}

// ============================================================================
// Run progress
// ============================================================================

/// Format a single progress event as display lines.
pub fn format_pipeline_event(event: &PipelineEvent) -> Vec<String> {
    match event {
        PipelineEvent::BatchStarted {
            total,
            max_parallel,
            steps,
        } => {
            let chain = if steps.is_empty() {
                "(none, images are re-encoded as is)".to_string()
            } else {
                steps.join(" \u{2192} ")
            };
            vec![
                format!(
                    "Processing {}, {} at a time",
                    plural(*total, "image", "images"),
                    max_parallel
                ),
                format!("    Chain: {chain}"),
            ]
        }
        PipelineEvent::JobSucceeded {
            sequence,
            input,
            output,
            millis,
        } => vec![format!(
            "{} {} \u{2192} {} ({} ms)",
            format_index(*sequence),
            display_name(input),
            display_name(output),
            millis
        )],
        PipelineEvent::JobFailed {
            sequence,
            input,
            stage,
            reason,
        } => vec![format!(
            "{} {} failed at {}: {}",
            format_index(*sequence),
            display_name(input),
            stage,
            reason
        )],
        PipelineEvent::JobSkipped { sequence, input } => vec![format!(
            "{} {} skipped",
            format_index(*sequence),
            display_name(input)
        )],
        PipelineEvent::Reclaimed {
            after_sequence: Some(sequence),
            measured_bytes,
            freed_bytes,
        } => vec![format!(
            "    Memory {} over threshold after {}, released {}",
            format_bytes(*measured_bytes),
            format_index(*sequence),
            format_bytes(*freed_bytes as u64)
        )],
        PipelineEvent::Reclaimed {
            after_sequence: None,
            freed_bytes,
            ..
        } => {
            if *freed_bytes == 0 {
                Vec::new()
            } else {
                vec![format!(
                    "    Released {} of idle buffers",
                    format_bytes(*freed_bytes as u64)
                )]
            }
        }
    }
}

/// Final summary plus one line per failure.
pub fn format_report(report: &BatchReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Done: {} succeeded, {} failed, {} skipped (peak {} in flight)",
        report.succeeded.len(),
        report.failed.len(),
        report.skipped.len(),
        report.peak_in_flight
    )];
    for failure in &report.failed {
        lines.push(format!(
            "    {} {}: {}",
            format_index(failure.sequence),
            failure.input.display(),
            failure.error
        ));
    }
    lines
}

pub fn print_report(report: &BatchReport) {
    for line in format_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

/// Inputs, chain and settings as they would be used by `run`.
pub fn format_check_output(
    sources: &[impl AsRef<Path>],
    chain: &OperationChain,
    settings: &PipelineSettings,
) -> Vec<String> {
    let mut lines = vec![format!("Inputs ({})", sources.len())];
    for (i, source) in sources.iter().enumerate() {
        let source = source.as_ref();
        lines.push(format!(
            "{} {}",
            format_index(i as u64 + 1),
            display_name(source)
        ));
        lines.push(format!("    Source: {}", source.display()));
    }

    lines.push(format!("Chain ({})", plural(chain.len(), "step", "steps")));
    for (i, step) in chain.steps().enumerate() {
        lines.push(format!("{} {}", format_index(i as u64 + 1), step.describe()));
    }

    lines.push("Pipeline".to_string());
    lines.push(format!("    max_parallel: {}", settings.max_parallel));
    lines.push(format!(
        "    failure_policy: {}",
        policy_name(settings.failure_policy)
    ));
    lines
}

pub fn print_check_output(
    sources: &[impl AsRef<Path>],
    chain: &OperationChain,
    settings: &PipelineSettings,
) {
    for line in format_check_output(sources, chain, settings) {
        println!("{}", line);
    }
}
