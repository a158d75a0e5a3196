use clap::{Parser, Subcommand};
use pixel_batch::config::{self, BatchConfig};
use pixel_batch::imaging::RustCodec;
use pixel_batch::memory::MemoryPolicy;
use pixel_batch::operations::{self, OperationChain};
use pixel_batch::pipeline::{FailurePolicy, PipelineController, PipelineSettings};
use pixel_batch::pool::BufferPool;
use pixel_batch::{output, scan};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Shared flags for commands that read a config and a list of inputs.
#[derive(clap::Args, Clone)]
struct BatchArgs {
    /// Image files or directories to process
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Batch configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Images in flight at once (overrides pipeline.max_parallel)
    #[arg(short = 'j', long)]
    max_parallel: Option<usize>,

    /// Descend into subdirectories of input directories
    #[arg(short, long)]
    recursive: bool,
}

#[derive(Parser)]
#[command(name = "pixel-batch")]
#[command(about = "Batch image transformation over pooled pixel buffers")]
#[command(long_about = "\
Batch image transformation over pooled pixel buffers

Every input image is decoded, run through the operation chain from the
config file, and written to the output directory under its (possibly
renamed) file name. At most max_parallel images are in flight at once.

Operations (config [[operations]], applied in order):

  grayscale    luminance 0.30 R + 0.59 G + 0.11 B
  color_map    detect = red|green|blue, replace = red|green|blue
  rename       template = \"{originalName}_{index}\" | \"IMG_{index}\", or custom_text
               ({{ and }} are literal braces; no / or \\ in names)
  resize       width, height (exact)
  rotate       degrees (clockwise, canvas size kept)
  crop         x, y, width, height (must fit the image)

Run 'pixel-batch gen-config' to generate a documented config file.")]
#[command(version)]
struct Cli {
    /// More diagnostic logging on stderr (-v info, -vv debug, -vvv trace).
    /// RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process the inputs into an output directory
    Run {
        #[command(flatten)]
        batch: BatchArgs,

        /// Output directory (created if missing)
        #[arg(short, long)]
        output: PathBuf,

        /// Report every failure instead of failing the batch on the first one
        #[arg(long)]
        isolate: bool,

        /// Print the batch report as JSON on stdout (progress goes to stderr)
        #[arg(long)]
        json: bool,
    },
    /// Validate the config and list inputs and chain without processing
    Check {
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Print a stock config file with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run {
            batch,
            output: output_dir,
            isolate,
            json,
        } => {
            let (config, chain, sources) = prepare(&batch)?;
            let mut settings = pipeline_settings(&config, &batch);
            if isolate {
                settings.failure_policy = FailurePolicy::Isolate;
            }
            run(&config, chain, settings, &sources, &output_dir, json)?;
        }
        Command::Check { batch } => {
            let (config, chain, sources) = prepare(&batch)?;
            let settings = pipeline_settings(&config, &batch);
            output::print_check_output(&sources, &chain, &settings);
            println!("==> Configuration is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Diagnostics go to stderr; stdout carries progress or the JSON report.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load config, configure the chain, and collect inputs.
fn prepare(
    batch: &BatchArgs,
) -> Result<(BatchConfig, OperationChain, Vec<PathBuf>), Box<dyn std::error::Error>> {
    let config = match &batch.config {
        Some(path) => config::load_config(path)?,
        None => BatchConfig::default(),
    };
    let chain = operations::build_chain(&config.operations)?;
    let sources = scan::collect_inputs(
        &batch.inputs,
        scan::ScanOptions {
            recursive: batch.recursive,
        },
    )?;
    if sources.is_empty() {
        return Err("no input images found".into());
    }
    Ok((config, chain, sources))
}

fn pipeline_settings(config: &BatchConfig, batch: &BatchArgs) -> PipelineSettings {
    PipelineSettings {
        max_parallel: config::effective_max_parallel(&config.pipeline, batch.max_parallel),
        failure_policy: config.pipeline.failure_policy,
    }
}

fn run(
    config: &BatchConfig,
    chain: OperationChain,
    settings: PipelineSettings,
    sources: &[PathBuf],
    output_dir: &Path,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = Arc::new(BufferPool::new(config.pool.limits()));
    let memory = MemoryPolicy::for_pool(&pool, config.memory.threshold_bytes, config.memory.source);

    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_pipeline_event(&event) {
                if json {
                    eprintln!("{}", line);
                } else {
                    println!("{}", line);
                }
            }
        }
    });

    let controller = PipelineController::new(chain, RustCodec::new(), pool, settings)
        .with_memory_policy(memory)
        .with_events(tx);
    let result = controller.run(sources, output_dir);
    // Closes the event channel so the printer drains and exits.
    drop(controller);
    printer
        .join()
        .map_err(|_| "progress printer thread panicked")?;

    let report = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::print_report(&report);
    }
    if !report.is_success() {
        return Err(format!(
            "{} of {} images not processed",
            report.failed.len() + report.skipped.len(),
            sources.len()
        )
        .into());
    }
    Ok(())
}
