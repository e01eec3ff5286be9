//
// cli.rs
// Dicom-Transform-rs
//
// Defines the CLI surface with Clap, installs logging and Ctrl-C handling, and runs the transform pipeline.
//
// Thales Matheus Mendonça Santos - November 2025

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use clap::builder::RangedU64ValueParser;
use clap::Parser;
use tracing::{warn, Level};

use crate::cancel::CancellationToken;
use crate::input::InputSource;
use crate::models::RunSummary;
use crate::pipeline::{FileTransformPipeline, TransformOptions, DEFAULT_PARALLELISM};
use crate::script::{read_script_source, ENTRY_POINT};

/// Transform DICOM files in place with a Lua script.
///
/// The script must define `main(d)`; `d` exposes get_string, get_multiple_strings,
/// update_string, delete_tag, delete_group, contains, has_value,
/// count_sequence_items, get_sequence_item, get_sequence_items and
/// create_sequence_item, all addressed by numeric (group, element).
#[derive(Parser, Debug)]
#[command(name = "dicom-transform")]
#[command(about = "Transform DICOM files in place with a Lua script")]
pub struct Cli {
    /// Transform these DICOM files (directories are walked). Read from stdin, one per line, when missing.
    pub files: Vec<PathBuf>,

    /// Script that transforms each file: a path to a Lua file or inline Lua source
    #[arg(short, long)]
    pub script: String,

    /// Transform this many files in parallel
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_PARALLELISM,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub parallelism: usize,

    /// Log every file, not only failures
    #[arg(short, long)]
    pub verbose: bool,
}

pub async fn run() -> anyhow::Result<()> {
    // Parse the raw CLI arguments once, then hand over to the pipeline.
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    execute(cli).await.map(|_| ())
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    // stdout carries the transformed paths only; every diagnostic goes to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to install logger: {e}"))
}

/// Run the transform described by `cli`, printing each transformed path to stdout.
pub async fn execute(cli: Cli) -> anyhow::Result<RunSummary> {
    let script = read_script_source(&cli.script)
        .with_context(|| format!("Failed to read script {}", cli.script))?;

    // Stdin is read on its own thread so Ctrl-C is not held up by a pending line.
    let input = if cli.files.is_empty() {
        InputSource::stdin()
    } else {
        InputSource::from_paths(cli.files)
    };

    let options = TransformOptions {
        parallelism: cli.parallelism,
        entry_point: ENTRY_POINT.to_string(),
    };
    let pipeline = FileTransformPipeline::new(script, options);

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Canceling... files already being transformed will still be saved");
                cancel.cancel();
            }
        })
    };

    let summary = tokio::task::spawn_blocking(move || {
        pipeline.run(&input, &cancel, |path| {
            report_transformed(&mut std::io::stdout().lock(), path);
        })
    })
    .await
    .context("Transform workers stopped unexpectedly")??;

    interrupt.abort();

    if summary.all_workers_failed() {
        bail!("The script could not be loaded; no file was transformed");
    }

    Ok(summary)
}

/// Print one transformed path. A failed write is logged and does not stop the run.
fn report_transformed(out: &mut impl Write, path: &Path) -> bool {
    match writeln!(out, "{}", path.display()) {
        Ok(()) => true,
        Err(e) => {
            warn!("Transformed {} but could not report it: {e}", path.display());
            false
        }
    }
}
