//
// main.rs
// Dicom-Transform-rs
//
// Tokio entry point that hands off execution to the CLI layer so Ctrl-C can be awaited next to the workers.
//
// Thales Matheus Mendonça Santos - November 2025

use dicom_transform::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tokio runtime entry point: delegate argument parsing, logging and the pipeline to the CLI module.
    cli::run().await
}
