//
// lib.rs
// Dicom-Transform-rs
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//
// Thales Matheus Mendonça Santos - November 2025

// Public surface of the library: address resolution, the script façade, and the pipeline driving them.
pub mod address;
pub mod cancel;
pub mod cli;
pub mod codec;
pub mod dicom_access;
pub mod error;
pub mod facade;
pub mod input;
pub mod models;
pub mod pipeline;
pub mod script;

pub use cancel::CancellationToken;
pub use cli::{run as run_cli, Cli};
pub use facade::DatasetFacade;
pub use pipeline::{FileTransformPipeline, TransformOptions};
pub use script::ScriptBridge;
