//
// error.rs
// Dicom-Transform-rs
//
// Error taxonomy shared by the façade, the codec, the script bridge and the pipeline.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;

use dicom::core::{Tag, VR};
use thiserror::Error;

/// Failures raised by façade operations; they surface to scripts as runtime errors.
#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("cannot access meta information ({group:04X},{element:04X}) from a nested data set")]
    InvalidAddress { group: u16, element: u16 },

    #[error("attribute {0} is not a sequence")]
    NotASequence(Tag),

    #[error("sequence item {index} of {tag} is out of range ({count} item(s))")]
    ItemOutOfRange { tag: Tag, index: usize, count: usize },

    #[error("meta information attribute {0} cannot hold a sequence")]
    MetaSequence(Tag),

    #[error("value {value:?} does not fit attribute {tag} with VR {vr}")]
    InvalidValue { tag: Tag, vr: VR, value: String },
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("not a DICOM file: {}: {message}", .path.display())]
    Open { path: PathBuf, message: String },

    #[error("failed to overwrite the original DICOM file: {}: {message}", .path.display())]
    Save { path: PathBuf, message: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("invalid script: {0}")]
    Load(String),

    #[error("invalid script: entry function `{0}` is not defined")]
    MissingEntry(String),

    #[error("script failed: {0}")]
    Invocation(String),
}

/// Why a single file was not transformed.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("failed to transform the provided DICOM file: {}: {source}", .path.display())]
    Script {
        path: PathBuf,
        #[source]
        source: ScriptError,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to start transform workers: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
