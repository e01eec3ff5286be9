//
// pipeline.rs
// Dicom-Transform-rs
//
// Parallel transform pipeline: a fixed pool of workers drains the shared input, and each file
// goes through open -> script -> save in isolation from its siblings.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::Path;

use rayon::ThreadPoolBuilder;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::codec::{self, TransformUnit};
use crate::error::{CodecError, PipelineError, TransformError};
use crate::facade::DatasetFacade;
use crate::input::InputSource;
use crate::models::{FileOutcome, RunSummary, SummaryCounters};
use crate::script::{ScriptBridge, ENTRY_POINT};

pub const DEFAULT_PARALLELISM: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOptions {
    /// Number of workers, each with its own script interpreter.
    pub parallelism: usize,
    /// Global script function called once per file.
    pub entry_point: String,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            entry_point: ENTRY_POINT.to_string(),
        }
    }
}

pub struct FileTransformPipeline {
    script: String,
    options: TransformOptions,
}

impl FileTransformPipeline {
    pub fn new(script: impl Into<String>, options: TransformOptions) -> Self {
        Self {
            script: script.into(),
            options,
        }
    }

    /// Transform every file `input` yields and return once all workers stopped.
    ///
    /// `on_success` receives the path of each file that was transformed and
    /// saved; it is called from the worker threads, in no particular order.
    pub fn run<F>(
        &self,
        input: &InputSource,
        cancel: &CancellationToken,
        on_success: F,
    ) -> Result<RunSummary, PipelineError>
    where
        F: Fn(&Path) + Sync,
    {
        let workers = self.options.parallelism.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("transform-{index}"))
            .build()?;

        info!("Transforming files with {} worker(s)", workers);

        let counters = SummaryCounters::default();
        pool.scope(|scope| {
            for worker in 0..workers {
                let counters = &counters;
                let on_success = &on_success;
                scope.spawn(move |_| {
                    self.run_worker(worker, input, cancel, counters, on_success);
                });
            }
        });

        let summary = counters.finish(workers, cancel.is_cancelled());
        info!(
            "Done: {} transformed, {} deleted, {} failed{}",
            summary.transformed,
            summary.deleted,
            summary.failed,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(summary)
    }

    fn run_worker(
        &self,
        worker: usize,
        input: &InputSource,
        cancel: &CancellationToken,
        counters: &SummaryCounters,
        on_success: &(dyn Fn(&Path) + Sync),
    ) {
        // Each worker owns its interpreter; a script that does not load ends this worker only.
        let bridge = match ScriptBridge::load(&self.script)
            .and_then(|bridge| bridge.require_entry(&self.options.entry_point).map(|_| bridge))
        {
            Ok(bridge) => bridge,
            Err(e) => {
                error!(worker, "{e}");
                counters.record_failed_worker();
                return;
            }
        };

        while !cancel.is_cancelled() {
            let Some(path) = input.next_path(cancel) else {
                break;
            };

            match self.transform_file(&path, &bridge) {
                Ok(FileOutcome::Transformed) => {
                    counters.record(FileOutcome::Transformed);
                    on_success(&path);
                }
                Ok(FileOutcome::Deleted) => {
                    counters.record(FileOutcome::Deleted);
                }
                Err(TransformError::Codec(e @ CodecError::Open { .. })) => {
                    warn!(worker, "{e}");
                    counters.record_failure();
                }
                Err(e) => {
                    error!(worker, "{e}");
                    counters.record_failure();
                }
            }
        }

        debug!(worker, "worker finished");
    }

    /// Open, run the script and save one file. Nothing reaches the disk unless every step succeeds.
    pub fn transform_file(
        &self,
        path: &Path,
        bridge: &ScriptBridge,
    ) -> Result<FileOutcome, TransformError> {
        let unit = codec::open(path)?;

        if unit.is_directory_index() {
            debug!("deleting directory index {}", path.display());
            fs::remove_file(path).map_err(|source| CodecError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            return Ok(FileOutcome::Deleted);
        }

        let TransformUnit { meta, dataset, .. } = unit;
        let facade = DatasetFacade::new(Some(meta), dataset);

        if let Err(source) = bridge.invoke(&self.options.entry_point, facade.clone()) {
            return Err(TransformError::Script {
                path: path.to_path_buf(),
                source,
            });
        }

        let (meta, dataset) = facade.into_datasets();
        let Some(meta) = meta else {
            return Err(CodecError::Save {
                path: path.to_path_buf(),
                message: "meta information was detached during the transform".to_string(),
            }
            .into());
        };

        codec::save(TransformUnit {
            path: path.to_path_buf(),
            meta,
            dataset,
        })?;
        debug!("transformed {}", path.display());
        Ok(FileOutcome::Transformed)
    }
}
