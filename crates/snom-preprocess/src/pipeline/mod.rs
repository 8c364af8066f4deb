//! Pipeline module.
//!
//! This module provides the pipeline runner and its progress and
//! cancellation plumbing.

pub mod progress;
mod runner;

pub use progress::{
    CancellationToken, ClosureProgressReporter, ProgressReporter, ProgressUpdate, RunStage,
};
pub use runner::{
    CancelCheck, PipelineRunner, PipelineRunnerBuilder, RunHandle, RunInput, RunOutput, RunState,
    RunStatus,
};
