//! Progress reporting and cancellation support for pipeline runs.
//!
//! A run reports a percentage in `0.0..=100.0` at fixed points: while it
//! waits out the debounce, before each step and halfway through each step.
//! Cancellation is cooperative. The runner checks for it right after every
//! progress report.
//!
//! # Example
//!
//! ```rust,ignore
//! use snom_preprocess::{CancellationToken, PipelineRunner, RunInput};
//!
//! let token = CancellationToken::new();
//! let token_clone = token.clone();
//!
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//!     token_clone.cancel();
//! });
//!
//! let result = PipelineRunner::builder()
//!     .cancellation_token(token)
//!     .on_progress(|update| println!("[{:.0}%] {}", update.percent, update.message))
//!     .build()?
//!     .run(RunInput::new(data, steps));
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Phases of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    /// Waiting out the debounce window before the first step
    Waiting,
    /// Building and applying steps
    Preprocessing,
    /// Run finished successfully
    Complete,
    /// Run was cancelled
    Cancelled,
    /// A step failed
    Failed,
}

impl RunStage {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Waiting => "Waiting",
            Self::Preprocessing => "Preprocessing",
            Self::Complete => "Complete",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        }
    }

    /// Whether the run has stopped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Failed)
    }
}

/// One progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: RunStage,

    /// Zero-based index of the current step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,

    /// Number of steps in the run
    pub steps_total: usize,

    /// Overall progress (0.0 - 100.0)
    pub percent: f32,

    /// Human-readable message describing current activity
    pub message: String,
}

impl ProgressUpdate {
    pub fn new(
        stage: RunStage,
        percent: f32,
        steps_total: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            step: None,
            steps_total,
            percent: percent.clamp(0.0, 100.0),
            message: message.into(),
        }
    }

    /// Progress within step `step` of `steps_total`.
    ///
    /// `fraction` is how far through the step the run is: 0.0 before the
    /// step is built, 0.5 once it has been applied to the data.
    pub fn for_step(
        step: usize,
        steps_total: usize,
        fraction: f32,
        message: impl Into<String>,
    ) -> Self {
        let percent = if steps_total > 0 {
            (step as f32 + fraction) / steps_total as f32 * 100.0
        } else {
            100.0
        };
        Self {
            step: Some(step),
            ..Self::new(RunStage::Preprocessing, percent, steps_total, message)
        }
    }

    pub fn complete(steps_total: usize) -> Self {
        Self::new(RunStage::Complete, 100.0, steps_total, "Preprocessing complete")
    }

    /// A cancellation report that keeps the last reported `percent`.
    pub fn cancelled(percent: f32, steps_total: usize) -> Self {
        Self::new(
            RunStage::Cancelled,
            percent,
            steps_total,
            "Preprocessing cancelled",
        )
    }

    /// A failure report that keeps the last reported `percent`.
    pub fn failed(percent: f32, steps_total: usize, message: impl Into<String>) -> Self {
        Self::new(RunStage::Failed, percent, steps_total, message)
    }
}

/// Receiver of progress updates.
///
/// Runs usually happen on a worker thread, so implementations must be
/// `Send + Sync`. Reports arrive often and in order; keep `report` cheap.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// [`ProgressReporter`] backed by a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

/// Token for cancelling a running pipeline.
///
/// Clones share one flag, so [`cancel()`](Self::cancel) may be called from
/// any thread. The runner returns
/// [`PreprocessError::Cancelled`](crate::error::PreprocessError::Cancelled)
/// at its next check.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(CancellationToken: Send, Sync);
static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for another run.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_reset() {
        let token = CancellationToken::new();
        token.cancel();
        token.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_progress_update_for_step() {
        let start = ProgressUpdate::for_step(1, 4, 0.0, "Add constant");
        assert_eq!(start.percent, 25.0);
        assert_eq!(start.step, Some(1));
        assert_eq!(start.stage, RunStage::Preprocessing);

        let half = ProgressUpdate::for_step(3, 4, 0.5, "Add constant");
        assert_eq!(half.percent, 87.5);
    }

    #[test]
    fn test_progress_update_clamps_percent() {
        let update = ProgressUpdate::new(RunStage::Waiting, 140.0, 1, "x");
        assert_eq!(update.percent, 100.0);
        let update = ProgressUpdate::new(RunStage::Waiting, -3.0, 1, "x");
        assert_eq!(update.percent, 0.0);
    }

    #[test]
    fn test_terminal_updates() {
        assert_eq!(ProgressUpdate::complete(2).percent, 100.0);
        assert_eq!(ProgressUpdate::cancelled(25.0, 2).percent, 25.0);

        let failed = ProgressUpdate::failed(50.0, 2, "boom");
        assert_eq!(failed.stage, RunStage::Failed);
        assert_eq!(failed.message, "boom");
        assert!(failed.stage.is_terminal());
        assert!(!RunStage::Preprocessing.is_terminal());
    }

    #[test]
    fn test_progress_update_json_serialization() {
        let update = ProgressUpdate::for_step(0, 2, 0.5, "Add constant");
        let json = serde_json::to_string(&update).expect("Should serialize");

        assert!(json.contains("\"stage\":\"preprocessing\""));
        assert!(json.contains("\"step\":0"));
        assert!(json.contains("\"percent\":25.0"));

        let deserialized: ProgressUpdate = serde_json::from_str(&json).expect("Should deserialize");
        assert_eq!(deserialized, update);
    }

    #[test]
    fn test_run_stage_json_values() {
        let expectations = [
            (RunStage::Waiting, "\"waiting\""),
            (RunStage::Preprocessing, "\"preprocessing\""),
            (RunStage::Complete, "\"complete\""),
            (RunStage::Cancelled, "\"cancelled\""),
            (RunStage::Failed, "\"failed\""),
        ];

        for (stage, expected) in expectations {
            assert_eq!(serde_json::to_string(&stage).unwrap(), expected);
        }
    }
}
