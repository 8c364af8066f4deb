//! Pipeline runner.
//!
//! Turns a list of [`StepDefinition`]s into built steps, applies them to a
//! data table (and, optionally, a reference table) and packages the built
//! steps as a reusable [`PreprocessorList`].

use crate::config::{ConfigValidationError, RunnerConfig};
use crate::error::{PreprocessError, Result};
use crate::pipeline::progress::{
    CancellationToken, ClosureProgressReporter, ProgressReporter, ProgressUpdate, RunStage,
};
use crate::preprocess::{Preprocessor, PreprocessorList, StepDefinition, StepRegistry};
use crate::table::Table;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Caller-supplied cancellation predicate.
pub type CancelCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RunState {
    /// No run has started yet.
    #[default]
    Idle,
    /// A run is in progress. `fraction_done` is 0.0 before step
    /// `step_index` is built and 0.5 once it has been applied to the data.
    Running { step_index: usize, fraction_done: f32 },
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Inputs of one run.
#[derive(Debug, Clone, Default)]
pub struct RunInput {
    /// Table to transform. Without it the run only builds the pipeline.
    pub data: Option<Table>,
    /// Table handed to every step's factory while building.
    pub reference: Option<Table>,
    pub steps: Vec<StepDefinition>,
    /// Overrides [`RunnerConfig::process_reference`] for this run.
    pub process_reference: Option<bool>,
}

impl RunInput {
    pub fn new(data: Table, steps: Vec<StepDefinition>) -> Self {
        Self {
            data: Some(data),
            steps,
            ..Self::default()
        }
    }

    /// A run that only builds the pipeline.
    pub fn without_data(steps: Vec<StepDefinition>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    pub fn with_reference(mut self, reference: Table) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn process_reference(mut self, process: bool) -> Self {
        self.process_reference = Some(process);
        self
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// The transformed data, present when input data was given.
    pub data: Option<Table>,
    /// The built steps, or `None` when no steps were given.
    pub pipeline: Option<PreprocessorList>,
}

/// Executes preprocessing runs.
///
/// Use [`PipelineRunner::builder()`] to create a runner.
///
/// # Example
///
/// ```rust,ignore
/// use snom_preprocess::{PipelineRunner, RunInput, RunnerConfig, StepDefinition};
///
/// let steps = vec![
///     StepDefinition::new("orangecontrib.snom.add_constant_test").with_param("amount", 10.0),
/// ];
///
/// let output = PipelineRunner::builder()
///     .config(RunnerConfig::builder().debounce_polls(0).build()?)
///     .on_progress(|update| println!("[{:.0}%] {}", update.percent, update.message))
///     .build()?
///     .run(RunInput::new(data, steps))?;
/// ```
pub struct PipelineRunner {
    config: RunnerConfig,
    registry: StepRegistry,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: CancellationToken,
    should_cancel: Option<CancelCheck>,
}

static_assertions::assert_impl_all!(PipelineRunner: Send, Sync);

impl PipelineRunner {
    /// Create a new runner builder.
    pub fn builder() -> PipelineRunnerBuilder {
        PipelineRunnerBuilder::default()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Token shared by every run of this runner. Cancelling it stops all of
    /// them; use [`RunHandle::cancel`] to stop a single run.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Run `input` to completion on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns `Err(PreprocessError::Cancelled)` if cancellation was requested
    /// at one of the checkpoints. Errors from building or applying a step are
    /// returned unchanged. No partial output is produced in either case.
    pub fn run(&self, input: RunInput) -> Result<RunOutput> {
        self.execute(input, &RunControl::default())
    }

    /// Start `input` on a worker thread.
    ///
    /// Each run gets its own [`RunStatus`] and cancellation token, so runs
    /// started from one runner never observe each other's state.
    pub fn spawn(self: &Arc<Self>, input: RunInput) -> Result<RunHandle> {
        let control = RunControl::default();
        let runner = Arc::clone(self);
        let worker = control.clone();

        let thread = std::thread::Builder::new()
            .name("preprocess-run".to_string())
            .spawn(move || runner.execute(input, &worker))
            .map_err(|e| PreprocessError::Internal(format!("failed to start run thread: {e}")))?;

        Ok(RunHandle { control, thread })
    }

    fn execute(&self, input: RunInput, control: &RunControl) -> Result<RunOutput> {
        let steps_total = input.steps.len();
        let mut percent = 0.0;
        control.status.set(RunState::Running {
            step_index: 0,
            fraction_done: 0.0,
        });

        match self.run_internal(input, control, &mut percent) {
            Ok(output) => {
                control.status.set(RunState::Completed);
                self.report_progress(ProgressUpdate::complete(steps_total));
                Ok(output)
            }
            Err(e) if e.is_cancelled() => {
                warn!("Preprocessing cancelled at {:.0}%", percent);
                control.status.set(RunState::Cancelled);
                self.report_progress(ProgressUpdate::cancelled(percent, steps_total));
                Err(e)
            }
            Err(e) => {
                error!("Preprocessing failed: {}", e);
                control.status.set(RunState::Failed);
                self.report_progress(ProgressUpdate::failed(percent, steps_total, e.to_string()));
                Err(e)
            }
        }
    }

    fn run_internal(
        &self,
        input: RunInput,
        control: &RunControl,
        percent: &mut f32,
    ) -> Result<RunOutput> {
        let start_time = Instant::now();
        let RunInput {
            mut data,
            mut reference,
            steps,
            process_reference,
        } = input;
        let process_reference = process_reference.unwrap_or(self.config.process_reference);
        let steps_total = steps.len();

        info!(
            "Starting preprocessing: {} steps, data: {}, reference: {}",
            steps_total,
            data.is_some(),
            reference.is_some()
        );

        for _ in 0..self.config.debounce_polls {
            std::thread::sleep(self.config.debounce_interval());
            self.checkpoint(
                control,
                ProgressUpdate::new(RunStage::Waiting, 0.0, steps_total, "Waiting for input to settle"),
                percent,
            )?;
        }

        let mut built: Vec<Arc<dyn Preprocessor>> = Vec::with_capacity(steps_total);
        for (i, definition) in steps.iter().enumerate() {
            control.status.set(RunState::Running {
                step_index: i,
                fraction_done: 0.0,
            });
            self.checkpoint(
                control,
                ProgressUpdate::for_step(i, steps_total, 0.0, format!("Building {}", definition.qualname)),
                percent,
            )?;

            let step = self.registry.build(definition, reference.as_ref())?;
            debug!("Step {}/{}: {}", i + 1, steps_total, step.name());

            if let Some(table) = &data {
                data = Some(step.apply(table)?);
            }

            control.status.set(RunState::Running {
                step_index: i,
                fraction_done: 0.5,
            });
            self.checkpoint(
                control,
                ProgressUpdate::for_step(i, steps_total, 0.5, format!("Applied {}", step.name())),
                percent,
            )?;

            // the last step's output is never needed to build anything
            if process_reference
                && i + 1 != steps_total
                && let Some(table) = &reference
            {
                reference = Some(step.apply(table)?);
            }

            built.push(step);
        }

        let pipeline = (!built.is_empty()).then(|| PreprocessorList::new(built));

        info!(
            "Preprocessing completed in {:.2}s",
            start_time.elapsed().as_secs_f64()
        );
        Ok(RunOutput { data, pipeline })
    }

    /// Report `update`, then return `Err(Cancelled)` if cancellation was
    /// requested.
    fn checkpoint(
        &self,
        control: &RunControl,
        update: ProgressUpdate,
        percent: &mut f32,
    ) -> Result<()> {
        *percent = update.percent;
        self.report_progress(update);
        self.check_cancelled(control)
    }

    /// Check if cancellation has been requested for this run or the runner.
    fn check_cancelled(&self, control: &RunControl) -> Result<()> {
        let requested = control.token.is_cancelled()
            || self.cancellation_token.is_cancelled()
            || self.should_cancel.as_ref().is_some_and(|check| check());
        if requested {
            return Err(PreprocessError::Cancelled);
        }
        Ok(())
    }

    /// Report progress if a reporter is configured.
    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }
}

/// Shared view of one run's [`RunState`].
#[derive(Debug, Clone, Default)]
pub struct RunStatus(Arc<Mutex<RunState>>);

impl RunStatus {
    pub fn get(&self) -> RunState {
        *self.0.lock()
    }

    fn set(&self, state: RunState) {
        *self.0.lock() = state;
    }
}

/// State and cancellation owned by a single run.
#[derive(Debug, Clone, Default)]
struct RunControl {
    status: RunStatus,
    token: CancellationToken,
}

/// A run started with [`PipelineRunner::spawn`].
#[derive(Debug)]
pub struct RunHandle {
    control: RunControl,
    thread: JoinHandle<Result<RunOutput>>,
}

static_assertions::assert_impl_all!(RunHandle: Send, Sync);

impl RunHandle {
    pub fn state(&self) -> RunState {
        self.control.status.get()
    }

    /// A status view that outlives the handle.
    pub fn status(&self) -> RunStatus {
        self.control.status.clone()
    }

    /// Request cancellation of this run only.
    pub fn cancel(&self) {
        self.control.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run and return its result.
    pub fn join(self) -> Result<RunOutput> {
        self.thread
            .join()
            .map_err(|_| PreprocessError::Internal("preprocessing thread panicked".to_string()))?
    }
}

/// Builder for [`PipelineRunner`].
#[derive(Default)]
pub struct PipelineRunnerBuilder {
    config: Option<RunnerConfig>,
    registry: Option<StepRegistry>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: Option<CancellationToken>,
    should_cancel: Option<CancelCheck>,
}

static_assertions::assert_impl_all!(PipelineRunnerBuilder: Send);

impl PipelineRunnerBuilder {
    /// Set the runner configuration.
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the step registry. Defaults to [`StepRegistry::with_defaults`].
    pub fn registry(mut self, registry: StepRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set a progress reporter for receiving updates during a run.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    ///
    /// For more complex scenarios, use [`progress_reporter`](Self::progress_reporter).
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Set a cancellation token for stopping runs.
    ///
    /// Clone the token and call [`CancellationToken::cancel()`] from any
    /// thread. The runner returns [`PreprocessError::Cancelled`] at its next
    /// checkpoint.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Set a predicate polled at every checkpoint alongside the token.
    pub fn should_cancel<F>(mut self, check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.should_cancel = Some(Arc::new(check));
        self
    }

    /// Build the runner.
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> std::result::Result<PipelineRunner, ConfigValidationError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(PipelineRunner {
            config,
            registry: self.registry.unwrap_or_else(StepRegistry::with_defaults),
            progress_reporter: self.progress_reporter,
            cancellation_token: self.cancellation_token.unwrap_or_default(),
            should_cancel: self.should_cancel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Domain, Variable};
    use crate::preprocess::{AddConstant, AddConstantFactory, StepFactory, StepParams};
    use polars::prelude::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick_config() -> RunnerConfig {
        RunnerConfig::builder().debounce_polls(0).build().unwrap()
    }

    fn table(values: [f64; 3]) -> Table {
        let domain = Domain::from_attributes(vec![Variable::continuous("x")]).unwrap();
        Table::new(Arc::new(domain), df!["x" => values].unwrap()).unwrap()
    }

    fn add(amount: f64) -> StepDefinition {
        StepDefinition::new(AddConstantFactory::QUALNAME).with_param("amount", amount)
    }

    /// Factory whose build waits until `gate` is set.
    struct BlockingFactory(Arc<AtomicUsize>);

    impl BlockingFactory {
        const QUALNAME: &'static str = "test.blocking";
    }

    impl StepFactory for BlockingFactory {
        fn qualname(&self) -> &'static str {
            Self::QUALNAME
        }

        fn display_name(&self) -> &'static str {
            "Blocking"
        }

        fn build(&self, _: &StepParams, _: Option<&Table>) -> Result<Arc<dyn Preprocessor>> {
            while self.0.load(Ordering::SeqCst) == 0 {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            Ok(Arc::new(AddConstant::new(0.0)))
        }
    }

    struct PanickingFactory;

    impl StepFactory for PanickingFactory {
        fn qualname(&self) -> &'static str {
            "test.panic"
        }

        fn display_name(&self) -> &'static str {
            "Panic"
        }

        fn build(&self, _: &StepParams, _: Option<&Table>) -> Result<Arc<dyn Preprocessor>> {
            panic!("step construction failed")
        }
    }

    #[test]
    fn test_runner_builder_default() {
        let runner = PipelineRunner::builder().build().unwrap();
        assert_eq!(runner.config(), &RunnerConfig::default());
        assert!(runner.registry().get(AddConstantFactory::QUALNAME).is_some());
    }

    #[test]
    fn test_runner_builder_rejects_invalid_config() {
        let config = RunnerConfig {
            debounce_polls: 1_000,
            debounce_interval_ms: 1_000,
            process_reference: true,
        };
        assert!(PipelineRunner::builder().config(config).build().is_err());
    }

    #[test]
    fn test_run_applies_steps_in_order() {
        let runner = PipelineRunner::builder().config(quick_config()).build().unwrap();
        let output = runner
            .run(RunInput::new(table([1.0, 2.0, 3.0]), vec![add(10.0), add(1.0)]))
            .unwrap();

        let data = output.data.unwrap();
        assert_eq!(data.column_f64("x").unwrap(), vec![12.0, 13.0, 14.0]);
        assert_eq!(output.pipeline.unwrap().len(), 2);
    }

    #[test]
    fn test_run_without_data_builds_pipeline() {
        let runner = PipelineRunner::builder().config(quick_config()).build().unwrap();
        let output = runner.run(RunInput::without_data(vec![add(1.0)])).unwrap();

        assert!(output.data.is_none());
        assert_eq!(output.pipeline.unwrap().definitions(), vec![add(1.0)]);
    }

    #[test]
    fn test_run_with_no_steps_returns_input() {
        let runner = PipelineRunner::builder().config(quick_config()).build().unwrap();
        let input = table([1.0, 2.0, 3.0]);
        let output = runner.run(RunInput::new(input.clone(), Vec::new())).unwrap();

        assert_eq!(output.data.unwrap(), input);
        assert!(output.pipeline.is_none());
    }

    #[test]
    fn test_run_unknown_step_fails() {
        let runner = Arc::new(PipelineRunner::builder().config(quick_config()).build().unwrap());
        let handle = runner
            .spawn(RunInput::new(
                table([1.0, 2.0, 3.0]),
                vec![StepDefinition::new("does.not.exist")],
            ))
            .unwrap();
        let status = handle.status();

        assert!(matches!(handle.join(), Err(PreprocessError::UnknownStep(_))));
        assert_eq!(status.get(), RunState::Failed);
    }

    #[test]
    fn test_should_cancel_closure_stops_run() {
        let runner = Arc::new(
            PipelineRunner::builder()
                .config(quick_config())
                .should_cancel(|| true)
                .build()
                .unwrap(),
        );

        let handle = runner
            .spawn(RunInput::new(table([1.0, 2.0, 3.0]), vec![add(1.0)]))
            .unwrap();
        let status = handle.status();
        assert!(matches!(handle.join(), Err(PreprocessError::Cancelled)));
        assert_eq!(status.get(), RunState::Cancelled);
    }

    #[test]
    fn test_cancel_handle_stops_only_its_run() {
        let runner = Arc::new(
            PipelineRunner::builder()
                .config(
                    RunnerConfig::builder()
                        .debounce_polls(400)
                        .debounce_interval_ms(10)
                        .build()
                        .unwrap(),
                )
                .build()
                .unwrap(),
        );

        let first = runner
            .spawn(RunInput::new(table([1.0, 2.0, 3.0]), vec![add(1.0)]))
            .unwrap();
        let second = runner
            .spawn(RunInput::new(table([1.0, 2.0, 3.0]), Vec::new()).process_reference(false))
            .unwrap();

        second.cancel();
        let second_status = second.status();
        assert!(second.join().unwrap_err().is_cancelled());
        assert_eq!(second_status.get(), RunState::Cancelled);

        // cancelling one run leaves the other waiting
        assert!(!first.state().is_terminal());
        assert!(!first.is_finished());
        assert!(!runner.cancellation_token().is_cancelled());

        first.cancel();
        let first_status = first.status();
        assert!(first.join().unwrap_err().is_cancelled());
        assert_eq!(first_status.get(), RunState::Cancelled);
    }

    #[test]
    fn test_concurrent_run_completes_while_other_runs() {
        let gate = Arc::new(AtomicUsize::new(0));
        let mut registry = StepRegistry::with_defaults();
        registry.register(Arc::new(BlockingFactory(gate.clone())));
        let runner = Arc::new(
            PipelineRunner::builder()
                .config(quick_config())
                .registry(registry)
                .build()
                .unwrap(),
        );

        let blocked = runner
            .spawn(RunInput::new(
                table([1.0, 2.0, 3.0]),
                vec![StepDefinition::new(BlockingFactory::QUALNAME)],
            ))
            .unwrap();
        let quick = runner
            .spawn(RunInput::new(table([1.0, 2.0, 3.0]), vec![add(10.0)]))
            .unwrap();
        let quick_status = quick.status();

        let output = quick.join().unwrap();
        assert_eq!(
            output.data.unwrap().column_f64("x").unwrap(),
            vec![11.0, 12.0, 13.0]
        );
        assert_eq!(quick_status.get(), RunState::Completed);
        assert!(!blocked.state().is_terminal());

        gate.store(1, Ordering::SeqCst);
        let blocked_status = blocked.status();
        blocked.join().unwrap();
        assert_eq!(blocked_status.get(), RunState::Completed);
    }

    #[test]
    fn test_panicking_step_is_internal_error() {
        let mut registry = StepRegistry::new();
        registry.register(Arc::new(PanickingFactory));
        let runner = Arc::new(
            PipelineRunner::builder()
                .config(quick_config())
                .registry(registry)
                .build()
                .unwrap(),
        );

        let handle = runner
            .spawn(RunInput::without_data(vec![StepDefinition::new("test.panic")]))
            .unwrap();
        let err = handle.join().unwrap_err();
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_debounce_reports_waiting_progress() {
        let waits = Arc::new(AtomicUsize::new(0));
        let waits_clone = waits.clone();

        let runner = PipelineRunner::builder()
            .config(
                RunnerConfig::builder()
                    .debounce_polls(3)
                    .debounce_interval_ms(1)
                    .build()
                    .unwrap(),
            )
            .on_progress(move |update| {
                if update.stage == RunStage::Waiting {
                    assert_eq!(update.percent, 0.0);
                    waits_clone.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap();

        runner
            .run(RunInput::new(table([1.0, 2.0, 3.0]), vec![add(1.0)]))
            .unwrap();
        assert_eq!(waits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cancel_during_debounce_keeps_zero_percent() {
        let token = CancellationToken::new();
        let updates = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let updates_clone = updates.clone();

        let runner = PipelineRunner::builder()
            .config(
                RunnerConfig::builder()
                    .debounce_polls(2)
                    .debounce_interval_ms(1)
                    .build()
                    .unwrap(),
            )
            .cancellation_token(token.clone())
            .on_progress(move |update| updates_clone.lock().push(update))
            .build()
            .unwrap();

        token.cancel();
        let result = runner.run(RunInput::new(table([1.0, 2.0, 3.0]), vec![add(1.0)]));
        assert!(result.unwrap_err().is_cancelled());

        let updates = updates.lock();
        let last = updates.last().unwrap();
        assert_eq!(last.stage, RunStage::Cancelled);
        assert_eq!(last.percent, 0.0);
        assert_eq!(updates.len(), 2);
    }

    #[test]
    fn test_run_state_is_terminal() {
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(
            !RunState::Running {
                step_index: 0,
                fraction_done: 0.5
            }
            .is_terminal()
        );
    }
}
