//! Preprocessing pipeline engine for tabular spectral data.
//!
//! # Overview
//!
//! A preprocessing step never rewrites a table. It derives a new
//! [`Domain`] in which each transformed attribute carries a compute value
//! describing how to produce its column from the input table, and then
//! converts the input into that domain. Because the recipe lives in the
//! domain, the same transformation can later be replayed on unseen data
//! with [`Table::transform`].
//!
//! Steps that transform all attributes at once share one
//! [`SharedComputation`] between the per-column [`SelectColumn`] compute
//! values, so converting a table evaluates the whole block a single time.
//!
//! - **Domains and tables**: [`Variable`], [`Domain`], [`Table`]
//! - **Derived columns**: [`ComputeValue`], [`BlockTransform`],
//!   [`SharedComputation`], [`SelectColumn`], [`ComputeCache`]
//! - **Steps**: [`StepDefinition`], [`Preprocessor`], [`StepFactory`],
//!   [`StepRegistry`], [`PreprocessorList`]
//! - **Runs**: [`PipelineRunner`] with debounce, progress reporting and
//!   cancellation
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use snom_preprocess::{PipelineRunner, Preprocessor, RunInput, StepDefinition, Table};
//!
//! let data = Table::from_frame(df, None)?;
//! let steps = vec![
//!     StepDefinition::new("orangecontrib.snom.add_constant_test").with_param("amount", 10.0),
//! ];
//!
//! let output = PipelineRunner::builder()
//!     .on_progress(|update| println!("[{:.0}%] {}", update.percent, update.message))
//!     .build()?
//!     .run(RunInput::new(data, steps))?;
//!
//! // replay the same steps on new data
//! let pipeline = output.pipeline.expect("steps were given");
//! let replayed = pipeline.apply(&new_data)?;
//! ```

pub mod compute;
pub mod config;
pub mod domain;
pub mod error;
pub mod pipeline;
pub mod preprocess;
pub mod table;
pub mod utils;

// Re-exports for convenient access
pub use compute::{BlockTransform, ComputeCache, ComputeValue, SelectColumn, SharedComputation};
pub use config::{ConfigValidationError, RunnerConfig, RunnerConfigBuilder};
pub use domain::{Domain, VarKind, Variable};
pub use error::{PreprocessError, Result as PreprocessResult, ResultExt};
pub use pipeline::{
    CancellationToken, ClosureProgressReporter, PipelineRunner, PipelineRunnerBuilder,
    ProgressReporter, ProgressUpdate, RunHandle, RunInput, RunOutput, RunStage, RunState,
    RunStatus,
};
pub use preprocess::{
    AddConstant, AddConstantFactory, AddConstantParams, Preprocessor, PreprocessorList,
    StepDefinition, StepFactory, StepParams, StepRegistry,
};
pub use table::Table;
pub use utils::{DtypeCategory, get_dtype_category, is_numeric_dtype};
