//! Preprocessing steps.
//!
//! A step goes through two forms:
//!
//! - a [`StepDefinition`]: the qualified name of a step kind plus free-form
//!   JSON parameters, as produced by an editor or read from a file;
//! - a built [`Preprocessor`]: a typed, immutable instance produced by the
//!   kind's [`StepFactory`], which validates the parameters once.
//!
//! [`StepRegistry`] maps qualified names to factories.

mod add_constant;
mod list;
mod registry;

pub use add_constant::{AddConstant, AddConstantFactory, AddConstantParams, AddOffset};
pub use list::PreprocessorList;
pub use registry::StepRegistry;

use crate::error::Result;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Raw step parameters, keyed by name.
pub type StepParams = serde_json::Map<String, serde_json::Value>;

/// A step as configured by the user, before validation.
///
/// # Example
///
/// ```rust,ignore
/// let json = r#"{"qualname": "orangecontrib.snom.add_constant_test", "params": {"amount": 2.5}}"#;
/// let definition: StepDefinition = serde_json::from_str(json)?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Qualified name of the step kind in the [`StepRegistry`].
    pub qualname: String,
    /// Parameters; missing keys take the step's documented defaults.
    #[serde(default)]
    pub params: StepParams,
}

impl StepDefinition {
    pub fn new(qualname: impl Into<String>) -> Self {
        Self {
            qualname: qualname.into(),
            params: StepParams::new(),
        }
    }

    /// Set a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// A built preprocessing step.
///
/// `apply` must not modify its input. It returns a table whose domain is
/// derived from the input's, with every attribute either kept or replaced by a
/// variable whose compute value reads the input.
pub trait Preprocessor: fmt::Debug + Send + Sync {
    /// Human-readable name used in logs and progress messages.
    fn name(&self) -> &str;

    fn apply(&self, data: &Table) -> Result<Table>;

    /// Definitions that rebuild this step through a [`StepRegistry`].
    fn definitions(&self) -> Vec<StepDefinition>;
}

/// Factory turning a [`StepDefinition`]'s parameters into a [`Preprocessor`].
pub trait StepFactory: Send + Sync {
    /// Unique qualified name stored in step definitions.
    fn qualname(&self) -> &'static str;

    /// Name shown in step menus.
    fn display_name(&self) -> &'static str;

    /// Ordering hint for menus; lower comes first.
    fn priority(&self) -> i32 {
        0
    }

    /// Validate `params` and build the step.
    ///
    /// `reference` may be consulted for defaults or validation but is
    /// optional. Malformed parameters fail with
    /// [`PreprocessError::InvalidStepConfig`](crate::error::PreprocessError::InvalidStepConfig).
    fn build(&self, params: &StepParams, reference: Option<&Table>)
    -> Result<Arc<dyn Preprocessor>>;
}
