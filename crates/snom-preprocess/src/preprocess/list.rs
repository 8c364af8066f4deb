//! Composed pipelines.

use super::{Preprocessor, StepDefinition};
use crate::error::Result;
use crate::table::Table;
use std::sync::Arc;

/// An ordered chain of built steps, applied one after another.
///
/// A list is itself a [`Preprocessor`], so the chain produced by one run can
/// be replayed on new data or nested inside a larger chain.
#[derive(Debug, Clone)]
pub struct PreprocessorList {
    preprocessors: Vec<Arc<dyn Preprocessor>>,
}

static_assertions::assert_impl_all!(PreprocessorList: Send, Sync);

impl PreprocessorList {
    pub fn new(preprocessors: Vec<Arc<dyn Preprocessor>>) -> Self {
        Self { preprocessors }
    }

    pub fn len(&self) -> usize {
        self.preprocessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.preprocessors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Preprocessor>> {
        self.preprocessors.iter()
    }
}

impl Preprocessor for PreprocessorList {
    fn name(&self) -> &str {
        "Preprocessor list"
    }

    fn apply(&self, data: &Table) -> Result<Table> {
        let mut current = data.clone();
        for preprocessor in &self.preprocessors {
            current = preprocessor.apply(&current)?;
        }
        Ok(current)
    }

    fn definitions(&self) -> Vec<StepDefinition> {
        self.preprocessors
            .iter()
            .flat_map(|preprocessor| preprocessor.definitions())
            .collect()
    }
}
