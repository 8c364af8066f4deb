//! Deferred column computations.
//!
//! Derived columns are built in two layers:
//!
//! - a [`SharedComputation`] holds a step's parameters plus the [`Domain`] it
//!   expects as input, and turns a source table into a whole block of output
//!   columns;
//! - a [`ComputeValue`] (here [`SelectColumn`]) is a light handle attached to
//!   one derived [`Variable`](crate::domain::Variable). It evaluates its shared
//!   computation and keeps a single column of the result.
//!
//! Several compute values point at the same shared computation, so one step
//! pays for a single block transform per table conversion instead of one per
//! derived column (see [`ComputeCache`]).

use crate::domain::Domain;
use crate::error::{PreprocessError, Result};
use crate::table::Table;
use polars::prelude::*;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Rule for materializing one derived column from a source table.
///
/// Implementations must be pure: the same source table always yields the
/// same column.
pub trait ComputeValue: fmt::Debug + Send + Sync {
    /// Compute the column from `source`.
    ///
    /// `cache` is scoped to a single table conversion and may be used to share
    /// intermediate results between sibling columns.
    fn compute(&self, source: &Table, cache: &mut ComputeCache) -> Result<Series>;

    /// Whether `other` is interchangeable with `self`.
    ///
    /// The table layer uses this to recognise that a column derived by an
    /// equal rule is already present and can be copied.
    fn same_as(&self, other: &dyn ComputeValue) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// The numeric work behind a shared computation.
///
/// Receives the attribute block of a table already conformed to the recorded
/// input domain and returns a block with the same shape.
pub trait BlockTransform: fmt::Debug + PartialEq + Send + Sync + 'static {
    fn transformed(&self, block: &DataFrame) -> Result<DataFrame>;
}

/// A parameterized transform shared by one or more compute values.
#[derive(Debug)]
pub struct SharedComputation<T> {
    domain: Arc<Domain>,
    transform: T,
}

impl<T: BlockTransform> SharedComputation<T> {
    pub fn new(transform: T, domain: Arc<Domain>) -> Self {
        Self { domain, transform }
    }

    /// The input domain recorded at construction.
    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    /// Evaluate the full output block for `source`.
    ///
    /// If `source` is not in the recorded domain it is first converted into
    /// it; a source from which the recorded domain cannot be rebuilt fails
    /// with [`PreprocessError::DomainMismatch`].
    pub fn evaluate(&self, source: &Table) -> Result<DataFrame> {
        let conformed;
        let data = if Arc::ptr_eq(source.domain(), &self.domain)
            || **source.domain() == *self.domain
        {
            source
        } else {
            debug!("Converting source table into the recorded input domain");
            conformed = Table::from_table(self.domain.clone(), source).map_err(|e| match e {
                PreprocessError::DomainMismatch(reason) => PreprocessError::DomainMismatch(
                    format!("source table is incompatible with the recorded domain: {reason}"),
                ),
                other => other,
            })?;
            &conformed
        };

        let block = data.attribute_block()?;
        let output = self.transform.transformed(&block)?;

        if output.width() != block.width() || output.height() != block.height() {
            return Err(PreprocessError::DomainMismatch(format!(
                "transform produced a {}x{} block from a {}x{} input",
                output.height(),
                output.width(),
                block.height(),
                block.width()
            )));
        }

        Ok(output)
    }
}

impl<T: PartialEq> PartialEq for SharedComputation<T> {
    fn eq(&self, other: &Self) -> bool {
        self.transform == other.transform
            && (Arc::ptr_eq(&self.domain, &other.domain) || self.domain == other.domain)
    }
}

/// Compute value that extracts column `index` from a shared computation.
#[derive(Debug)]
pub struct SelectColumn<T> {
    index: usize,
    common: Arc<SharedComputation<T>>,
}

impl<T: BlockTransform> SelectColumn<T> {
    pub fn new(index: usize, common: Arc<SharedComputation<T>>) -> Self {
        Self { index, common }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn common(&self) -> &Arc<SharedComputation<T>> {
        &self.common
    }

    /// Materialize this column from `source` on its own, without sharing the
    /// shared computation's result with sibling columns.
    pub fn materialize(&self, source: &Table) -> Result<Series> {
        self.compute(source, &mut ComputeCache::new())
    }
}

impl<T: BlockTransform> ComputeValue for SelectColumn<T> {
    fn compute(&self, source: &Table, cache: &mut ComputeCache) -> Result<Series> {
        let key = Arc::as_ptr(&self.common) as usize;
        let block = cache.get_or_evaluate(key, || self.common.evaluate(source))?;

        block
            .get_columns()
            .get(self.index)
            .map(|column| column.as_materialized_series().clone())
            .ok_or_else(|| {
                PreprocessError::DomainMismatch(format!(
                    "column {} requested from a block of {} columns",
                    self.index,
                    block.width()
                ))
            })
    }

    fn same_as(&self, other: &dyn ComputeValue) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| {
                self.index == other.index
                    && (Arc::ptr_eq(&self.common, &other.common) || self.common == other.common)
            })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Results of shared computations for one source table.
///
/// A cache must not outlive the conversion it was created for: keys are the
/// addresses of shared computations kept alive by the target domain, and
/// entries are only valid for the one source table being converted.
#[derive(Debug, Default)]
pub struct ComputeCache {
    blocks: HashMap<usize, DataFrame>,
    evaluations: usize,
}

impl ComputeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the block stored under `key`, evaluating it first if needed.
    pub fn get_or_evaluate<F>(&mut self, key: usize, evaluate: F) -> Result<DataFrame>
    where
        F: FnOnce() -> Result<DataFrame>,
    {
        if let Some(block) = self.blocks.get(&key) {
            return Ok(block.clone());
        }
        let block = evaluate()?;
        self.evaluations += 1;
        self.blocks.insert(key, block.clone());
        Ok(block)
    }

    /// Number of shared computations actually evaluated.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
