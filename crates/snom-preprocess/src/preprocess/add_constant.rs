//! The "add constant" step: shifts every attribute by a fixed amount.

use super::{Preprocessor, StepDefinition, StepFactory, StepParams};
use crate::compute::{BlockTransform, SelectColumn, SharedComputation};
use crate::error::{PreprocessError, Result};
use crate::table::Table;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Adds `amount` to every column of an attribute block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddOffset {
    pub amount: f64,
}

impl BlockTransform for AddOffset {
    fn transformed(&self, block: &DataFrame) -> Result<DataFrame> {
        let columns = block
            .get_columns()
            .iter()
            .map(|column| -> Result<Column> {
                let values = column.as_materialized_series().f64()?;
                let shifted = (values + self.amount)
                    .into_series()
                    .with_name(column.name().clone());
                Ok(Column::from(shifted))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(DataFrame::new(columns)?)
    }
}

/// Parameters of [`AddConstant`].
///
/// Keys other than `amount` are ignored, so definitions saved by an editor
/// that stores extra state still build.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AddConstantParams {
    /// Value added to each attribute, as a number or a numeric string.
    /// Default: 0.0
    #[serde(default, deserialize_with = "number_or_numeric_string")]
    pub amount: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

fn number_or_numeric_string<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer) {
        Ok(NumberOrString::Number(value)) => Ok(value),
        Ok(NumberOrString::String(text)) => text.trim().parse().map_err(|_| {
            serde::de::Error::custom(format!("amount '{text}' is not a number"))
        }),
        Err(_) => Err(serde::de::Error::custom(
            "amount must be a number or a numeric string",
        )),
    }
}

/// Built "add constant" step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddConstant {
    amount: f64,
}

impl AddConstant {
    pub fn new(amount: f64) -> Self {
        Self { amount }
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }
}

impl Preprocessor for AddConstant {
    fn name(&self) -> &str {
        AddConstantFactory::DISPLAY_NAME
    }

    fn apply(&self, data: &Table) -> Result<Table> {
        let common = Arc::new(SharedComputation::new(
            AddOffset {
                amount: self.amount,
            },
            data.domain().clone(),
        ));

        let attributes = data
            .domain()
            .attributes()
            .iter()
            .enumerate()
            .map(|(i, var)| var.copy_with_compute(Arc::new(SelectColumn::new(i, common.clone()))))
            .collect();
        let domain = Arc::new(data.domain().derive(attributes)?);

        debug!(
            "Adding {} to {} attributes",
            self.amount,
            domain.attributes().len()
        );
        Table::from_table(domain, data)
    }

    fn definitions(&self) -> Vec<StepDefinition> {
        vec![StepDefinition::new(AddConstantFactory::QUALNAME).with_param("amount", self.amount)]
    }
}

/// Factory for [`AddConstant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AddConstantFactory;

impl AddConstantFactory {
    pub const QUALNAME: &'static str = "orangecontrib.snom.add_constant_test";
    pub const DISPLAY_NAME: &'static str = "Add constant";

    /// Parse and validate raw parameters.
    pub fn parse(params: &StepParams) -> Result<AddConstantParams> {
        let parsed: AddConstantParams =
            serde_json::from_value(serde_json::Value::Object(params.clone()))
                .map_err(|e| PreprocessError::invalid_step(Self::DISPLAY_NAME, e.to_string()))?;

        if !parsed.amount.is_finite() {
            return Err(PreprocessError::invalid_step(
                Self::DISPLAY_NAME,
                format!("amount must be finite, got {}", parsed.amount),
            ));
        }
        Ok(parsed)
    }
}

impl StepFactory for AddConstantFactory {
    fn qualname(&self) -> &'static str {
        Self::QUALNAME
    }

    fn display_name(&self) -> &'static str {
        Self::DISPLAY_NAME
    }

    fn priority(&self) -> i32 {
        100
    }

    fn build(
        &self,
        params: &StepParams,
        _reference: Option<&Table>,
    ) -> Result<Arc<dyn Preprocessor>> {
        let params = Self::parse(params)?;
        Ok(Arc::new(AddConstant::new(params.amount)))
    }
}
