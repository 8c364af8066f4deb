//! Variables and domains.
//!
//! A [`Domain`] is the ordered description of a table's columns: attributes,
//! class variables and metas. Domains are immutable and shared through `Arc`;
//! a preprocessing step never edits one, it derives a new one with
//! [`Domain::derive`].
//!
//! A [`Variable`] may carry a [`ComputeValue`]. Such a variable is *derived*:
//! its column is not stored anywhere until a table is converted into a domain
//! that contains it, at which point the compute value materializes the column
//! from the source table.

use crate::compute::ComputeValue;
use crate::error::{PreprocessError, Result};
use polars::prelude::DataType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Declared kind of a variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VarKind {
    /// Real-valued column, stored as `Float64`.
    Continuous,
    /// Categorical column, stored as `Float64` codes indexing `values`.
    Discrete { values: Vec<String> },
    /// Free text column, stored as `String`. Only valid among metas.
    String,
}

impl VarKind {
    /// Storage type of columns of this kind.
    pub fn dtype(&self) -> DataType {
        match self {
            Self::Continuous | Self::Discrete { .. } => DataType::Float64,
            Self::String => DataType::String,
        }
    }

    /// Whether values of this kind are numeric.
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Self::String)
    }
}

/// A single named, typed column definition.
#[derive(Debug, Clone)]
pub struct Variable {
    name: String,
    kind: VarKind,
    compute_value: Option<Arc<dyn ComputeValue>>,
}

impl Variable {
    /// Creates a variable without a compute value.
    pub fn new(name: impl Into<String>, kind: VarKind) -> Self {
        Self {
            name: name.into(),
            kind,
            compute_value: None,
        }
    }

    pub fn continuous(name: impl Into<String>) -> Self {
        Self::new(name, VarKind::Continuous)
    }

    pub fn discrete<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            VarKind::Discrete {
                values: values.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, VarKind::String)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &VarKind {
        &self.kind
    }

    pub fn dtype(&self) -> DataType {
        self.kind.dtype()
    }

    pub fn is_primitive(&self) -> bool {
        self.kind.is_primitive()
    }

    /// The rule that materializes this variable's column, if it is derived.
    pub fn compute_value(&self) -> Option<&Arc<dyn ComputeValue>> {
        self.compute_value.as_ref()
    }

    pub fn is_derived(&self) -> bool {
        self.compute_value.is_some()
    }

    /// Returns a copy with the same name and kind, bound to `compute`.
    ///
    /// Any compute value the source variable had is replaced, not chained.
    pub fn copy_with_compute(&self, compute: Arc<dyn ComputeValue>) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind.clone(),
            compute_value: Some(compute),
        }
    }
}

/// Variables are equal when name and kind match and their compute values are
/// interchangeable: both absent, or reporting [`ComputeValue::same_as`].
impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name || self.kind != other.kind {
            return false;
        }
        match (&self.compute_value, &other.compute_value) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a.same_as(b.as_ref()),
            _ => false,
        }
    }
}

/// Ordered description of a table's attribute, class and meta columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    attributes: Vec<Variable>,
    class_vars: Vec<Variable>,
    metas: Vec<Variable>,
}

impl Domain {
    /// Creates a domain, rejecting duplicate names and text columns outside
    /// the metas.
    pub fn new(
        attributes: Vec<Variable>,
        class_vars: Vec<Variable>,
        metas: Vec<Variable>,
    ) -> Result<Self> {
        if let Some(var) = attributes
            .iter()
            .chain(class_vars.iter())
            .find(|v| !v.is_primitive())
        {
            return Err(PreprocessError::InvalidDomain(format!(
                "text variable '{}' can only be a meta",
                var.name()
            )));
        }

        let mut seen = HashSet::new();
        for var in attributes.iter().chain(&class_vars).chain(&metas) {
            if !seen.insert(var.name()) {
                return Err(PreprocessError::InvalidDomain(format!(
                    "duplicate variable name '{}'",
                    var.name()
                )));
            }
        }

        Ok(Self {
            attributes,
            class_vars,
            metas,
        })
    }

    /// Domain with attributes only.
    pub fn from_attributes(attributes: Vec<Variable>) -> Result<Self> {
        Self::new(attributes, Vec::new(), Vec::new())
    }

    /// Derives a domain whose attributes are `new_attributes` and whose
    /// class variables and metas are copied from `self`.
    pub fn derive(&self, new_attributes: Vec<Variable>) -> Result<Self> {
        Self::new(new_attributes, self.class_vars.clone(), self.metas.clone())
    }

    /// Domain whose attributes are the named variables of `self`, in the
    /// given order, with no class variables or metas.
    pub fn select(&self, names: &[&str]) -> Result<Self> {
        let attributes = names
            .iter()
            .map(|name| {
                self.get(name)
                    .cloned()
                    .ok_or_else(|| PreprocessError::ColumnNotFound((*name).to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_attributes(attributes)
    }

    pub fn attributes(&self) -> &[Variable] {
        &self.attributes
    }

    pub fn class_vars(&self) -> &[Variable] {
        &self.class_vars
    }

    pub fn metas(&self) -> &[Variable] {
        &self.metas
    }

    /// All variables in storage order: attributes, class variables, metas.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.attributes
            .iter()
            .chain(self.class_vars.iter())
            .chain(self.metas.iter())
    }

    pub fn len(&self) -> usize {
        self.attributes.len() + self.class_vars.len() + self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Storage position of the variable called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.variables().position(|v| v.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables().find(|v| v.name() == name)
    }
}
