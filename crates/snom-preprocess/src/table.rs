//! Tables: a domain paired with row-aligned column data.
//!
//! Column data lives in a Polars [`DataFrame`] with one column per variable,
//! in domain storage order and named after the variable. Polars columns are
//! reference counted, so converting a table into a domain that keeps some of
//! its variables shares those columns instead of copying them.

use crate::compute::ComputeCache;
use crate::domain::{Domain, Variable};
use crate::error::{PreprocessError, Result, ResultExt};
use crate::utils::{DtypeCategory, get_dtype_category};
use polars::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// A dataset: a [`Domain`] and the columns it describes.
///
/// Tables are never modified in place. Every transformation produces a new
/// table, typically through [`Table::from_table`].
#[derive(Debug, Clone)]
pub struct Table {
    domain: Arc<Domain>,
    data: DataFrame,
}

static_assertions::assert_impl_all!(Table: Send, Sync);

impl Table {
    /// Pair `data` with `domain`, checking that columns follow the domain's
    /// storage order, names and types.
    pub fn new(domain: Arc<Domain>, data: DataFrame) -> Result<Self> {
        if data.width() != domain.len() {
            return Err(PreprocessError::InvalidTable(format!(
                "domain has {} variables but data has {} columns",
                domain.len(),
                data.width()
            )));
        }

        for (var, column) in domain.variables().zip(data.get_columns()) {
            if column.name().as_str() != var.name() {
                return Err(PreprocessError::InvalidTable(format!(
                    "expected column '{}', found '{}'",
                    var.name(),
                    column.name()
                )));
            }
            if *column.dtype() != var.dtype() {
                return Err(PreprocessError::InvalidTable(format!(
                    "column '{}' has type {} but variable expects {}",
                    var.name(),
                    column.dtype(),
                    var.dtype()
                )));
            }
        }

        Ok(Self { domain, data })
    }

    /// Build a table from a loaded frame, inferring the domain.
    ///
    /// Numeric columns become continuous attributes (cast to `Float64`), text
    /// columns become string metas. `class_var`, if given, names a numeric
    /// column to use as the continuous class variable.
    pub fn from_frame(data: DataFrame, class_var: Option<&str>) -> Result<Self> {
        if let Some(name) = class_var
            && data.column(name).is_err()
        {
            return Err(PreprocessError::ColumnNotFound(name.to_string()));
        }

        let mut attributes = Vec::new();
        let mut class_vars = Vec::new();
        let mut metas = Vec::new();
        let mut attribute_columns = Vec::new();
        let mut class_columns = Vec::new();
        let mut meta_columns = Vec::new();

        for column in data.get_columns() {
            let name = column.name().as_str();
            match get_dtype_category(column.dtype()) {
                DtypeCategory::Numeric => {
                    let cast = column
                        .cast(&DataType::Float64)
                        .context(format!("casting column '{name}'"))?;
                    if class_var == Some(name) {
                        class_vars.push(Variable::continuous(name));
                        class_columns.push(cast);
                    } else {
                        attributes.push(Variable::continuous(name));
                        attribute_columns.push(cast);
                    }
                }
                DtypeCategory::String if class_var != Some(name) => {
                    metas.push(Variable::string(name));
                    meta_columns.push(column.clone());
                }
                _ => {
                    return Err(PreprocessError::InvalidTable(format!(
                        "column '{}' of type {} cannot be used{}",
                        name,
                        column.dtype(),
                        if class_var == Some(name) {
                            " as a class variable"
                        } else {
                            ""
                        }
                    )));
                }
            }
        }

        let domain = Domain::new(attributes, class_vars, metas)?;
        let columns = attribute_columns
            .into_iter()
            .chain(class_columns)
            .chain(meta_columns)
            .collect::<Vec<_>>();

        Self::new(Arc::new(domain), DataFrame::new(columns)?)
    }

    /// Convert `source` into `domain`.
    ///
    /// Each target variable is either copied from `source` (when an equal
    /// variable exists there) or materialized by its compute value. A variable
    /// that is neither present nor derivable fails with
    /// [`PreprocessError::DomainMismatch`]. `source` is never modified.
    pub fn from_table(domain: Arc<Domain>, source: &Table) -> Result<Self> {
        if Arc::ptr_eq(&domain, &source.domain) || *domain == *source.domain {
            return Ok(Self {
                domain,
                data: source.data.clone(),
            });
        }

        let mut cache = ComputeCache::new();
        let mut columns = Vec::with_capacity(domain.len());

        for var in domain.variables() {
            let series = match source.domain.get(var.name()) {
                Some(existing) if existing == var => source
                    .data
                    .column(var.name())?
                    .as_materialized_series()
                    .clone(),
                _ => match var.compute_value() {
                    Some(compute) => compute
                        .compute(source, &mut cache)?
                        .with_name(var.name().into()),
                    None => {
                        return Err(PreprocessError::DomainMismatch(format!(
                            "variable '{}' is not in the source domain and cannot be computed",
                            var.name()
                        )));
                    }
                },
            };

            if series.len() != source.height() {
                return Err(PreprocessError::DomainMismatch(format!(
                    "variable '{}' materialized {} rows, source has {}",
                    var.name(),
                    series.len(),
                    source.height()
                )));
            }
            columns.push(Column::from(series));
        }

        debug!(
            "Converted table: {} variables, {} shared computations evaluated",
            domain.len(),
            cache.evaluations()
        );

        Self::new(domain, DataFrame::new(columns)?)
    }

    /// Convert this table into `domain`. See [`Table::from_table`].
    pub fn transform(&self, domain: Arc<Domain>) -> Result<Self> {
        Self::from_table(domain, self)
    }

    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.data.height()
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.data
            .column(name)
            .map_err(|_| PreprocessError::ColumnNotFound(name.to_string()))
    }

    /// Values of a numeric column, with missing values as `NaN`.
    pub fn column_f64(&self, name: &str) -> Result<Vec<f64>> {
        let values = self.column(name)?.as_materialized_series().f64()?;
        Ok(values.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }

    /// The attribute columns, in domain order.
    pub fn attribute_block(&self) -> Result<DataFrame> {
        let names = self.domain.attributes().iter().map(Variable::name);
        Ok(self.data.select(names)?)
    }
}

/// Tables are equal when their domains are equal and their data match,
/// missing values included.
impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        (Arc::ptr_eq(&self.domain, &other.domain) || self.domain == other.domain)
            && self.data.equals_missing(&other.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spectra() -> Table {
        let domain = Domain::new(
            vec![Variable::continuous("1000"), Variable::continuous("1002")],
            vec![],
            vec![Variable::string("map")],
        )
        .unwrap();
        let data = df![
            "1000" => [0.1, 0.2, 0.3],
            "1002" => [1.1, 1.2, 1.3],
            "map" => ["a", "b", "c"],
        ]
        .unwrap();
        Table::new(Arc::new(domain), data).unwrap()
    }

    #[test]
    fn test_new_rejects_misordered_columns() {
        let domain = Domain::from_attributes(vec![
            Variable::continuous("a"),
            Variable::continuous("b"),
        ])
        .unwrap();
        let data = df!["b" => [1.0], "a" => [2.0]].unwrap();
        assert!(matches!(
            Table::new(Arc::new(domain), data),
            Err(PreprocessError::InvalidTable(_))
        ));
    }

    #[test]
    fn test_new_rejects_wrong_dtype() {
        let domain = Domain::from_attributes(vec![Variable::continuous("a")]).unwrap();
        let data = df!["a" => ["x"]].unwrap();
        assert!(matches!(
            Table::new(Arc::new(domain), data),
            Err(PreprocessError::InvalidTable(_))
        ));
    }

    #[test]
    fn test_from_table_same_domain_is_identity() {
        let table = spectra();
        let converted = Table::from_table(table.domain().clone(), &table).unwrap();
        assert_eq!(converted, table);
    }

    #[test]
    fn test_transform_selects_single_feature() {
        let table = spectra();
        let domain = Arc::new(table.domain().select(&["1002"]).unwrap());
        let preview = table.transform(domain).unwrap();

        assert_eq!(preview.data().width(), 1);
        assert_eq!(preview.column_f64("1002").unwrap(), vec![1.1, 1.2, 1.3]);
        // source untouched
        assert_eq!(table.data().width(), 3);
    }

    #[test]
    fn test_from_table_missing_variable_is_domain_mismatch() {
        let table = spectra();
        let domain =
            Arc::new(Domain::from_attributes(vec![Variable::continuous("2000")]).unwrap());
        assert!(matches!(
            table.transform(domain),
            Err(PreprocessError::DomainMismatch(_))
        ));
    }

    #[test]
    fn test_from_frame_infers_domain() {
        let data = df![
            "id" => ["p1", "p2"],
            "x" => [1i64, 2],
            "y" => [0.5, 0.7],
            "target" => [0.0, 1.0],
        ]
        .unwrap();

        let table = Table::from_frame(data, Some("target")).unwrap();
        let domain = table.domain();

        let attributes: Vec<&str> = domain.attributes().iter().map(Variable::name).collect();
        assert_eq!(attributes, vec!["x", "y"]);
        assert_eq!(domain.class_vars()[0].name(), "target");
        assert_eq!(domain.metas()[0].name(), "id");
        assert_eq!(table.column_f64("x").unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_from_frame_unknown_class_column() {
        let data = df!["x" => [1.0]].unwrap();
        assert!(matches!(
            Table::from_frame(data, Some("nope")),
            Err(PreprocessError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_column_f64_missing_as_nan() {
        let domain = Domain::from_attributes(vec![Variable::continuous("a")]).unwrap();
        let data = df!["a" => [Some(1.0), None]].unwrap();
        let table = Table::new(Arc::new(domain), data).unwrap();

        let values = table.column_f64("a").unwrap();
        assert_eq!(values[0], 1.0);
        assert!(values[1].is_nan());
    }
}
