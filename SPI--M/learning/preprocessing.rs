//! Feature pipeline: median imputation for numeric columns, constant
//! imputation plus one-hot encoding for categorical ones.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use spi_data::{Table, UNKNOWN_CATEGORY};

use crate::{error::LearningError, outliers::percentile};

/// Unfitted pipeline: just the column lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePipeline {
    numeric: Vec<String>,
    categorical: Vec<String>,
}

impl FeaturePipeline {
    /// Declares the numeric and categorical feature columns.
    #[must_use]
    pub fn new(numeric: Vec<String>, categorical: Vec<String>) -> Self {
        Self {
            numeric,
            categorical,
        }
    }

    /// Learns medians and category vocabularies from `table`.
    pub fn fit(&self, table: &Table) -> Result<FittedPipeline, LearningError> {
        require_columns(table, self.numeric.iter().chain(&self.categorical))?;

        let numeric = self
            .numeric
            .iter()
            .map(|name| {
                let mut observed: Vec<f64> = table
                    .require(name)?
                    .to_numbers()
                    .into_iter()
                    .flatten()
                    .filter(|value| value.is_finite())
                    .collect();
                observed.sort_by(f64::total_cmp);
                Ok(NumericImputer {
                    column: name.clone(),
                    median: percentile(&observed, 50.0).unwrap_or(0.0),
                })
            })
            .collect::<Result<Vec<_>, LearningError>>()?;

        let categorical = self
            .categorical
            .iter()
            .map(|name| {
                let column = table.require(name)?;
                let mut categories: Vec<String> = (0..table.height())
                    .map(|row| category(column.text(row).as_deref()))
                    .collect();
                categories.sort();
                categories.dedup();
                Ok(OneHotEncoder {
                    column: name.clone(),
                    categories,
                })
            })
            .collect::<Result<Vec<_>, LearningError>>()?;

        Ok(FittedPipeline {
            numeric,
            categorical,
        })
    }
}

/// Median learned for one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericImputer {
    /// Source column.
    pub column: String,
    /// Fill value for missing cells.
    pub median: f64,
}

/// Sorted vocabulary learned for one categorical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    /// Source column.
    pub column: String,
    /// Categories seen during fit, ascending.
    pub categories: Vec<String>,
}

/// Frozen pipeline. Transforming never updates the learned state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPipeline {
    numeric: Vec<NumericImputer>,
    categorical: Vec<OneHotEncoder>,
}

impl FittedPipeline {
    /// Width of the transformed matrix.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.numeric.len()
            + self
                .categorical
                .iter()
                .map(|encoder| encoder.categories.len())
                .sum::<usize>()
    }

    /// Output column names: numeric features, then `column=category`.
    #[must_use]
    pub fn feature_names(&self) -> Vec<String> {
        self.numeric
            .iter()
            .map(|imputer| imputer.column.clone())
            .chain(self.categorical.iter().flat_map(|encoder| {
                encoder
                    .categories
                    .iter()
                    .map(move |label| format!("{}={label}", encoder.column))
            }))
            .collect()
    }

    /// Numeric imputers in output order.
    #[must_use]
    pub fn numeric(&self) -> &[NumericImputer] {
        &self.numeric
    }

    /// Categorical encoders in output order.
    #[must_use]
    pub fn categorical(&self) -> &[OneHotEncoder] {
        &self.categorical
    }

    /// Encodes `table` into a dense feature matrix. Categories unseen during
    /// fit encode as all zeros.
    pub fn transform(&self, table: &Table) -> Result<Array2<f64>, LearningError> {
        require_columns(
            table,
            self.numeric
                .iter()
                .map(|imputer| &imputer.column)
                .chain(self.categorical.iter().map(|encoder| &encoder.column)),
        )?;

        let mut matrix = Array2::<f64>::zeros((table.height(), self.n_features()));
        for (idx, imputer) in self.numeric.iter().enumerate() {
            let column = table.require(&imputer.column)?;
            for row in 0..table.height() {
                matrix[[row, idx]] = column
                    .number(row)
                    .filter(|value| value.is_finite())
                    .unwrap_or(imputer.median);
            }
        }

        let mut offset = self.numeric.len();
        for encoder in &self.categorical {
            let column = table.require(&encoder.column)?;
            for row in 0..table.height() {
                let value = category(column.text(row).as_deref());
                if let Ok(pos) = encoder.categories.binary_search(&value) {
                    matrix[[row, offset + pos]] = 1.0;
                }
            }
            offset += encoder.categories.len();
        }
        Ok(matrix)
    }
}

fn category(cell: Option<&str>) -> String {
    cell.unwrap_or(UNKNOWN_CATEGORY).to_string()
}

fn require_columns<'a>(
    table: &Table,
    names: impl Iterator<Item = &'a String>,
) -> Result<(), LearningError> {
    let missing: Vec<String> = names.filter(|name| !table.contains(name)).cloned().collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(LearningError::MissingColumns(missing))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use spi_data::Column;

    use super::*;

    fn listings() -> Table {
        Table::from_columns([
            ("area", Column::Number(vec![Some(40.0), None, Some(80.0), Some(60.0)])),
            (
                "district",
                Column::Text(vec![
                    Some("Solna".into()),
                    Some("Bromma".into()),
                    None,
                    Some("Solna".into()),
                ]),
            ),
        ])
        .unwrap()
    }

    fn pipeline() -> FeaturePipeline {
        FeaturePipeline::new(vec!["area".into()], vec!["district".into()])
    }

    #[test]
    fn imputes_median_and_one_hot_encodes() {
        let fitted = pipeline().fit(&listings()).unwrap();
        assert_eq!(
            fitted.feature_names(),
            ["area", "district=Bromma", "district=Solna", "district=Unknown"]
        );
        let x = fitted.transform(&listings()).unwrap();
        assert_eq!(x.dim(), (4, 4));
        assert_relative_eq!(x[[1, 0]], 60.0);
        assert_eq!(x.row(0).to_vec(), [40.0, 0.0, 1.0, 0.0]);
        assert_eq!(x.row(2).to_vec(), [80.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn unseen_categories_encode_as_zeros() {
        let fitted = pipeline().fit(&listings()).unwrap();
        let request = Table::from_columns([
            ("area", Column::Number(vec![Some(65.0)])),
            ("district", Column::Text(vec![Some("Atlantis".into())])),
        ])
        .unwrap();
        let x = fitted.transform(&request).unwrap();
        assert_eq!(x.row(0).to_vec(), [65.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn transform_does_not_refit() {
        let fitted = pipeline().fit(&listings()).unwrap();
        let before = fitted.clone();
        let other = Table::from_columns([
            ("area", Column::Number(vec![None, Some(1000.0)])),
            ("district", Column::Text(vec![Some("Nacka".into()), None])),
        ])
        .unwrap();
        let x = fitted.transform(&other).unwrap();
        assert_eq!(fitted, before);
        assert_relative_eq!(x[[0, 0]], 60.0);
    }

    #[test]
    fn all_missing_numeric_column_imputes_zero() {
        let table = Table::from_columns([("fee", Column::Number(vec![None, None]))]).unwrap();
        let fitted = FeaturePipeline::new(vec!["fee".into()], vec![]).fit(&table).unwrap();
        assert_eq!(fitted.numeric()[0].median, 0.0);
    }

    #[test]
    fn missing_columns_are_listed() {
        let fitted = pipeline().fit(&listings()).unwrap();
        let narrow = Table::from_columns([("area", Column::Number(vec![Some(1.0)]))]).unwrap();
        assert!(matches!(
            fitted.transform(&narrow),
            Err(LearningError::MissingColumns(missing)) if missing == ["district"]
        ));
    }
}
