//! Request and response bodies, plus field-level validation that reports
//! every violation at once in the `{"detail": [{loc, msg, type}]}` shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use spi_data::{Column, Table, TableError};

use crate::config::TargetMode;

/// Validated `/predict` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    /// Living area in m², `> 0`.
    pub area: f64,
    /// Room count, `> 0`.
    pub rooms: f64,
    /// District name, non-empty.
    pub district: String,
    /// Construction year, `1800..=2100`.
    pub year_built: i64,
    /// Monthly association fee, `>= 0`.
    pub monthly_fee: f64,
    /// Sale year, `1990..=2100` when given.
    pub transaction_year: Option<i64>,
}

/// `/predict` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    /// Predicted price per m².
    pub predicted_price_per_sqm: f64,
    /// Predicted total price.
    pub predicted_total_price: f64,
    /// Loaded model version.
    pub model_version: String,
    /// Handler time in milliseconds.
    pub inference_ms: f64,
}

/// Fold means read from the metrics report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Mean MAE.
    pub mean_mae: Option<f64>,
    /// Mean RMSE.
    pub mean_rmse: Option<f64>,
    /// Mean R².
    pub mean_r2: Option<f64>,
}

/// `/model-info` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    /// Loaded model version.
    pub model_version: String,
    /// Interpretation of the model output.
    pub target_mode: TargetMode,
    /// Report the metrics were read from.
    pub metrics_path: Option<String>,
    /// `null` when the report is absent or unreadable.
    pub metrics: Option<ModelMetrics>,
}

/// One validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Location, e.g. `["body", "area"]`.
    pub loc: Vec<String>,
    /// Human-readable message.
    pub msg: String,
    /// Machine-readable error kind.
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldError {
    fn new(loc: &[&str], kind: &str, msg: impl Into<String>) -> Self {
        Self {
            loc: loc.iter().map(|part| (*part).to_string()).collect(),
            msg: msg.into(),
            kind: kind.to_string(),
        }
    }
}

impl PredictRequest {
    /// Parses and validates a raw JSON body.
    pub fn from_body(body: &[u8]) -> Result<Self, Vec<FieldError>> {
        let value: Value = serde_json::from_slice(body).map_err(|err| {
            vec![FieldError::new(
                &["body"],
                "json_invalid",
                format!("JSON decode error: {err}"),
            )]
        })?;
        let Value::Object(fields) = value else {
            return Err(vec![FieldError::new(
                &["body"],
                "model_attributes_type",
                "Input should be a valid dictionary or object",
            )]);
        };

        let mut check = Checker {
            fields: &fields,
            errors: Vec::new(),
        };
        let area = check.number("area").and_then(|v| check.greater_than("area", v, 0.0));
        let rooms = check.number("rooms").and_then(|v| check.greater_than("rooms", v, 0.0));
        let district = check.non_empty_string("district");
        let year_built = check
            .integer("year_built")
            .and_then(|v| check.within("year_built", v, 1800, 2100));
        let monthly_fee = check
            .number("monthly_fee")
            .and_then(|v| check.at_least("monthly_fee", v, 0.0));
        let transaction_year = if check.is_absent("transaction_year") {
            Some(None)
        } else {
            check
                .integer("transaction_year")
                .and_then(|v| check.within("transaction_year", v, 1990, 2100))
                .map(Some)
        };

        match (area, rooms, district, year_built, monthly_fee, transaction_year) {
            (
                Some(area),
                Some(rooms),
                Some(district),
                Some(year_built),
                Some(monthly_fee),
                Some(transaction_year),
            ) if check.errors.is_empty() => Ok(Self {
                area,
                rooms,
                district,
                year_built,
                monthly_fee,
                transaction_year,
            }),
            _ => Err(check.errors),
        }
    }

    /// One-row table with the canonical feature columns.
    pub fn to_table(&self) -> Result<Table, TableError> {
        #[allow(clippy::cast_precision_loss)]
        let year = |value: i64| value as f64;
        Table::from_columns([
            ("area", Column::Number(vec![Some(self.area)])),
            ("rooms", Column::Number(vec![Some(self.rooms)])),
            ("district", Column::Text(vec![Some(self.district.clone())])),
            ("year_built", Column::Number(vec![Some(year(self.year_built))])),
            ("monthly_fee", Column::Number(vec![Some(self.monthly_fee)])),
            (
                "transaction_year",
                Column::Number(vec![self.transaction_year.map(year)]),
            ),
        ])
    }
}

struct Checker<'a> {
    fields: &'a Map<String, Value>,
    errors: Vec<FieldError>,
}

impl<'a> Checker<'a> {
    fn is_absent(&self, name: &str) -> bool {
        self.fields.get(name).map_or(true, Value::is_null)
    }

    fn fail(&mut self, name: &str, kind: &str, msg: impl Into<String>) {
        self.errors.push(FieldError::new(&["body", name], kind, msg));
    }

    fn present(&mut self, name: &str) -> Option<&'a Value> {
        let value = self.fields.get(name);
        if value.is_none() {
            self.fail(name, "missing", "Field required");
        }
        value
    }

    fn number(&mut self, name: &str) -> Option<f64> {
        let value = self.present(name)?.as_f64();
        if value.is_none() {
            self.fail(name, "float_type", "Input should be a valid number");
        }
        value
    }

    fn integer(&mut self, name: &str) -> Option<i64> {
        let value = self.present(name)?;
        #[allow(clippy::cast_possible_truncation)]
        let parsed = value.as_i64().or_else(|| {
            value
                .as_f64()
                .filter(|v| v.fract() == 0.0 && v.abs() < 1e15)
                .map(|v| v as i64)
        });
        if parsed.is_none() {
            self.fail(name, "int_type", "Input should be a valid integer");
        }
        parsed
    }

    fn non_empty_string(&mut self, name: &str) -> Option<String> {
        let Some(text) = self.present(name)?.as_str().map(str::to_string) else {
            self.fail(name, "string_type", "Input should be a valid string");
            return None;
        };
        if text.is_empty() {
            self.fail(name, "string_too_short", "String should have at least 1 character");
            return None;
        }
        Some(text)
    }

    fn greater_than(&mut self, name: &str, value: f64, bound: f64) -> Option<f64> {
        if value > bound {
            Some(value)
        } else {
            self.fail(name, "greater_than", format!("Input should be greater than {bound}"));
            None
        }
    }

    fn at_least(&mut self, name: &str, value: f64, bound: f64) -> Option<f64> {
        if value >= bound {
            Some(value)
        } else {
            self.fail(
                name,
                "greater_than_equal",
                format!("Input should be greater than or equal to {bound}"),
            );
            None
        }
    }

    fn within(&mut self, name: &str, value: i64, low: i64, high: i64) -> Option<i64> {
        if value < low {
            self.fail(
                name,
                "greater_than_equal",
                format!("Input should be greater than or equal to {low}"),
            );
            None
        } else if value > high {
            self.fail(
                name,
                "less_than_equal",
                format!("Input should be less than or equal to {high}"),
            );
            None
        } else {
            Some(value)
        }
    }
}
