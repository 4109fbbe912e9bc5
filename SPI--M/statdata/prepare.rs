//! Canonical training-table preparation.

use std::{
    borrow::Cow,
    cmp::Ordering,
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::PrepareError,
    table::{Column, Table},
    UNKNOWN_CATEGORY,
};

/// Canonical column order of a processed training table.
pub const CANONICAL_COLUMNS: [&str; 7] = [
    "area",
    "rooms",
    "district",
    "year_built",
    "monthly_fee",
    "transaction_year",
    "price_per_sqm",
];

const NUMERIC_COLUMNS: [&str; 6] = [
    "area",
    "rooms",
    "year_built",
    "monthly_fee",
    "transaction_year",
    "price_per_sqm",
];

/// Knobs for [`prepare`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepareOptions {
    /// Canonical name -> raw column name. Empty raw names are ignored.
    pub column_map: IndexMap<String, String>,
    /// Feature columns that must survive preparation.
    pub required_features: Vec<String>,
    /// Regression target.
    pub target_col: String,
    /// Multiplier applied to the target after filtering.
    pub target_scale: f64,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            column_map: IndexMap::new(),
            required_features: Vec::new(),
            target_col: "price_per_sqm".to_string(),
            target_scale: 1.0,
        }
    }
}

/// Shape and completeness of a processed table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    /// Source CSV, when prepared from disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_csv: Option<PathBuf>,
    /// Output CSV, when prepared to disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_csv: Option<PathBuf>,
    /// Surviving rows.
    pub rows: usize,
    /// Surviving columns.
    pub cols: usize,
    /// Column names in order.
    pub columns: Vec<String>,
    /// Rows removed by the area/target filters.
    #[serde(default)]
    pub dropped_rows: usize,
    /// Percentage of missing cells per column, rounded to two decimals and
    /// sorted from most to least incomplete.
    pub missing_pct: IndexMap<String, f64>,
}

/// Maps a raw table onto the canonical schema.
///
/// Rows lacking a positive target (or a positive area, when an area column
/// exists) are dropped rather than imputed.
pub fn prepare(raw: Table, options: &PrepareOptions) -> Result<(Table, DatasetSummary), PrepareError> {
    let mut table = raw;
    table.rename(&invert_map(&options.column_map));

    if !table.contains("transaction_year") {
        let years = table.column("transaction_date").map(|dates| {
            (0..dates.len())
                .map(|row| dates.text(row).and_then(|text| parse_year(&text)))
                .collect::<Vec<_>>()
        });
        if let Some(years) = years {
            table.insert("transaction_year", Column::Number(years))?;
        }
    }

    if options.target_col == "price_per_sqm" && !table.contains("price_per_sqm") {
        let ratio = match (table.column("total_price"), table.column("area")) {
            (Some(total), Some(area)) => Some(
                total
                    .to_numbers()
                    .into_iter()
                    .zip(area.to_numbers())
                    .map(|(total, area)| Some(total? / area?))
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        };
        if let Some(ratio) = ratio {
            table.insert("price_per_sqm", Column::Number(ratio))?;
        }
    }

    let mut keep: Vec<&str> = CANONICAL_COLUMNS
        .iter()
        .copied()
        .filter(|name| table.contains(name))
        .collect();
    if table.contains(&options.target_col) && !keep.contains(&options.target_col.as_str()) {
        keep.push(&options.target_col);
    }
    let mut table = table.select(&keep)?;

    let mut required: Vec<&str> = vec![options.target_col.as_str()];
    for feature in &options.required_features {
        if !required.contains(&feature.as_str()) {
            required.push(feature);
        }
    }
    let missing: Vec<String> = required
        .into_iter()
        .filter(|name| !table.contains(name))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(PrepareError::MissingColumns(missing));
    }

    let districts = table.column("district").map(|column| {
        (0..column.len())
            .map(|row| {
                Some(
                    column
                        .text(row)
                        .map_or_else(|| UNKNOWN_CATEGORY.to_string(), Cow::into_owned),
                )
            })
            .collect::<Vec<_>>()
    });
    if let Some(districts) = districts {
        table.insert("district", Column::Text(districts))?;
    }

    for name in NUMERIC_COLUMNS.iter().copied().chain([options.target_col.as_str()]) {
        table.map_numbers(name, |value| value.is_finite().then_some(value));
    }

    let before = table.height();
    let area = table.column("area").map(Column::to_numbers);
    let target = table.require(&options.target_col)?.to_numbers();
    let positive = |cell: Option<f64>| cell.is_some_and(|value| value > 0.0);
    let mask: Vec<bool> = (0..before)
        .map(|row| {
            area.as_ref().map_or(true, |area| positive(area[row])) && positive(target[row])
        })
        .collect();
    table.retain_rows(&mask);
    let dropped_rows = before - table.height();
    if dropped_rows > 0 {
        tracing::info!(dropped_rows, kept = table.height(), "filtered rows without positive area/target");
    }

    if (options.target_scale - 1.0).abs() > f64::EPSILON {
        let scale = options.target_scale;
        table.map_numbers(&options.target_col, |value| Some(value * scale));
    }

    let summary = summarize(&table, dropped_rows);
    Ok((table, summary))
}

/// Reads `raw_csv`, prepares it and writes the processed CSV plus a pretty
/// JSON summary. Parent directories are created as needed.
pub fn prepare_files(
    raw_csv: &Path,
    processed_csv: &Path,
    summary_json: &Path,
    options: &PrepareOptions,
) -> Result<DatasetSummary, PrepareError> {
    if !raw_csv.exists() {
        return Err(PrepareError::RawNotFound(raw_csv.to_path_buf()));
    }
    let raw = Table::read_csv(raw_csv)?;
    let (table, mut summary) = prepare(raw, options)?;
    table.write_csv(processed_csv)?;

    summary.raw_csv = Some(raw_csv.to_path_buf());
    summary.processed_csv = Some(processed_csv.to_path_buf());
    let io_err = |source| PrepareError::Io {
        path: summary_json.to_path_buf(),
        source,
    };
    if let Some(parent) = summary_json.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    fs::write(summary_json, serde_json::to_string_pretty(&summary)?).map_err(io_err)?;
    Ok(summary)
}

fn invert_map(column_map: &IndexMap<String, String>) -> HashMap<String, String> {
    column_map
        .iter()
        .filter(|(_, raw)| !raw.is_empty())
        .map(|(canonical, raw)| (raw.clone(), canonical.clone()))
        .collect()
}

fn summarize(table: &Table, dropped_rows: usize) -> DatasetSummary {
    let height = table.height();
    let mut missing: Vec<(String, f64)> = table
        .columns()
        .map(|(name, column)| {
            let pct = if height == 0 {
                0.0
            } else {
                column.missing_count() as f64 / height as f64 * 100.0
            };
            (name.to_string(), (pct * 100.0).round() / 100.0)
        })
        .collect();
    missing.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    DatasetSummary {
        raw_csv: None,
        processed_csv: None,
        rows: height,
        cols: table.width(),
        columns: table.column_names().map(str::to_string).collect(),
        dropped_rows,
        missing_pct: missing.into_iter().collect(),
    }
}

/// Calendar year of a transaction date; unrecognised text is missing.
fn parse_year(raw: &str) -> Option<f64> {
    let text = raw.trim();
    if let Ok(stamp) = DateTime::parse_from_rfc3339(text) {
        return Some(f64::from(stamp.year()));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(stamp) = NaiveDateTime::parse_from_str(text, format) {
            return Some(f64::from(stamp.year()));
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(f64::from(date.year()));
        }
    }
    let digits = text.bytes().all(|b| b.is_ascii_digit());
    let compact = match text.len() {
        4 if digits => Some(format!("{text}-01-01")),
        7 if text.as_bytes()[4] == b'-' => Some(format!("{text}-01")),
        8 if digits => Some(format!("{}-{}-{}", &text[..4], &text[4..6], &text[6..])),
        _ => None,
    }?;
    NaiveDate::parse_from_str(&compact, "%Y-%m-%d")
        .ok()
        .map(|date| f64::from(date.year()))
}
