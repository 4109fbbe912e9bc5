use std::path::PathBuf;

use thiserror::Error;

/// Malformed statistical export. Fatal to the decode call; no partial table
/// is returned.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload lacks the `dimension`/`id`/`size` triple.
    #[error("not a JSON-stat2 dataset (missing dimension/id/size)")]
    NotCube,
    /// Payload lacks the `value` array.
    #[error("JSON-stat2 dataset missing value")]
    MissingValues,
    /// `id` and `size` disagree in length.
    #[error("dimension ids ({ids}) and sizes ({sizes}) differ in length")]
    ShapeMismatch {
        /// Number of dimension ids.
        ids: usize,
        /// Number of declared sizes.
        sizes: usize,
    },
    /// A declared size is not a non-negative integer.
    #[error("invalid size for dimension '{dimension}'")]
    InvalidSize {
        /// Dimension id.
        dimension: String,
    },
    /// No category index or labels for a cube dimension.
    #[error("cannot read category index for dimension '{dimension}'")]
    CategoryIndex {
        /// Dimension id.
        dimension: String,
    },
    /// PC-Axis text has no `DATA=` section.
    #[error("PC-Axis missing DATA=")]
    MissingData,
    /// PC-Axis text declares neither `STUB` nor `HEADING`.
    #[error("PC-Axis missing STUB/HEADING")]
    MissingAxes,
    /// No `VALUES`/`CODES` list for a PC-Axis dimension.
    #[error("PC-Axis missing VALUES/CODES for dimension '{dimension}'")]
    MissingCategories {
        /// Dimension id.
        dimension: String,
    },
    /// The value stream does not match the category product.
    #[error("unexpected value count {actual} (expected {expected})")]
    ValueCount {
        /// Values available.
        actual: usize,
        /// Values required by the dimension product.
        expected: usize,
    },
    /// The payload is not valid JSON.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by [`crate::Table`] construction and CSV I/O.
#[derive(Debug, Error)]
pub enum TableError {
    /// A column length differs from the table height.
    #[error("column '{column}' has {actual} rows, table has {expected}")]
    Length {
        /// Offending column.
        column: String,
        /// Rows in the column.
        actual: usize,
        /// Rows in the table.
        expected: usize,
    },
    /// Column lookup failed.
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    /// CSV encoding/decoding failure.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// Filesystem failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while preparing the canonical training table.
#[derive(Debug, Error)]
pub enum PrepareError {
    /// Required canonical columns are absent after renaming and derivation.
    #[error(
        "processed dataset is missing required canonical columns: {0:?}. \
         Update data.column_map in the params file to map your raw columns \
         and/or adjust the feature list"
    )]
    MissingColumns(Vec<String>),
    /// The raw CSV does not exist.
    #[error("raw CSV not found: {0}")]
    RawNotFound(PathBuf),
    /// Table manipulation or CSV failure.
    #[error(transparent)]
    Table(#[from] TableError),
    /// Summary serialization failure.
    #[error("summary serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    /// Filesystem failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while downloading an export.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport or HTTP status failure.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The downloaded payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
