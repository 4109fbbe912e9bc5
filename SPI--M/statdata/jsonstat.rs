//! JSON-stat2 ("cube") decoder.
//!
//! Cells are stored in a flat `value` array ordered as the row-major
//! Cartesian product of the dimensions listed in `id`.

use serde_json::{Map, Value};

use crate::{
    cartesian::Odometer,
    error::DecodeError,
    table::{Column, Table},
};

/// Placeholder category used when a dimension lists fewer codes than its size.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Decodes a JSON-stat2 payload into one row per category combination.
///
/// Columns are the dimension ids in declared order followed by `value_col`.
/// A category list whose length differs from the declared size is truncated
/// or padded with [`UNKNOWN_CATEGORY`]; the value count must match the
/// product of sizes exactly.
pub fn decode_cube(payload: &Value, value_col: &str) -> Result<Table, DecodeError> {
    let dataset = unwrap_dataset(payload);
    let (Some(dimensions), Some(ids), Some(sizes)) = (
        dataset.get("dimension").and_then(Value::as_object),
        dataset.get("id").and_then(Value::as_array),
        dataset.get("size").and_then(Value::as_array),
    ) else {
        return Err(DecodeError::NotCube);
    };
    let values = match dataset.get("value") {
        Some(Value::Array(values)) => values,
        _ => return Err(DecodeError::MissingValues),
    };
    if ids.len() != sizes.len() {
        return Err(DecodeError::ShapeMismatch {
            ids: ids.len(),
            sizes: sizes.len(),
        });
    }

    let mut names = Vec::with_capacity(ids.len());
    let mut categories = Vec::with_capacity(ids.len());
    for (id, size) in ids.iter().zip(sizes) {
        let name = json_text(id);
        let size = declared_size(size).ok_or_else(|| DecodeError::InvalidSize {
            dimension: name.clone(),
        })?;
        let mut codes = category_codes(dimensions.get(&name))
            .ok_or_else(|| DecodeError::CategoryIndex {
                dimension: name.clone(),
            })?;
        if codes.len() != size {
            codes.resize_with(size, || UNKNOWN_CATEGORY.to_string());
        }
        names.push(name);
        categories.push(codes);
    }

    let odometer = Odometer::new(categories.iter().map(Vec::len).collect());
    let expected = odometer.combinations();
    if values.len() != expected {
        return Err(DecodeError::ValueCount {
            actual: values.len(),
            expected,
        });
    }

    let mut dim_cells: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(expected); names.len()];
    let mut measurements = Vec::with_capacity(expected);
    for (combo, value) in odometer.zip(values) {
        for ((cells, codes), &pos) in dim_cells.iter_mut().zip(&categories).zip(&combo) {
            cells.push(Some(codes[pos].clone()));
        }
        measurements.push(measurement(value));
    }

    let mut table = Table::new();
    for (name, cells) in names.into_iter().zip(dim_cells) {
        table.insert(name, Column::Text(cells)).map_err(|_| DecodeError::NotCube)?;
    }
    table
        .insert(value_col, Column::Number(measurements))
        .map_err(|_| DecodeError::NotCube)?;
    Ok(table)
}

/// Parses JSON text and decodes it with [`decode_cube`].
pub fn decode_cube_str(text: &str, value_col: &str) -> Result<Table, DecodeError> {
    let payload: Value = serde_json::from_str(text)?;
    decode_cube(&payload, value_col)
}

fn unwrap_dataset(payload: &Value) -> &Value {
    match payload.get("dataset") {
        Some(inner @ Value::Object(_)) => inner,
        _ => payload,
    }
}

fn declared_size(size: &Value) -> Option<usize> {
    match size {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn category_codes(dimension: Option<&Value>) -> Option<Vec<String>> {
    let category = dimension?.get("category")?;
    match category.get("index") {
        Some(Value::Array(codes)) => Some(codes.iter().map(json_text).collect()),
        Some(Value::Object(positions)) => codes_by_position(positions),
        _ => match category.get("label") {
            Some(Value::Object(labels)) if !labels.is_empty() => {
                Some(labels.keys().cloned().collect())
            }
            _ => None,
        },
    }
}

fn codes_by_position(positions: &Map<String, Value>) -> Option<Vec<String>> {
    let mut ordered = positions
        .iter()
        .map(|(code, pos)| declared_size(pos).map(|pos| (pos, code.clone())))
        .collect::<Option<Vec<_>>>()?;
    ordered.sort_by_key(|(pos, _)| *pos);
    Some(ordered.into_iter().map(|(_, code)| code).collect())
}

fn json_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn measurement(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => crate::table::parse_number(s),
        _ => None,
    }
}
