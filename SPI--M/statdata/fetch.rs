//! Export download and format sniffing.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use reqwest::{header::CONTENT_TYPE, Client};
use serde_json::Value;

use crate::{
    error::{DecodeError, FetchError},
    jsonstat::decode_cube,
    pcaxis::decode_px,
    table::Table,
};

static CODEPAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"CODEPAGE\s*=\s*"([^"]*)""#).expect("valid regex"));

/// Wire format of a statistics export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// JSON-stat2 cube.
    JsonStat,
    /// PC-Axis text.
    PcAxis,
}

/// Picks the decoder for a payload: PC-Axis when the bytes open with
/// `CHARSET=` or `CODEPAGE=`, or the content type mentions `px`/`octet-stream`.
#[must_use]
pub fn sniff_format(bytes: &[u8], content_type: Option<&str>) -> ExportFormat {
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    if bytes.starts_with(b"CHARSET=")
        || bytes.starts_with(b"CODEPAGE=")
        || content_type.contains("px")
        || content_type.contains("octet-stream")
    {
        ExportFormat::PcAxis
    } else {
        ExportFormat::JsonStat
    }
}

/// Decodes export bytes as text. A content-type `charset` wins, then the
/// PC-Axis `CODEPAGE` keyword. Without either, valid UTF-8 is kept as is and
/// anything else is read as ISO-8859-1, the PC-Axis default.
#[must_use]
pub fn decode_text(bytes: &[u8], content_type: Option<&str>) -> String {
    let declared = content_type
        .unwrap_or_default()
        .to_ascii_lowercase()
        .split_once("charset=")
        .map(|(_, rest)| {
            let charset = rest.split(';').next().unwrap_or_default();
            charset.trim().trim_matches('"').to_string()
        })
        .or_else(|| px_codepage(bytes));
    match declared.as_deref() {
        Some("utf-8" | "utf8") => String::from_utf8_lossy(bytes).into_owned(),
        Some(_) => latin1(bytes),
        None => std::str::from_utf8(bytes).map_or_else(|_| latin1(bytes), str::to_string),
    }
}

fn px_codepage(bytes: &[u8]) -> Option<String> {
    let header = bytes
        .windows(5)
        .position(|w| w == b"DATA=")
        .map_or(bytes, |end| &bytes[..end]);
    CODEPAGE
        .captures(header)
        .map(|caps| String::from_utf8_lossy(&caps[1]).trim().to_ascii_lowercase())
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

/// Decodes a payload in whichever format it sniffs as.
pub fn decode_auto(
    bytes: &[u8],
    content_type: Option<&str>,
    value_col: &str,
) -> Result<Table, DecodeError> {
    decode_as(sniff_format(bytes, content_type), bytes, content_type, value_col)
}

/// Decodes a payload in an explicit format.
pub fn decode_as(
    format: ExportFormat,
    bytes: &[u8],
    content_type: Option<&str>,
    value_col: &str,
) -> Result<Table, DecodeError> {
    match format {
        ExportFormat::PcAxis => decode_px(&decode_text(bytes, content_type), value_col),
        ExportFormat::JsonStat => {
            let payload: Value = serde_json::from_slice(bytes)?;
            decode_cube(&payload, value_col)
        }
    }
}

/// Forces `response.format` to `jsonstat2` on a saved API query.
#[must_use]
pub fn ensure_jsonstat2(query: &Value) -> Value {
    let mut query = query.clone();
    if let Value::Object(map) = &mut query {
        let response = map
            .entry("response")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !response.is_object() {
            *response = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(response) = response {
            response.insert("format".into(), Value::String("jsonstat2".into()));
        }
    }
    query
}

/// Downloads an export and decodes it into a flat table.
///
/// With a query the endpoint is POSTed (JSON-stat2 forced); without one it
/// is fetched with GET. Non-success statuses are errors.
pub async fn fetch_export(
    url: &str,
    query: Option<&Value>,
    timeout: Duration,
    value_col: &str,
) -> Result<Table, FetchError> {
    let client = Client::builder()
        .user_agent(concat!("spi-data/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?;
    let request = match query {
        Some(query) => client.post(url).json(&ensure_jsonstat2(query)),
        None => client.get(url),
    };
    let response = request.send().await?.error_for_status()?;
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = response.bytes().await?;
    tracing::debug!(url, bytes = bytes.len(), content_type = ?content_type, "downloaded export");
    Ok(decode_auto(&bytes, content_type.as_deref(), value_col)?)
}
