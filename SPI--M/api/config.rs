use std::{fmt, net::SocketAddr, path::PathBuf};

use serde::Serialize;

use crate::error::ApiError;

/// What the loaded model predicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    /// The model predicts price per square metre.
    PricePerSqm,
    /// The model predicts the total price.
    TotalPrice,
}

impl TargetMode {
    /// Trimmed, case-insensitive; anything but `total_price` means per-sqm.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("total_price") {
            Self::TotalPrice
        } else {
            Self::PricePerSqm
        }
    }

    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PricePerSqm => "price_per_sqm",
            Self::TotalPrice => "total_price",
        }
    }
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allowed CORS origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    /// `*`
    Any,
    /// Explicit origin list.
    List(Vec<String>),
}

impl CorsOrigins {
    fn parse(raw: &str) -> Self {
        let origins: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();
        if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
            Self::Any
        } else {
            Self::List(origins)
        }
    }
}

/// Service settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Fitted estimator artifact.
    pub model_path: PathBuf,
    /// Fitted pipeline artifact.
    pub preprocessor_path: PathBuf,
    /// Version tag echoed in responses.
    pub model_version: String,
    /// Interpretation of the model output.
    pub target_mode: TargetMode,
    /// JSON-lines prediction log.
    pub prediction_log_path: PathBuf,
    /// Report read by `/model-info`.
    pub metrics_path: PathBuf,
    /// CORS policy.
    pub cors_allow_origin: CorsOrigins,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/model_v1.json"),
            preprocessor_path: PathBuf::from("models/preprocessor_v1.json"),
            model_version: "v1".to_string(),
            target_mode: TargetMode::PricePerSqm,
            prediction_log_path: PathBuf::from("logs/predictions.jsonl"),
            metrics_path: PathBuf::from("reports/metrics/latest.json"),
            cors_allow_origin: CorsOrigins::Any,
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ServiceConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults for unset
    /// variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiError> {
        let defaults = Self::default();
        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ApiError::Config {
                var: "PORT",
                value: raw,
            })?,
            None => defaults.port,
        };
        Ok(Self {
            model_path: lookup("MODEL_PATH").map_or(defaults.model_path, PathBuf::from),
            preprocessor_path: lookup("PREPROCESSOR_PATH")
                .map_or(defaults.preprocessor_path, PathBuf::from),
            model_version: lookup("MODEL_VERSION").unwrap_or(defaults.model_version),
            target_mode: lookup("TARGET_MODE")
                .map_or(defaults.target_mode, |raw| TargetMode::parse(&raw)),
            prediction_log_path: lookup("PREDICTION_LOG_PATH")
                .map_or(defaults.prediction_log_path, PathBuf::from),
            metrics_path: lookup("METRICS_PATH").map_or(defaults.metrics_path, PathBuf::from),
            cors_allow_origin: lookup("CORS_ALLOW_ORIGIN")
                .map_or(defaults.cors_allow_origin, |raw| CorsOrigins::parse(&raw)),
            host: lookup("HOST").unwrap_or(defaults.host),
            port,
        })
    }

    /// Socket address to bind. `HOST` may be an IP literal or a hostname;
    /// hostnames bind to their first resolved address.
    pub async fn bind_addr(&self) -> Result<SocketAddr, ApiError> {
        let invalid = || ApiError::Config {
            var: "HOST",
            value: self.host.clone(),
        };
        let mut resolved = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|_| invalid())?;
        resolved.next().ok_or_else(invalid)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[tokio::test]
    async fn defaults_apply_when_unset() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.bind_addr().await.unwrap().port(), 8000);
    }

    #[tokio::test]
    async fn hostnames_resolve_for_binding() {
        let config =
            ServiceConfig::from_lookup(lookup(&[("HOST", "localhost"), ("PORT", "8123")])).unwrap();
        let addr = config.bind_addr().await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 8123);

        let config = ServiceConfig::from_lookup(lookup(&[("HOST", "not a host")])).unwrap();
        let err = config.bind_addr().await.unwrap_err();
        assert!(matches!(err, ApiError::Config { var: "HOST", .. }));
    }

    #[test]
    fn target_mode_is_trimmed_and_case_insensitive() {
        let config = ServiceConfig::from_lookup(lookup(&[("TARGET_MODE", "  Total_Price ")])).unwrap();
        assert_eq!(config.target_mode, TargetMode::TotalPrice);
        assert_eq!(TargetMode::parse("price"), TargetMode::PricePerSqm);
    }

    #[test]
    fn cors_origins_and_port_parse() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("CORS_ALLOW_ORIGIN", "http://localhost:3000, https://spi.example"),
            ("PORT", "9100"),
        ]))
        .unwrap();
        assert_eq!(
            config.cors_allow_origin,
            CorsOrigins::List(vec![
                "http://localhost:3000".to_string(),
                "https://spi.example".to_string()
            ])
        );
        assert_eq!(config.port, 9100);

        let err = ServiceConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ApiError::Config { var: "PORT", .. }));
    }
}
