//! Panel configuration file format.
//!
//! One TOML file describes the query service, the loader's tuning knobs,
//! the panel schema, the selected time range and the variable store
//! snapshot.
//!
//! # Example
//!
//! ```toml
//! [service]
//! base_url = "http://localhost:5080"
//! org_id = "default"
//!
//! [loader]
//! scrape_interval_secs = 15
//!
//! [panel]
//! id = "panel-1"
//! query_type = "sql"
//!
//! [[panel.queries]]
//! query = "SELECT histogram(_timestamp, '$__interval') AS ts, count(*) FROM logs GROUP BY ts"
//!
//! [time]
//! start = "2024-05-01T00:00:00Z"
//! end = "2024-05-01T06:00:00Z"
//!
//! [[variables]]
//! name = "region"
//! value = "us-east"
//! ```

use std::path::Path;

use panelkit_core::{IntervalCalculator, PanelSchema, TimeSelection, VariableBinding};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable consulted when `service.auth_token` is absent.
pub const AUTH_TOKEN_ENV: &str = "PANELKIT_AUTH_TOKEN";

// ── Types ─────────────────────────────────────────────────────────────────────

/// Top-level panel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Query service connection. Optional for offline commands.
    #[serde(default)]
    pub service: Option<ServiceConfig>,
    #[serde(default)]
    pub loader: LoaderConfig,
    pub panel: PanelSchema,
    #[serde(default)]
    pub time: TimeSelection,
    #[serde(default)]
    pub variables: Vec<VariableBinding>,
}

/// `[service]` section: where and how to reach the query service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    #[serde(default = "default_org_id")]
    pub org_id: String,
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ServiceConfig {
    /// The configured token, else the `PANELKIT_AUTH_TOKEN` env var.
    pub fn resolved_auth_token(&self) -> Option<String> {
        self.auth_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(AUTH_TOKEN_ENV).ok().filter(|t| !t.is_empty()))
    }
}

/// `[loader]` section: fetch orchestration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Organization scrape interval; feeds the rate window.
    #[serde(default)]
    pub scrape_interval_secs: Option<u64>,
    /// Fraction of the surface that must be on screen.
    #[serde(default)]
    pub visibility_threshold: f64,
    #[serde(default = "default_root_margin")]
    pub root_margin: String,
    /// Published error messages are cut to this many characters.
    #[serde(default = "default_error_detail_max_chars")]
    pub error_detail_max_chars: usize,
    /// Page type tag sent with search calls.
    #[serde(default = "default_page_type")]
    pub page_type: String,
    /// Pixel width used for interval computation.
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            scrape_interval_secs: None,
            visibility_threshold: 0.0,
            root_margin: default_root_margin(),
            error_detail_max_chars: default_error_detail_max_chars(),
            page_type: default_page_type(),
            viewport_width: default_viewport_width(),
        }
    }
}

impl LoaderConfig {
    pub fn calculator(&self) -> IntervalCalculator {
        IntervalCalculator::new(self.scrape_interval_secs)
    }
}

fn default_org_id() -> String {
    "default".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_root_margin() -> String {
    "0px".to_string()
}

fn default_error_detail_max_chars() -> usize {
    300
}

fn default_page_type() -> String {
    "dashboards".to_string()
}

fn default_viewport_width() -> u32 {
    1000
}

// ── Functions ─────────────────────────────────────────────────────────────────

impl PanelConfig {
    /// Read, parse and validate a panel config file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PanelConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges the type system cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.loader.visibility_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "loader.visibility_threshold must be between 0 and 1, got {}",
                threshold
            )));
        }
        if self.loader.error_detail_max_chars == 0 {
            return Err(ConfigError::Invalid(
                "loader.error_detail_max_chars must be greater than 0".to_string(),
            ));
        }
        if let Some(service) = &self.service {
            if service.base_url.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "service.base_url must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// The service section, required by commands that execute queries.
    pub fn require_service(&self) -> Result<&ServiceConfig, ConfigError> {
        self.service
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("missing [service] section".to_string()))
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use panelkit_core::{QueryType, VariableValue};
    use std::io::Write;

    const FULL: &str = r#"
[service]
base_url = "http://localhost:5080"
org_id = "acme"
timeout_secs = 10

[loader]
scrape_interval_secs = 30
visibility_threshold = 0.5
page_type = "logs"

[panel]
id = "p1"
query_type = "promql"

[[panel.queries]]
query = "rate(http_requests_total{job=\"$job\"}[$__rate_interval])"

[time]
start = "2024-05-01T00:00:00Z"
end = "2024-05-01T06:00:00Z"

[[variables]]
name = "job"
value = "api"

[[variables]]
name = "replicas"
value = 3

[[variables]]
name = "filters"
kind = "ad-hoc-filters"
value = [{ name = "host", operator = "=", value = "web-1" }]
"#;

    #[test]
    fn full_config_parses() {
        let config = PanelConfig::from_toml_str(FULL).unwrap();
        let service = config.require_service().unwrap();
        assert_eq!(service.org_id, "acme");
        assert_eq!(service.timeout_secs, 10);
        assert_eq!(config.loader.scrape_interval_secs, Some(30));
        assert_eq!(config.loader.page_type, "logs");
        assert_eq!(config.loader.root_margin, "0px");
        assert_eq!(config.loader.error_detail_max_chars, 300);
        assert_eq!(config.panel.query_type, QueryType::Promql);
        assert_eq!(config.panel.queries.len(), 1);
        assert!(config.time.resolve().is_some());

        assert_eq!(config.variables.len(), 3);
        assert_eq!(config.variables[1].value, VariableValue::Text("3".to_string()));
        assert!(config.variables[2].is_ad_hoc());
        assert_eq!(config.variables[2].filters()[0].value, "web-1");
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = PanelConfig::from_toml_str(
            r#"
[panel]
id = "p"
[[panel.queries]]
query = "SELECT 1"
"#,
        )
        .unwrap();
        assert!(config.service.is_none());
        assert_eq!(config.loader, LoaderConfig::default());
        assert_eq!(config.loader.calculator().scrape_interval_secs(), 15);
        assert!(config.time.resolve().is_none());
        assert!(config.require_service().is_err());
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let err = PanelConfig::from_toml_str(
            r#"
[loader]
visibility_threshold = 1.5
[panel]
id = "p"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("visibility_threshold"));
    }

    #[test]
    fn zero_max_chars_is_rejected() {
        let err = PanelConfig::from_toml_str(
            r#"
[loader]
error_detail_max_chars = 0
[panel]
id = "p"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let err = PanelConfig::from_toml_str(
            r#"
[service]
base_url = " "
[panel]
id = "p"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = PanelConfig::from_toml_str("[panel").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = PanelConfig::from_path(file.path()).unwrap();
        assert_eq!(config.panel.id, "p1");

        let err = PanelConfig::from_path(Path::new("/nonexistent/panel.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn configured_token_wins() {
        let service = ServiceConfig {
            base_url: "http://x".to_string(),
            org_id: "o".to_string(),
            auth_token: Some("explicit".to_string()),
            timeout_secs: 30,
        };
        assert_eq!(service.resolved_auth_token().as_deref(), Some("explicit"));
    }
}
