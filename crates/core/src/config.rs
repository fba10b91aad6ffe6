use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryPolicy;
use crate::reporter::ReporterOptions;
use crate::{Error, Result};

pub const SETTINGS_SCHEMA_VERSION: u32 = 1;

pub const ENV_REPORT_URL: &str = "JOBWATCH_REPORT_URL";
pub const ENV_REPORT_TOKEN: &str = "JOBWATCH_REPORT_TOKEN";
pub const ENV_REPORT_INTERVAL: &str = "JOBWATCH_REPORT_INTERVAL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub version: u32,
    #[serde(default)]
    pub report: ReportSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSettings {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub failure_threshold: u32,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 5000,
            failure_threshold: 5,
        }
    }
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            retry: RetrySettings::default(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_SCHEMA_VERSION,
            report: ReportSettings::default(),
        }
    }
}

impl ReportSettings {
    pub fn is_enabled(&self) -> bool {
        !self.url.trim().is_empty()
    }

    pub fn to_options(&self) -> ReporterOptions {
        ReporterOptions {
            url: self.url.trim().to_string(),
            token: self.token.clone(),
            interval: Duration::from_secs(self.interval_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            delivery: DeliveryPolicy {
                max_attempts: self.retry.max_attempts,
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
                failure_threshold: self.retry.failure_threshold,
            },
        }
    }
}

pub fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("jobwatch.toml")
}

/// Loads settings from `path`. A missing file yields defaults (reporting disabled).
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let text = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfig {
        message: format!("config read failed: {e}"),
    })?;

    parse_settings(&text).map_err(|e| Error::InvalidConfig {
        message: format!("config invalid: {e}"),
    })
}

pub fn parse_settings(text: &str) -> std::result::Result<Settings, toml::de::Error> {
    let settings: Settings = toml::from_str(text)?;
    if settings.version != SETTINGS_SCHEMA_VERSION {
        return Err(toml::de::Error::custom(format!(
            "unsupported settings schema version: {} (expected {SETTINGS_SCHEMA_VERSION})",
            settings.version
        )));
    }
    Ok(settings)
}

pub fn apply_env_overrides(settings: &mut Settings) -> Result<()> {
    apply_env_overrides_from(settings, |key| std::env::var(key).ok())
}

fn apply_env_overrides_from(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(url) = lookup(ENV_REPORT_URL) {
        settings.report.url = url;
    }
    if let Some(token) = lookup(ENV_REPORT_TOKEN) {
        settings.report.token = token;
    }
    if let Some(raw) = lookup(ENV_REPORT_INTERVAL) {
        settings.report.interval_secs =
            raw.trim().parse().map_err(|_| Error::InvalidConfig {
                message: format!("{ENV_REPORT_INTERVAL} must be an integer (got {raw:?})"),
            })?;
    }
    Ok(())
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.version != SETTINGS_SCHEMA_VERSION {
        return Err(Error::InvalidConfig {
            message: format!(
                "settings.version must be {SETTINGS_SCHEMA_VERSION} (got {})",
                settings.version
            ),
        });
    }

    let report = &settings.report;
    if !report.is_enabled() {
        return Ok(());
    }

    let url = report.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::InvalidConfig {
            message: "report.url must start with http:// or https://".to_string(),
        });
    }
    if report.interval_secs < 1 {
        return Err(Error::InvalidConfig {
            message: "report.interval_secs must be >= 1".to_string(),
        });
    }
    if report.timeout_secs < 1 {
        return Err(Error::InvalidConfig {
            message: "report.timeout_secs must be >= 1".to_string(),
        });
    }
    if report.retry.max_attempts < 1 {
        return Err(Error::InvalidConfig {
            message: "report.retry.max_attempts must be >= 1".to_string(),
        });
    }
    if report.retry.failure_threshold < 1 {
        return Err(Error::InvalidConfig {
            message: "report.retry.failure_threshold must be >= 1".to_string(),
        });
    }
    if report.retry.initial_backoff_ms > report.retry.max_backoff_ms {
        return Err(Error::InvalidConfig {
            message: "report.retry.initial_backoff_ms must be <= max_backoff_ms".to_string(),
        });
    }
    Ok(())
}
