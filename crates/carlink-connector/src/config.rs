//! Connector configuration
//!
//! Loaded from a TOML file by the daemon or assembled directly by an
//! embedding host. Credentials may come from the config itself or from a
//! netrc secret store; the Debug impl redacts secrets so the config can be
//! logged at startup.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use carlink_client::CredentialConfig;
use carlink_core::{ConnectorError, ConnectorResult};

/// Shortest allowed poll interval, in seconds. The remote service rate-limits
/// aggressive polling, so anything faster is a configuration error.
pub const MIN_INTERVAL_SECS: u64 = 180;

fn default_interval() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_log_level() -> String {
    "warn".to_string()
}

/// Vehicle brand served by the cloud account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Brand {
    Seat,
    #[default]
    Cupra,
}

impl Brand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Brand::Seat => "seat",
            Brand::Cupra => "cupra",
        }
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete connector configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Base URL of the vehicle cloud API
    pub base_url: String,

    #[serde(default)]
    pub brand: Brand,

    /// Account username; falls back to the secret store when absent
    #[serde(default)]
    pub username: Option<String>,

    /// Account password; falls back to the secret store when absent
    #[serde(default)]
    pub password: Option<String>,

    /// S-PIN for privileged commands; falls back to the secret store's
    /// `account` field when absent
    #[serde(default)]
    pub spin: Option<String>,

    /// Secret store path; defaults to `~/.netrc`
    #[serde(default)]
    pub netrc: Option<PathBuf>,

    /// Poll interval in seconds, minimum 180
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Cache freshness window in seconds; defaults to `interval - 1` so every
    /// scheduled poll fetches fresh data while bursts in between are absorbed
    #[serde(default)]
    pub max_age: Option<u64>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Separate level for the `carlink::api` wire log
    #[serde(default = "default_api_log_level")]
    pub api_log_level: String,
}

impl ConnectorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> ConnectorResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConnectorError::Config(format!("cannot read {path}: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ConnectorError::Config(format!("cannot parse {path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        if self.base_url.is_empty() {
            return Err(ConnectorError::Config("base_url must be set".to_string()));
        }
        if self.interval < MIN_INTERVAL_SECS {
            return Err(ConnectorError::Config(format!(
                "interval must be at least {MIN_INTERVAL_SECS} s, got {}",
                self.interval
            )));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// Cache freshness window; `interval - 1` unless set explicitly
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age.unwrap_or(self.interval.saturating_sub(1)))
    }

    /// Secret store machine name for this brand
    pub fn netrc_machine(&self) -> String {
        format!("carlink-{}", self.brand)
    }

    pub fn credential_config(&self) -> CredentialConfig {
        CredentialConfig {
            username: self.username.clone(),
            password: self.password.clone(),
            spin: self.spin.clone(),
            netrc: self.netrc.clone(),
        }
    }
}

// Startup logs the effective configuration; secrets are redacted.
impl fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("base_url", &self.base_url)
            .field("brand", &self.brand)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("spin", &self.spin.as_ref().map(|_| "***"))
            .field("netrc", &self.netrc)
            .field("interval", &self.interval)
            .field("max_age", &self.max_age)
            .field("log_level", &self.log_level)
            .field("api_log_level", &self.api_log_level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal() -> ConnectorConfig {
        toml::from_str(r#"base_url = "https://cloud.example.com""#).unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let config = minimal();
        assert_eq!(config.brand, Brand::Cupra);
        assert_eq!(config.interval, 300);
        assert_eq!(config.max_age(), Duration::from_secs(299));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.api_log_level, "warn");
        assert_eq!(config.netrc_machine(), "carlink-cupra");
    }

    #[test]
    fn interval_below_minimum_is_rejected() {
        let mut config = minimal();
        config.interval = 60;
        assert!(matches!(
            config.validate(),
            Err(ConnectorError::Config(_))
        ));
    }

    #[test]
    fn explicit_max_age_is_accepted_unchanged() {
        let mut config = minimal();
        // An explicit window may match or exceed the interval; only the
        // implicit default stays one second below it.
        config.max_age = Some(300);
        assert!(config.validate().is_ok());
        assert_eq!(config.max_age(), Duration::from_secs(300));
        config.max_age = Some(600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
base_url = "https://cloud.example.com"
brand = "seat"
username = "user@example.com"
password = "secret"
interval = 180
"#
        )
        .unwrap();

        let config = ConnectorConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.brand, Brand::Seat);
        assert_eq!(config.interval, 180);
        assert_eq!(config.netrc_machine(), "carlink-seat");
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = minimal();
        config.password = Some("hunter2".to_string());
        config.spin = Some("1234".to_string());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("1234"));
        assert!(rendered.contains("***"));
    }
}
