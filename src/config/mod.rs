pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use self::validation::validate_config;

pub const ENV_QIANFAN_AK: &str = "QIANFAN_AK";
pub const ENV_QIANFAN_SK: &str = "QIANFAN_SK";
pub const ENV_QIANFAN_ACCESS_KEY: &str = "QIANFAN_ACCESS_KEY";
pub const ENV_QIANFAN_SECRET_KEY: &str = "QIANFAN_SECRET_KEY";
pub const ENV_QIANFAN_BASE_URL: &str = "QIANFAN_BASE_URL";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

impl From<ConfigError> for crate::error::QianfanError {
    fn from(err: ConfigError) -> Self {
        crate::error::QianfanError::Config(err.to_string())
    }
}

/// Client configuration.
///
/// `qianfan_ak`/`qianfan_sk` enable token auth, `qianfan_access_key`/
/// `qianfan_secret_key` enable signature auth; signature auth wins when both
/// pairs are present.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qianfan_ak: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qianfan_sk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qianfan_access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qianfan_secret_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    #[serde(default = "default_signature_expiration_secs")]
    pub signature_expiration_secs: u64,
    /// Level for [`init_tracing_from_config`](crate::observability::init_tracing_from_config).
    /// The client itself never installs a subscriber.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_base_url() -> String {
    "https://aip.baidubce.com".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_signature_expiration_secs() -> u64 {
    crate::auth::signer::DEFAULT_EXPIRATION_SECS
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            qianfan_ak: None,
            qianfan_sk: None,
            qianfan_access_key: None,
            qianfan_secret_key: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            http_use_env_proxy: false,
            signature_expiration_secs: default_signature_expiration_secs(),
            log_level: default_log_level(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: Option<&String>) -> &'static str {
            if value.is_some() {
                "<set>"
            } else {
                "<unset>"
            }
        }
        f.debug_struct("ClientConfig")
            .field("qianfan_ak", &self.qianfan_ak)
            .field("qianfan_sk", &redact(self.qianfan_sk.as_ref()))
            .field("qianfan_access_key", &self.qianfan_access_key)
            .field("qianfan_secret_key", &redact(self.qianfan_secret_key.as_ref()))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("http_pool_max_idle_per_host", &self.http_pool_max_idle_per_host)
            .field("http_pool_idle_timeout_secs", &self.http_pool_idle_timeout_secs)
            .field("http_use_env_proxy", &self.http_use_env_proxy)
            .field("signature_expiration_secs", &self.signature_expiration_secs)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl ClientConfig {
    /// Default credentials from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Default credentials from an arbitrary variable lookup.
    ///
    /// Blank values count as unset.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::default().with_defaults_from(lookup)
    }

    /// Fill every unset credential (and the base URL, if still the default)
    /// from `lookup`. Values already present are kept.
    #[must_use]
    pub fn with_defaults_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if self.qianfan_ak.is_none() {
            self.qianfan_ak = read(ENV_QIANFAN_AK);
        }
        if self.qianfan_sk.is_none() {
            self.qianfan_sk = read(ENV_QIANFAN_SK);
        }
        if self.qianfan_access_key.is_none() {
            self.qianfan_access_key = read(ENV_QIANFAN_ACCESS_KEY);
        }
        if self.qianfan_secret_key.is_none() {
            self.qianfan_secret_key = read(ENV_QIANFAN_SECRET_KEY);
        }
        if self.base_url == default_base_url() {
            if let Some(base_url) = read(ENV_QIANFAN_BASE_URL) {
                self.base_url = base_url;
            }
        }
        self
    }

    /// Same as [`ClientConfig::with_defaults_from`] over the process environment.
    #[must_use]
    pub fn with_env_defaults(self) -> Self {
        self.with_defaults_from(|name| std::env::var(name).ok())
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.qianfan_ak = Some(api_key.into());
        self.qianfan_sk = Some(secret_key.into());
        self
    }

    #[must_use]
    pub fn with_access_key(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.qianfan_access_key = Some(access_key.into());
        self.qianfan_secret_key = Some(secret_key.into());
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<ClientConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// See [`load_config`].
pub fn parse_config(contents: &str) -> Result<ClientConfig, ConfigError> {
    let config: ClientConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "https://aip.baidubce.com");
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.signature_expiration_secs, 1800);
        assert_eq!(config.http_pool_max_idle_per_host, 16);
        assert!(!config.http_use_env_proxy);
    }

    #[test]
    fn test_from_lookup_reads_all_credentials() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("QIANFAN_AK", "api"),
            ("QIANFAN_SK", "secret"),
            ("QIANFAN_ACCESS_KEY", "ak"),
            ("QIANFAN_SECRET_KEY", "sk"),
            ("QIANFAN_BASE_URL", "http://127.0.0.1:9000"),
        ]));
        assert_eq!(config.qianfan_ak.as_deref(), Some("api"));
        assert_eq!(config.qianfan_sk.as_deref(), Some("secret"));
        assert_eq!(config.qianfan_access_key.as_deref(), Some("ak"));
        assert_eq!(config.qianfan_secret_key.as_deref(), Some("sk"));
        assert_eq!(config.base_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_defaults_do_not_override_explicit_values() {
        let config = ClientConfig::default()
            .with_api_key("explicit", "explicit-secret")
            .with_defaults_from(lookup_from(&[("QIANFAN_AK", "env"), ("QIANFAN_SK", "  ")]));
        assert_eq!(config.qianfan_ak.as_deref(), Some("explicit"));
        assert_eq!(config.qianfan_sk.as_deref(), Some("explicit-secret"));
        assert!(config.qianfan_access_key.is_none());
    }

    #[test]
    fn test_blank_env_values_are_unset() {
        let config = ClientConfig::from_lookup(lookup_from(&[("QIANFAN_AK", " ")]));
        assert!(config.qianfan_ak.is_none());
    }

    #[test]
    fn test_parse_yaml_config() {
        let config = parse_config(
            "qianfan_access_key: ak\nqianfan_secret_key: sk\ntimeout_secs: 30\n",
        )
        .unwrap();
        assert_eq!(config.qianfan_access_key.as_deref(), Some("ak"));
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.base_url, "https://aip.baidubce.com");
    }

    #[test]
    fn test_parse_yaml_rejects_bad_base_url() {
        let err = parse_config("base_url: ftp://example.com\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ClientConfig::default().with_access_key("ak", "super-secret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<set>"));
    }
}
