use super::{ClientConfig, ConfigError};

/// Validate a client config, returning an error if any rule is violated.
///
/// Missing credentials are not an error here: they may still be filled from
/// the environment before the client is built.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    validate_base_url(config)?;
    validate_http_settings(config)?;
    validate_credential_pairs(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_base_url(config: &ClientConfig) -> Result<(), ConfigError> {
    let base_url = config.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(validation_err(format!(
            "base_url must start with http:// or https://, got '{base_url}'"
        )));
    }
    let parsed = url::Url::parse(base_url)
        .map_err(|e| validation_err(format!("base_url is not a valid URL: {e}")))?;
    if parsed.host_str().is_none() {
        return Err(validation_err("base_url must include a host"));
    }
    Ok(())
}

fn validate_http_settings(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.timeout_secs == 0 {
        return Err(validation_err("timeout_secs must be greater than 0"));
    }
    if config.connect_timeout_secs == 0 {
        return Err(validation_err("connect_timeout_secs must be greater than 0"));
    }
    if config.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if config.signature_expiration_secs == 0 {
        return Err(validation_err(
            "signature_expiration_secs must be greater than 0",
        ));
    }
    Ok(())
}

fn is_set(value: Option<&String>) -> bool {
    value.is_some_and(|value| !value.trim().is_empty())
}

fn validate_credential_pairs(config: &ClientConfig) -> Result<(), ConfigError> {
    let pairs = [
        (
            "qianfan_ak",
            config.qianfan_ak.as_ref(),
            "qianfan_sk",
            config.qianfan_sk.as_ref(),
        ),
        (
            "qianfan_access_key",
            config.qianfan_access_key.as_ref(),
            "qianfan_secret_key",
            config.qianfan_secret_key.as_ref(),
        ),
    ];
    for (left_name, left, right_name, right) in pairs {
        if is_set(left) != is_set(right) {
            return Err(validation_err(format!(
                "{left_name} and {right_name} must be set together"
            )));
        }
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &[
    "DEBUG", "INFO", "WARN", "WARNING", "ERROR", "CRITICAL", "TRACE", "DISABLED",
];

fn validate_log_level(config: &ClientConfig) -> Result<(), ConfigError> {
    let level = config.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "Invalid log_level '{}'. Must be one of: {}",
            config.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}
