use std::time::Duration;

use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::api::Usage;
use crate::config::ClientConfig;

/// Map a config log level to an `EnvFilter` directive.
///
/// - "DISABLED" -> `None`
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (TRACE, DEBUG, INFO, WARN, ERROR)
#[must_use]
pub fn filter_directive(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Install a `fmt` subscriber at the given level.
///
/// Does nothing when a global subscriber is already set, so a host
/// application keeps its own.
pub fn init_tracing(log_level: &str) {
    let Some(directive) = filter_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed, keeping it");
    }
}

/// [`init_tracing`] at the config's `log_level`.
pub fn init_tracing_from_config(config: &ClientConfig) {
    init_tracing(&config.log_level);
}

/// Log token usage of a completed unary request.
pub fn log_usage(endpoint: &str, usage: &Usage, elapsed: Duration) {
    debug!(
        endpoint = endpoint,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "qianfan request complete"
    );
}
