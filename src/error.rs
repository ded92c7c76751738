/// Error type shared by every layer of the SDK.
///
/// Variants own plain strings so the error is `Clone`; a teed stream hands the
/// same terminal error to both of its branches.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QianfanError {
    #[error("Auth config error: {0}")]
    AuthConfig(String),
    #[error("Token fetch error: {0}")]
    TokenFetch(String),
    #[error("Signature error: {0}")]
    Signature(String),
    #[error("Request failed: status={status}, code={code:?}, message={message}")]
    RequestFailed {
        status: u16,
        code: Option<i64>,
        message: String,
    },
    #[error("Stream decode error: {0}")]
    StreamDecode(String),
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),
    #[error("Stream already consumed: use tee() to iterate it more than once")]
    AlreadyConsumed,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, QianfanError>;

/// Broad error category, used by callers that implement their own retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    RateLimit,
    ServerError,
    Unknown,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        429 => ErrorCategory::RateLimit,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}

impl QianfanError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            QianfanError::InvalidRequest(_)
            | QianfanError::UnsupportedInput(_)
            | QianfanError::AlreadyConsumed => ErrorCategory::InvalidRequest,
            QianfanError::AuthConfig(_)
            | QianfanError::TokenFetch(_)
            | QianfanError::Signature(_) => ErrorCategory::Authentication,
            QianfanError::Config(_)
            | QianfanError::Transport(_)
            | QianfanError::StreamDecode(_) => ErrorCategory::ServerError,
            QianfanError::RequestFailed { status, .. } => category_from_upstream_status(*status),
        }
    }

    /// Whether repeating the same call could plausibly succeed.
    ///
    /// The SDK itself never retries.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            QianfanError::Transport(_) => true,
            QianfanError::RequestFailed { status, .. } => {
                matches!(
                    category_from_upstream_status(*status),
                    ErrorCategory::RateLimit | ErrorCategory::ServerError
                )
            }
            _ => false,
        }
    }

    /// Wrap a reqwest error, dropping the request URL (it can carry
    /// `client_secret` or `access_token` query parameters).
    pub(crate) fn transport(context: &str, err: reqwest::Error) -> Self {
        QianfanError::Transport(format!("{context}: {}", err.without_url()))
    }
}
