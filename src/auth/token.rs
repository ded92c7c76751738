//! OAuth-style access tokens fetched with an API key / secret key pair.

use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::QianfanError;
use crate::transport::HttpTransport;
use crate::util::unix_now_secs;

const TOKEN_PATH: &str = "/oauth/2.0/token";

/// A bearer token together with the moment it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessToken {
    pub token: String,
    pub expires_at_epoch_secs: u64,
}

impl AccessToken {
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at_epoch_secs < now
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Per-client token cache.
///
/// Reads take the `RwLock` only; a refresh is serialized behind `refresh_lock`
/// so concurrent callers wait for one in-flight fetch instead of issuing their own.
pub struct TokenCache {
    api_key: String,
    secret_key: String,
    token_url: url::Url,
    current: RwLock<AccessToken>,
    refresh_lock: Mutex<()>,
}

impl TokenCache {
    /// # Errors
    ///
    /// Returns [`QianfanError::Config`] when `base_url` cannot host the token endpoint.
    pub fn new(
        api_key: impl Into<String>,
        secret_key: impl Into<String>,
        base_url: &url::Url,
    ) -> Result<Self, QianfanError> {
        let api_key = api_key.into();
        let secret_key = secret_key.into();
        let mut token_url = base_url
            .join(TOKEN_PATH)
            .map_err(|e| QianfanError::Config(format!("Invalid token endpoint: {e}")))?;
        token_url
            .query_pairs_mut()
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &api_key)
            .append_pair("client_secret", &secret_key);
        Ok(Self {
            api_key,
            secret_key,
            token_url,
            current: RwLock::new(AccessToken::default()),
            refresh_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Snapshot of the cached token, valid or not.
    #[must_use]
    pub fn cached(&self) -> AccessToken {
        self.current.read().clone()
    }

    /// Force the next [`TokenCache::token`] call to refresh.
    pub fn invalidate(&self) {
        self.current.write().expires_at_epoch_secs = 0;
    }

    /// Return a valid token, fetching a new one when the cached one expired.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::TokenFetch`] when the endpoint is unreachable or
    /// answers with an error payload.
    pub async fn token(&self, transport: &HttpTransport) -> Result<String, QianfanError> {
        {
            let current = self.current.read();
            if !current.is_expired(unix_now_secs()) {
                return Ok(current.token.clone());
            }
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        {
            let current = self.current.read();
            if !current.is_expired(unix_now_secs()) {
                return Ok(current.token.clone());
            }
        }

        let fresh = self.fetch(transport).await?;
        let token = fresh.token.clone();
        *self.current.write() = fresh;
        Ok(token)
    }

    async fn fetch(&self, transport: &HttpTransport) -> Result<AccessToken, QianfanError> {
        tracing::info!(api_key = %self.api_key, "refreshing qianfan access token");
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.api_key)
            .append_pair("client_secret", &self.secret_key)
            .finish();

        let response = transport
            .post(&self.token_url, &headers, bytes::Bytes::from(form))
            .await
            .map_err(|err| QianfanError::TokenFetch(err.to_string()))?;

        let parsed: TokenResponse = serde_json::from_slice(&response.body).map_err(|e| {
            QianfanError::TokenFetch(format!(
                "Unreadable token response (status {}): {e}",
                response.status
            ))
        })?;

        if let Some(error) = parsed.error {
            let description = parsed.error_description.unwrap_or_default();
            tracing::warn!(error = %error, "qianfan token endpoint returned an error");
            return Err(QianfanError::TokenFetch(format!("{error}: {description}")));
        }
        if !response.status.is_success() {
            return Err(QianfanError::TokenFetch(format!(
                "Token endpoint answered with status {}",
                response.status
            )));
        }

        let token = parsed
            .access_token
            .ok_or_else(|| QianfanError::TokenFetch("Token response has no access_token".into()))?;
        let expires_in = parsed.expires_in.unwrap_or(0);
        Ok(AccessToken {
            token,
            expires_at_epoch_secs: unix_now_secs().saturating_add(expires_in),
        })
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("api_key", &self.api_key)
            .field("expires_at_epoch_secs", &self.current.read().expires_at_epoch_secs)
            .finish_non_exhaustive()
    }
}
