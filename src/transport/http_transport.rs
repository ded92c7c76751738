use std::time::Duration;

use bytes::Bytes;

use crate::auth::PreparedRequest;
use crate::config::ClientConfig;
use crate::error::QianfanError;

fn build_reqwest_client(config: &ClientConfig) -> Result<reqwest::Client, QianfanError> {
    let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
    };

    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(config.http_pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(config.timeout_secs));

    if !config.http_use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| QianfanError::transport("Failed to build HTTP client", err))
}

/// Fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: http::StatusCode,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

/// Pooled HTTP client used for token fetches and inference calls.
///
/// TLS, proxies and redirects are left to reqwest. Nothing here retries.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`QianfanError::Transport`] when the underlying client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, QianfanError> {
        Ok(Self {
            client: build_reqwest_client(config)?,
        })
    }

    /// Wrap an existing reqwest client.
    #[must_use]
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// POST `body` and buffer the whole response.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::Transport`] when the request cannot be sent or
    /// the body cannot be read. HTTP error statuses are returned as responses.
    pub async fn post(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: Bytes,
    ) -> Result<RawResponse, QianfanError> {
        let response = self.execute(http::Method::POST, url, headers, body).await?;
        read_response(response).await
    }

    /// Send a prepared request and buffer the whole response.
    ///
    /// # Errors
    ///
    /// See [`HttpTransport::post`].
    pub async fn send(&self, request: PreparedRequest) -> Result<RawResponse, QianfanError> {
        let response = self
            .execute(request.method, &request.url, &request.headers, request.body)
            .await?;
        read_response(response).await
    }

    /// Send a prepared request and hand back the response with its body unread.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::Transport`] when the request cannot be sent.
    pub async fn send_streaming(
        &self,
        request: PreparedRequest,
    ) -> Result<reqwest::Response, QianfanError> {
        self.execute(request.method, &request.url, &request.headers, request.body)
            .await
    }

    async fn execute(
        &self,
        method: http::Method,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, QianfanError> {
        let mut request = reqwest::Request::new(method, url.clone());
        *request.headers_mut() = headers.clone();
        *request.body_mut() = Some(reqwest::Body::from(body));

        self.client.execute(request).await.map_err(|err| {
            let err = err.without_url();
            tracing::warn!(host = url.host_str().unwrap_or_default(), error = %err, "request to qianfan failed");
            QianfanError::transport("Request failed", err)
        })
    }
}

pub(crate) async fn read_response(response: reqwest::Response) -> Result<RawResponse, QianfanError> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|err| QianfanError::transport("Failed to read response body", err))?;
    Ok(RawResponse {
        status,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_builds_from_default_config() {
        assert!(HttpTransport::new(&ClientConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_transport_error_omits_query_credentials() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(&ClientConfig::default()).unwrap();
        let url = url::Url::parse(&format!(
            "http://{addr}/chat/eb-instant?access_token=tok-do-not-log"
        ))
        .unwrap();
        let err = transport
            .post(&url, &http::HeaderMap::new(), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, QianfanError::Transport(_)));
        assert!(!err.to_string().contains("tok-do-not-log"), "{err}");
    }

    #[test]
    fn test_transport_builds_without_idle_timeout() {
        let config = ClientConfig {
            http_pool_idle_timeout_secs: 0,
            ..ClientConfig::default()
        };
        assert!(HttpTransport::new(&config).is_ok());
    }
}
