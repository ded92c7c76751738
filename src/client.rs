//! Request orchestration: URL building, authentication and dispatch.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::auth::signer::RequestSigner;
use crate::auth::token::AccessToken;
use crate::auth::{AuthMode, PreparedRequest};
use crate::config::{validate_config, ClientConfig};
use crate::error::QianfanError;
use crate::models::{Category, Target};
use crate::stream::{parse_value, Stream};
use crate::transport::{read_response, HttpTransport, RawResponse};
use crate::util::{api_error_from_body, body_preview};

const INFERENCE_PATH: &str = "rpc/2.0/ai_custom/v1/wenxinworkshop";

/// Value of `extra_parameters.request_source` on every inference request.
pub const REQUEST_SOURCE: &str = concat!("qianfan_rust_sdk_v", env!("CARGO_PKG_VERSION"));

/// Error codes the API uses for an access token it no longer accepts.
const REJECTED_TOKEN_CODES: [i64; 2] = [110, 111];

struct ClientInner {
    base_url: url::Url,
    auth: AuthMode,
    transport: HttpTransport,
}

/// Entry point shared by the chat, completions and embedding facades.
///
/// Cheap to clone; clones share the HTTP pool and the access-token cache.
#[derive(Clone)]
pub struct BaseClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for BaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("auth", &self.inner.auth)
            .finish_non_exhaustive()
    }
}

impl BaseClient {
    /// Build a client, picking the auth mode from the configured credentials.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::Config`] for an invalid config and
    /// [`QianfanError::AuthConfig`] when no complete credential pair is set.
    pub fn new(config: ClientConfig) -> Result<Self, QianfanError> {
        let base_url = parse_base_url(&config)?;
        let auth = AuthMode::from_config(&config, &base_url)?;
        Self::build(&config, base_url, auth)
    }

    /// Build a client from `QIANFAN_*` environment variables.
    ///
    /// # Errors
    ///
    /// See [`BaseClient::new`].
    pub fn from_env() -> Result<Self, QianfanError> {
        Self::new(ClientConfig::from_env())
    }

    /// Build a signature-auth client whose `Authorization` header comes from `signer`.
    ///
    /// Credentials in `config` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::Config`] for an invalid config.
    pub fn with_signer(
        config: ClientConfig,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self, QianfanError> {
        let base_url = parse_base_url(&config)?;
        let auth = AuthMode::Signature {
            signer,
            expiration_secs: config.signature_expiration_secs,
        };
        Self::build(&config, base_url, auth)
    }

    fn build(config: &ClientConfig, base_url: url::Url, auth: AuthMode) -> Result<Self, QianfanError> {
        let transport = HttpTransport::new(config)?;
        tracing::debug!(base_url = %base_url, auth_mode = auth.name(), "qianfan client ready");
        Ok(Self {
            inner: Arc::new(ClientInner {
                base_url,
                auth,
                transport,
            }),
        })
    }

    /// `"signature"` or `"oauth"`.
    #[must_use]
    pub fn auth_mode_name(&self) -> &'static str {
        self.inner.auth.name()
    }

    /// Snapshot of the cached access token in OAuth mode.
    #[must_use]
    pub fn cached_access_token(&self) -> Option<AccessToken> {
        match &self.inner.auth {
            AuthMode::OAuth(cache) => Some(cache.cached()),
            AuthMode::Signature { .. } => None,
        }
    }

    /// Mark the cached access token expired so the next request fetches a new one.
    pub fn invalidate_access_token(&self) {
        if let AuthMode::OAuth(cache) = &self.inner.auth {
            cache.invalidate();
        }
    }

    /// Full inference URL for a family and endpoint suffix.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::InvalidRequest`] when the endpoint does not form a valid URL.
    pub fn endpoint_url(&self, category: Category, endpoint: &str) -> Result<url::Url, QianfanError> {
        let base = self.inner.base_url.as_str().trim_end_matches('/');
        let endpoint = endpoint.trim_matches('/');
        if endpoint.is_empty() {
            return Err(QianfanError::InvalidRequest("endpoint must not be empty".to_string()));
        }
        url::Url::parse(&format!("{base}/{INFERENCE_PATH}/{category}/{endpoint}"))
            .map_err(|e| QianfanError::InvalidRequest(format!("invalid endpoint '{endpoint}': {e}")))
    }

    /// Send a unary request and return the JSON response body.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::RequestFailed`] for a non-2xx status or an error
    /// body, plus any auth or transport error.
    pub async fn send_request(&self, target: &Target, body: Value) -> Result<Value, QianfanError> {
        let request = self.prepare(target, body, false).await?;
        let response = self.inner.transport.send(request).await?;
        let result = unary_body(&response);
        self.observe(&result);
        result
    }

    /// Send a streaming request and return the parsed event stream.
    ///
    /// A 2xx JSON response (instead of an event stream) is either an error or
    /// yielded as the only item.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::RequestFailed`] for a non-2xx status or an error
    /// body, plus any auth or transport error.
    pub async fn send_stream_request<T>(
        &self,
        target: &Target,
        body: Value,
    ) -> Result<Stream<T>, QianfanError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let request = self.prepare(target, body, true).await?;
        let response = self.inner.transport.send_streaming(request).await?;

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));
        if !response.status().is_success() || is_json {
            let raw = read_response(response).await?;
            let result = unary_body(&raw).and_then(parse_value::<T>);
            self.observe(&result);
            let item = result?;
            return Ok(Stream::from_item_stream(futures_util::stream::iter([Ok(item)])));
        }
        Ok(Stream::from_sse_response(response))
    }

    async fn prepare(
        &self,
        target: &Target,
        body: Value,
        stream: bool,
    ) -> Result<PreparedRequest, QianfanError> {
        target.validate_body(&body)?;
        let url = self.endpoint_url(target.category(), target.endpoint())?;
        let body = envelope(body, stream)?;
        let body = serde_json::to_vec(&body)
            .map_err(|e| QianfanError::InvalidRequest(format!("cannot serialize body: {e}")))?;

        let mut headers = http::HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut request = PreparedRequest {
            method: http::Method::POST,
            url,
            headers,
            body: Bytes::from(body),
        };
        self.inner
            .auth
            .authorize(&mut request, &self.inner.transport)
            .await?;

        tracing::debug!(
            category = %target.category(),
            endpoint = target.endpoint(),
            auth_mode = self.inner.auth.name(),
            stream,
            "sending qianfan request"
        );
        Ok(request)
    }

    fn observe<T>(&self, result: &Result<T, QianfanError>) {
        let Err(QianfanError::RequestFailed {
            status,
            code: Some(code),
            message,
        }) = result
        else {
            return;
        };
        tracing::warn!(status, code, message = %message, "qianfan request rejected");
        if REJECTED_TOKEN_CODES.contains(code) {
            self.invalidate_access_token();
        }
    }
}

fn parse_base_url(config: &ClientConfig) -> Result<url::Url, QianfanError> {
    validate_config(config)?;
    url::Url::parse(config.base_url.trim())
        .map_err(|e| QianfanError::Config(format!("base_url is not a valid URL: {e}")))
}

/// Add `extra_parameters.request_source` and the stream flag to a request body.
fn envelope(mut body: Value, stream: bool) -> Result<Value, QianfanError> {
    let Value::Object(object) = &mut body else {
        return Err(QianfanError::InvalidRequest(
            "request body must be a JSON object".to_string(),
        ));
    };
    if stream {
        object.insert("stream".to_string(), Value::Bool(true));
    } else {
        object.remove("stream");
    }
    let extra = object
        .entry("extra_parameters")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(extra) = extra else {
        return Err(QianfanError::InvalidRequest(
            "extra_parameters must be a JSON object".to_string(),
        ));
    };
    extra.insert(
        "request_source".to_string(),
        Value::String(REQUEST_SOURCE.to_string()),
    );
    Ok(body)
}

/// Decode a buffered response, turning error statuses and error bodies into errors.
fn unary_body(response: &RawResponse) -> Result<Value, QianfanError> {
    let status = response.status.as_u16();
    let parsed = serde_json::from_slice::<Value>(&response.body);

    if !response.status.is_success() {
        return Err(parsed
            .ok()
            .and_then(|value| api_error_from_body(status, &value))
            .unwrap_or_else(|| QianfanError::RequestFailed {
                status,
                code: None,
                message: body_preview(&response.body),
            }));
    }

    let value = parsed.map_err(|e| QianfanError::RequestFailed {
        status,
        code: None,
        message: format!("response is not JSON ({e}): {}", body_preview(&response.body)),
    })?;
    match api_error_from_body(status, &value) {
        Some(err) => Err(err),
        None => Ok(value),
    }
}
