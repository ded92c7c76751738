pub mod canonical;
pub mod signer;
pub mod token;

use std::sync::Arc;

use bytes::Bytes;
use http::header::{AUTHORIZATION, HOST};
use http::{HeaderName, HeaderValue};

use crate::config::ClientConfig;
use crate::error::QianfanError;
use crate::transport::HttpTransport;

use self::canonical::{FieldValue, Fields};
use self::signer::{format_timestamp, BceSigner, RequestSigner, SigningRequest};
use self::token::TokenCache;

const X_BCE_DATE: HeaderName = HeaderName::from_static("x-bce-date");

/// A request ready to be sent, before authentication is attached.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: http::Method,
    pub url: url::Url,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

/// How a client proves its identity, resolved once when the client is built.
pub enum AuthMode {
    /// Every request is signed with an HMAC derived from a long-term secret.
    Signature {
        signer: Arc<dyn RequestSigner>,
        expiration_secs: u64,
    },
    /// A short-lived bearer token is fetched once and appended to the URL.
    OAuth(TokenCache),
}

impl std::fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMode::Signature {
                expiration_secs, ..
            } => f
                .debug_struct("Signature")
                .field("expiration_secs", expiration_secs)
                .finish_non_exhaustive(),
            AuthMode::OAuth(cache) => f.debug_tuple("OAuth").field(cache).finish(),
        }
    }
}

impl AuthMode {
    /// Pick the auth mode from configured credentials.
    ///
    /// The access-key pair (signature auth) wins over the API-key pair.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::AuthConfig`] when neither pair is complete.
    pub fn from_config(config: &ClientConfig, base_url: &url::Url) -> Result<Self, QianfanError> {
        if let (Some(access_key), Some(secret_key)) = (
            non_blank(config.qianfan_access_key.as_deref()),
            non_blank(config.qianfan_secret_key.as_deref()),
        ) {
            return Ok(AuthMode::Signature {
                signer: Arc::new(BceSigner::new(access_key, secret_key)),
                expiration_secs: config.signature_expiration_secs,
            });
        }
        if let (Some(api_key), Some(secret_key)) = (
            non_blank(config.qianfan_ak.as_deref()),
            non_blank(config.qianfan_sk.as_deref()),
        ) {
            return Ok(AuthMode::OAuth(TokenCache::new(api_key, secret_key, base_url)?));
        }
        Err(QianfanError::AuthConfig(
            "set QIANFAN_ACCESS_KEY/QIANFAN_SECRET_KEY or QIANFAN_AK/QIANFAN_SK".to_string(),
        ))
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            AuthMode::Signature { .. } => "signature",
            AuthMode::OAuth(_) => "oauth",
        }
    }

    /// Attach credentials to `request`.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::Signature`] when signing fails and
    /// [`QianfanError::TokenFetch`] when no access token can be obtained.
    pub async fn authorize(
        &self,
        request: &mut PreparedRequest,
        transport: &HttpTransport,
    ) -> Result<(), QianfanError> {
        match self {
            AuthMode::Signature {
                signer,
                expiration_secs,
            } => sign_request(signer.as_ref(), *expiration_secs, request),
            AuthMode::OAuth(cache) => {
                let token = cache.token(transport).await?;
                request
                    .url
                    .query_pairs_mut()
                    .append_pair("access_token", &token);
                Ok(())
            }
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn host_header_value(url: &url::Url) -> Result<String, QianfanError> {
    let host = url
        .host_str()
        .ok_or_else(|| QianfanError::Signature(format!("URL {url} has no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn sign_request(
    signer: &dyn RequestSigner,
    expiration_secs: u64,
    request: &mut PreparedRequest,
) -> Result<(), QianfanError> {
    let timestamp = chrono::Utc::now().timestamp();
    let date = format_timestamp(timestamp)?;
    let host = host_header_value(&request.url)?;

    request.headers.insert(
        HOST,
        HeaderValue::from_str(&host).map_err(|e| QianfanError::Signature(e.to_string()))?,
    );
    request.headers.insert(
        X_BCE_DATE,
        HeaderValue::from_str(&date).map_err(|e| QianfanError::Signature(e.to_string()))?,
    );

    let mut headers = Fields::new();
    for (name, value) in &request.headers {
        let value = value
            .to_str()
            .map_err(|e| QianfanError::Signature(format!("header {name} is not text: {e}")))?;
        headers.insert(name.as_str().to_string(), FieldValue::from(value));
    }
    let params: Fields = request
        .url
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), FieldValue::Text(value.into_owned())))
        .collect();

    let signing = SigningRequest {
        method: request.method.as_str(),
        resource: request.url.path(),
        params: Some(&params),
        headers: &headers,
        timestamp: Some(timestamp),
        expiration_secs: Some(expiration_secs),
        headers_to_sign: None,
    };
    let authorization = signer.authorization(&signing)?;
    if authorization.is_empty() {
        return Err(QianfanError::Signature(
            "signer produced an empty authorization".to_string(),
        ));
    }
    let value = HeaderValue::from_str(&authorization)
        .map_err(|e| QianfanError::Signature(format!("authorization is not a header value: {e}")))?;
    request.headers.insert(AUTHORIZATION, value);
    Ok(())
}
