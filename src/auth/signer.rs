//! BCE `bce-auth-v1` request signing.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::canonical::{
    build_canonical_headers, build_canonical_query_string, normalize_path_segments, Fields,
};
use crate::error::QianfanError;

type HmacSha256 = Hmac<Sha256>;

pub const AUTH_VERSION: &str = "bce-auth-v1";
pub const DEFAULT_EXPIRATION_SECS: u64 = 1800;

/// Hosts whose object paths are signed segment by segment.
const STORAGE_HOST_SUFFIX: &str = "bcebos.com";

/// Everything the signer needs to know about one request.
#[derive(Debug, Clone)]
pub struct SigningRequest<'a> {
    pub method: &'a str,
    pub resource: &'a str,
    pub params: Option<&'a Fields>,
    pub headers: &'a Fields,
    /// Seconds since the epoch; `None` means now.
    pub timestamp: Option<i64>,
    /// Validity window of the signature; `None` means [`DEFAULT_EXPIRATION_SECS`].
    pub expiration_secs: Option<u64>,
    pub headers_to_sign: Option<&'a [&'a str]>,
}

impl<'a> SigningRequest<'a> {
    #[must_use]
    pub fn new(method: &'a str, resource: &'a str, headers: &'a Fields) -> Self {
        Self {
            method,
            resource,
            params: None,
            headers,
            timestamp: None,
            expiration_secs: None,
            headers_to_sign: None,
        }
    }
}

/// Produces the value of an `Authorization` header for a request.
///
/// [`BceSigner`] is the stock implementation; callers may plug their own
/// (for example one that delegates to a signing service).
pub trait RequestSigner: Send + Sync {
    /// # Errors
    ///
    /// Returns [`QianfanError::Signature`] when no authorization can be produced.
    fn authorization(&self, request: &SigningRequest<'_>) -> Result<String, QianfanError>;
}

/// HMAC-SHA256 signer holding a long-term access key / secret key pair.
#[derive(Clone)]
pub struct BceSigner {
    access_key: String,
    secret_key: String,
}

impl std::fmt::Debug for BceSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BceSigner")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl BceSigner {
    #[must_use]
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    #[must_use]
    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Build `bce-auth-v1/{ak}/{timestamp}/{expiration}/{signed headers}/{signature}`.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::Signature`] when the timestamp is outside the
    /// representable calendar range.
    pub fn generate_authorization(&self, request: &SigningRequest<'_>) -> Result<String, QianfanError> {
        let timestamp = request.timestamp.unwrap_or_else(|| Utc::now().timestamp());
        let expiration = request.expiration_secs.unwrap_or(DEFAULT_EXPIRATION_SECS);

        let raw_session_key = format!(
            "{AUTH_VERSION}/{}/{}/{expiration}",
            self.access_key,
            format_timestamp(timestamp)?
        );
        let session_key = hmac_sha256_hex(self.secret_key.as_bytes(), raw_session_key.as_bytes());

        let canonical_uri = if is_storage_resource(request.headers) {
            normalize_path_segments(request.resource)
        } else {
            request.resource.to_string()
        };
        let canonical_query = build_canonical_query_string(request.params);
        let canonical_headers = build_canonical_headers(request.headers, request.headers_to_sign);

        let raw_signature = format!(
            "{}\n{canonical_uri}\n{canonical_query}\n{}",
            request.method, canonical_headers.canonical
        );
        tracing::trace!(canonical_request = %raw_signature, "bce canonical request");
        let signature = hmac_sha256_hex(session_key.as_bytes(), raw_signature.as_bytes());

        Ok(format!(
            "{raw_session_key}/{}/{signature}",
            canonical_headers.signed_headers.join(";")
        ))
    }
}

impl RequestSigner for BceSigner {
    fn authorization(&self, request: &SigningRequest<'_>) -> Result<String, QianfanError> {
        self.generate_authorization(request)
    }
}

/// Format seconds since the epoch as `YYYY-MM-DDTHH:MM:SSZ`.
///
/// # Errors
///
/// Returns [`QianfanError::Signature`] for timestamps chrono cannot represent.
pub fn format_timestamp(timestamp: i64) -> Result<String, QianfanError> {
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| QianfanError::Signature(format!("timestamp {timestamp} is out of range")))?;
    Ok(datetime.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> String {
    // HMAC accepts keys of any length, so `new_from_slice` cannot fail here.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC can take key of any size"),
    };
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

fn is_storage_resource(headers: &Fields) -> bool {
    headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("host")
            && value
                .to_string()
                .trim()
                .split(':')
                .next()
                .is_some_and(|host| host.ends_with(STORAGE_HOST_SUFFIX))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::canonical::FieldValue;

    const PINNED_EMPTY_GET: &str = "bce-auth-v1/testak/2021-01-01T00:00:00Z/1800//8a05de875701044dda3a970e18dd704fc0f00457836dd307bc132b64f02325db";

    fn fixed_request<'a>(headers: &'a Fields, params: &'a Fields) -> SigningRequest<'a> {
        SigningRequest {
            method: "GET",
            resource: "/",
            params: Some(params),
            headers,
            timestamp: Some(1_609_459_200),
            expiration_secs: Some(1800),
            headers_to_sign: None,
        }
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1_609_459_200).unwrap(), "2021-01-01T00:00:00Z");
        assert!(format_timestamp(i64::MAX).is_err());
    }

    #[test]
    fn test_pinned_signature_for_empty_get() {
        let signer = BceSigner::new("testak", "testsk");
        let headers = Fields::new();
        let params = Fields::new();
        let auth = signer
            .generate_authorization(&fixed_request(&headers, &params))
            .unwrap();
        assert_eq!(auth, PINNED_EMPTY_GET);
    }

    #[test]
    fn test_signature_is_stable() {
        let signer = BceSigner::new("testak", "testsk");
        let mut headers = Fields::new();
        headers.insert("Host".to_string(), FieldValue::from("aip.baidubce.com"));
        headers.insert("x-bce-date".to_string(), FieldValue::from("2021-01-01T00:00:00Z"));
        let mut params = Fields::new();
        params.insert("access_token".to_string(), FieldValue::from("t"));
        let first = signer
            .generate_authorization(&fixed_request(&headers, &params))
            .unwrap();
        let second = signer
            .generate_authorization(&fixed_request(&headers, &params))
            .unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("bce-auth-v1/testak/2021-01-01T00:00:00Z/1800/host;x-bce-date/"));
        let signature = first.rsplit('/').next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_signature_changes_with_secret() {
        let headers = Fields::new();
        let params = Fields::new();
        let a = BceSigner::new("testak", "testsk")
            .generate_authorization(&fixed_request(&headers, &params))
            .unwrap();
        let b = BceSigner::new("testak", "other")
            .generate_authorization(&fixed_request(&headers, &params))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_default_expiration_applies() {
        let headers = Fields::new();
        let mut request = SigningRequest::new("POST", "/rpc", &headers);
        request.timestamp = Some(0);
        let auth = BceSigner::new("ak", "sk").generate_authorization(&request).unwrap();
        assert!(auth.starts_with("bce-auth-v1/ak/1970-01-01T00:00:00Z/1800//"));
    }

    #[test]
    fn test_storage_host_detection() {
        let mut headers = Fields::new();
        headers.insert("Host".to_string(), FieldValue::from("bj.bcebos.com"));
        assert!(is_storage_resource(&headers));
        headers.insert("Host".to_string(), FieldValue::from("aip.baidubce.com:443"));
        assert!(!is_storage_resource(&headers));
    }

    #[test]
    fn test_debug_hides_secret() {
        let rendered = format!("{:?}", BceSigner::new("ak", "very-secret"));
        assert!(!rendered.contains("very-secret"));
    }
}
