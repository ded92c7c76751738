//! Canonical forms of request components for BCE signing.
//!
//! Every function here is pure: identical input always produces byte-identical
//! output, which is what lets the server recompute the same signature.

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left as-is by [`normalize`]: ASCII alphanumerics plus `- _ . ~`.
///
/// `! ' ( ) *` are escaped as well, unlike URI-component encoding.
const BCE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Header names signed when the caller gives no explicit list.
pub const DEFAULT_HEADERS_TO_SIGN: [&str; 4] = ["host", "content-md5", "content-length", "content-type"];

const BCE_HEADER_PREFIX: &str = "x-bce-";

/// A header or query-parameter value as handed to the signer.
///
/// Only [`FieldValue::Text`] is trimmed before signing; numbers and booleans
/// are rendered verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl FieldValue {
    fn as_signed_str(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Bool(value) => write!(f, "{value}"),
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Float(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or(FieldValue::Float(value as f64), FieldValue::Int)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// Unordered name → value map for headers or query parameters.
pub type Fields = BTreeMap<String, FieldValue>;

/// Percent-encode `value` for inclusion in a signature.
///
/// With `encoding_slash == false`, `%2F` is turned back into `/` so that a
/// path keeps its separators. `None` maps to the empty string.
#[must_use]
pub fn normalize(value: Option<&str>, encoding_slash: bool) -> String {
    let Some(value) = value else {
        return String::new();
    };
    let encoded = utf8_percent_encode(value, BCE_ENCODE_SET).to_string();
    if encoding_slash {
        encoded
    } else {
        encoded.replace("%2F", "/")
    }
}

/// Build the canonical query string: `k=v` pairs, normalized, sorted, `&`-joined.
///
/// A parameter named `authorization` (any case) is never part of the signature.
#[must_use]
pub fn build_canonical_query_string(params: Option<&Fields>) -> String {
    let Some(params) = params else {
        return String::new();
    };

    let mut pairs: Vec<String> = params
        .iter()
        .filter(|(key, _)| !key.eq_ignore_ascii_case("authorization"))
        .map(|(key, value)| {
            let rendered = match value {
                FieldValue::Null => None,
                other => Some(other.to_string()),
            };
            format!(
                "{}={}",
                normalize(Some(key), true),
                normalize(rendered.as_deref(), true)
            )
        })
        .collect();
    pairs.sort_unstable();
    pairs.join("&")
}

/// Canonical header block plus the names that went into it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanonicalHeaders {
    pub canonical: String,
    pub signed_headers: Vec<String>,
}

/// Build the canonical header block.
///
/// A header is signed when its lower-cased name is in `headers_to_sign`
/// (defaults to [`DEFAULT_HEADERS_TO_SIGN`]) or starts with `x-bce-`, and its
/// value is present and non-blank. Lines are `name:value`, normalized, sorted
/// and joined with `\n`; `signed_headers` follows the same order.
#[must_use]
pub fn build_canonical_headers(headers: &Fields, headers_to_sign: Option<&[&str]>) -> CanonicalHeaders {
    let signed_set: Vec<String> = headers_to_sign
        .unwrap_or(&DEFAULT_HEADERS_TO_SIGN)
        .iter()
        .map(|name| name.to_ascii_lowercase())
        .collect();

    let mut entries: Vec<(String, String)> = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        let lower = name.to_ascii_lowercase();
        if !signed_set.iter().any(|signed| signed == &lower) && !lower.starts_with(BCE_HEADER_PREFIX) {
            continue;
        }
        let Some(value) = value.as_signed_str() else {
            continue;
        };
        let line = format!(
            "{}:{}",
            normalize(Some(&lower), true),
            normalize(Some(&value), true)
        );
        entries.push((line, lower));
    }
    entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let mut canonical = String::new();
    let mut signed_headers = Vec::with_capacity(entries.len());
    for (index, (line, name)) in entries.into_iter().enumerate() {
        if index > 0 {
            canonical.push('\n');
        }
        canonical.push_str(&line);
        signed_headers.push(name);
    }

    CanonicalHeaders {
        canonical,
        signed_headers,
    }
}

/// Normalize each `/`-separated segment of `path` individually.
#[must_use]
pub fn normalize_path_segments(path: &str) -> String {
    path.split('/')
        .map(|segment| normalize(Some(segment), true))
        .collect::<Vec<_>>()
        .join("/")
}
