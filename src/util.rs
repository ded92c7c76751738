use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::error::QianfanError;

#[inline]
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

/// Turn an API error body into [`QianfanError::RequestFailed`].
///
/// Inference endpoints report `error_code`/`error_msg`; the OAuth endpoint
/// reports `error`/`error_description`. Returns `None` for a body that carries
/// neither.
pub(crate) fn api_error_from_body(status: u16, body: &Value) -> Option<QianfanError> {
    let object = body.as_object()?;
    if let Some(code) = object.get("error_code") {
        let message = object
            .get("error_msg")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Some(QianfanError::RequestFailed {
            status,
            code: code.as_i64(),
            message,
        });
    }
    let error = object.get("error")?;
    let message = match (error.as_str(), object.get("error_description").and_then(Value::as_str)) {
        (Some(error), Some(description)) => format!("{error}: {description}"),
        (Some(error), None) => error.to_string(),
        (None, _) => error.to_string(),
    };
    Some(QianfanError::RequestFailed {
        status,
        code: None,
        message,
    })
}

/// Short, lossy preview of a body for error messages.
pub(crate) fn body_preview(body: &[u8]) -> String {
    const MAX_PREVIEW: usize = 512;
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_PREVIEW {
        return text.into_owned();
    }
    let mut end = MAX_PREVIEW;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_error_from_error_code() {
        let err = api_error_from_body(
            200,
            &json!({"error_code": 110, "error_msg": "Access token invalid or no longer valid"}),
        )
        .unwrap();
        assert_eq!(
            err,
            QianfanError::RequestFailed {
                status: 200,
                code: Some(110),
                message: "Access token invalid or no longer valid".to_string(),
            }
        );
    }

    #[test]
    fn test_api_error_from_oauth_error() {
        let err = api_error_from_body(
            401,
            &json!({"error": "invalid_client", "error_description": "unknown client id"}),
        )
        .unwrap();
        assert!(err.to_string().contains("invalid_client: unknown client id"));
    }

    #[test]
    fn test_api_error_absent() {
        assert!(api_error_from_body(200, &json!({"result": "ok"})).is_none());
        assert!(api_error_from_body(200, &json!([1, 2])).is_none());
    }

    #[test]
    fn test_body_preview_truncates_on_char_boundary() {
        let body = "文".repeat(400);
        let preview = body_preview(body.as_bytes());
        assert!(preview.ends_with("..."));
        assert!(preview.len() <= 515);
    }
}
