use serde_json::Value;

/// Errors raised while talking to the MailForge backend or validating
/// user input before a request is made.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response. `message` is the `detail`/`error` field of the body
    /// when the body could be parsed.
    #[error("{}", status_text(.status, .message))]
    Status { status: u16, message: Option<String> },

    /// 401/403 on an authenticated call. Handled globally by sending the
    /// user back to the login screen.
    #[error("Session expired, please sign in again")]
    Unauthorized,

    #[error("Unexpected response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

fn status_text(status: &u16, message: &Option<String>) -> String {
    match message {
        Some(m) => m.clone(),
        None => format!("An unknown error occurred (status: {})", status),
    }
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// Message for inline display. Backend-provided and client-side messages
    /// win; anything else collapses into `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ApiError::Status {
                message: Some(m), ..
            } => m.clone(),
            ApiError::Validation(m) => m.clone(),
            _ => fallback.to_string(),
        }
    }
}

/// Pull a human-readable message out of an error body shaped like
/// `{"detail": "..."}`, `{"detail": [{"msg": "..."}]}` or `{"error": "..."}`.
pub fn message_from_body(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;

    match value.get("detail") {
        Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
        Some(Value::Array(items)) => {
            let msgs: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if !msgs.is_empty() {
                return Some(msgs.join("; "));
            }
        }
        _ => {}
    }

    value
        .get("error")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_string_wins() {
        let body = br#"{"detail": "Dataset 7 not found", "error": "ignored"}"#;
        assert_eq!(message_from_body(body).as_deref(), Some("Dataset 7 not found"));
    }

    #[test]
    fn test_detail_validation_list_is_joined() {
        let body = br#"{"detail": [{"msg": "field required"}, {"msg": "too short"}]}"#;
        assert_eq!(
            message_from_body(body).as_deref(),
            Some("field required; too short")
        );
    }

    #[test]
    fn test_error_field_is_used_without_detail() {
        let body = br#"{"error": "Invalid email column"}"#;
        assert_eq!(message_from_body(body).as_deref(), Some("Invalid email column"));
    }

    #[test]
    fn test_unparseable_body_gives_generic_status_message() {
        assert_eq!(message_from_body(b"<html>502</html>"), None);
        let err = ApiError::Status {
            status: 502,
            message: None,
        };
        assert_eq!(err.to_string(), "An unknown error occurred (status: 502)");
        assert_eq!(err.user_message("Upload failed"), "Upload failed");
    }

    #[test]
    fn test_user_message_prefers_backend_detail() {
        let err = ApiError::Status {
            status: 400,
            message: Some("Invalid SendGrid API key".into()),
        };
        assert_eq!(
            err.user_message("Could not connect SendGrid"),
            "Invalid SendGrid API key"
        );
        assert!(!err.is_unauthorized());
        assert!(ApiError::Unauthorized.is_unauthorized());
    }
}
