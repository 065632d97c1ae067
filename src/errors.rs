use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse classification surfaced to the presentation layer.
///
/// Retryable kinds get a retry affordance, `Client` gets a static message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Server,
    Client,
}

/// Every failure the query layer hands to its callers.
///
/// `Clone` because deduplicated requests resolve every waiting caller with
/// the same error value.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Client error ({status}): {message}")]
    Client { status: u16, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Classifies an HTTP status with the message the server sent along.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            422 => ApiError::Validation(message),
            400..=499 => ApiError::Client { status, message },
            _ => ApiError::Server { status, message },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_) | ApiError::Timeout(_) | ApiError::Server { .. }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network(_) | ApiError::Timeout(_) => ErrorKind::Network,
            ApiError::Server { .. } => ErrorKind::Server,
            ApiError::Client { .. } | ApiError::Validation(_) | ApiError::Decode(_) => {
                ErrorKind::Client
            }
        }
    }

    /// HTTP status when the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } | ApiError::Client { status, .. } => Some(*status),
            ApiError::Validation(_) => Some(422),
            _ => None,
        }
    }

    /// Text shown next to an empty table when a fetch fails.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network(_) | ApiError::Timeout(_) => {
                "The forecast service could not be reached. Retry in a moment.".to_string()
            }
            ApiError::Server { .. } => {
                "The forecast service failed to answer. Retry in a moment.".to_string()
            }
            ApiError::Client { message, .. } | ApiError::Validation(message) => message.clone(),
            ApiError::Decode(_) => "The forecast service sent an unreadable response.".to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

/// Error payload shapes the forecast backend is known to send.
///
/// FastAPI style `{"detail": "..."}` or `{"detail": [{"msg": "..."}]}`, or a
/// plain `{"message": "..."}`.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn message(&self) -> Option<String> {
        if let Some(detail) = &self.detail {
            match detail {
                Value::String(s) => return Some(s.clone()),
                Value::Array(items) => {
                    let msgs: Vec<String> = items
                        .iter()
                        .filter_map(|item| match item {
                            Value::String(s) => Some(s.clone()),
                            other => other.get("msg").and_then(Value::as_str).map(str::to_string),
                        })
                        .collect();
                    if !msgs.is_empty() {
                        return Some(msgs.join("; "));
                    }
                }
                _ => {}
            }
        }
        self.message.clone()
    }
}

/// Extracts the most useful message from an error response body.
pub fn message_from_body(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message())
        .unwrap_or_else(|| body.trim().to_string())
}
