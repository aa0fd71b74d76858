use crate::redact::redact_secrets;
use crate::state::TokenStoreError;
use serde_json::Value;
use thiserror::Error;

pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("request timed out")]
    TimedOut,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Error surfaced to API callers. Cloneable so a single refresh outcome
/// can be handed to every queued request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("{}", SESSION_EXPIRED_MESSAGE)]
    SessionExpired,
    #[error("{message}")]
    Http { status: u16, message: String },
    #[error("network error: {0}")]
    Transport(#[from] TransportError),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error(transparent)]
    Storage(#[from] TokenStoreError),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    pub(crate) fn decode(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(_) => non_empty(Some(item)),
                    Value::Object(obj) => non_empty(obj.get("message").or_else(|| obj.get("msg"))),
                    _ => None,
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Object(obj) => non_empty(obj.get("message")),
        _ => None,
    }
}

/// Picks a human-readable message out of the backend's error shapes.
pub fn normalize_error_message(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return GENERIC_ERROR_MESSAGE.to_string();
    };
    let Some(root) = json.as_object() else {
        return non_empty(Some(&json))
            .map(|m| redact_secrets(&m).into_owned())
            .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string());
    };

    ["message", "error", "errors", "detail"]
        .iter()
        .find_map(|key| non_empty(root.get(*key)))
        .map(|m| redact_secrets(&m).into_owned())
        .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string())
}
