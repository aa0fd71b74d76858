//! Typed wrappers over the booking backend's REST endpoints.

pub mod auth;
pub mod bookings;
pub mod customs;
pub mod discounts;

pub use bookings::{BookingBook, BookingFilter, FetchOptions};

use crate::http::{ApiError, TransportError};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub(crate) fn encode_body(err: serde_json::Error) -> ApiError {
    TransportError::Serialization(err.to_string()).into()
}

/// Percent-encodes one path segment.
pub(crate) fn segment(value: &str) -> String {
    urlencoding::encode(value.trim()).into_owned()
}

/// Accepts both bare payloads and `{ "data": ... }` style envelopes.
pub(crate) fn from_envelope<T: DeserializeOwned>(value: Value, keys: &[&str]) -> Result<T, ApiError> {
    let inner = match value {
        Value::Object(mut map) => match keys.iter().find_map(|key| map.remove(*key)) {
            Some(inner) => inner,
            None => Value::Object(map),
        },
        other => other,
    };
    serde_json::from_value(inner).map_err(ApiError::decode)
}
