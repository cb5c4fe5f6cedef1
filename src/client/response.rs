//! Upstream response envelopes, shape normalization, and error decoding.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::Error;
use crate::types::{Document, ReportColumn};

/// Resource endpoints wrap their payload in a `data` field.
#[derive(Deserialize)]
pub(crate) struct DataEnvelope<T> {
    pub data: T,
}

/// Method endpoints wrap their payload in a `message` field.
#[derive(Deserialize)]
pub(crate) struct MessageEnvelope<T> {
    pub message: T,
}

/// Listing/search responses arrive under either top-level field, as an
/// array or a bare object, depending on which endpoint served the request.
#[derive(Default, Deserialize)]
pub(crate) struct ListEnvelope {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
}

impl ListEnvelope {
    /// Normalize both envelope fields and both payload shapes into one
    /// ordered document sequence.
    pub fn into_documents(self) -> Vec<Document> {
        let source = match (self.data, self.message) {
            (Some(data), _) if !data.is_null() => data,
            (_, Some(message)) if !message.is_null() => message,
            _ => return Vec::new(),
        };

        match source {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            Value::Object(map) => vec![map],
            _ => Vec::new(),
        }
    }
}

/// Payload of the report runner.
#[derive(Default, Deserialize)]
pub(crate) struct ReportPayload {
    #[serde(default)]
    pub columns: Vec<ReportColumn>,
    #[serde(default)]
    pub result: Vec<Vec<Value>>,
}

/// Wire shape of an upstream error body.
#[derive(Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    exc: Option<String>,
}

/// Decode a 4xx/5xx body into a structured upstream error, falling back to
/// the raw body text when it is not the expected JSON shape.
pub(crate) fn decode_error(status: u16, body: &str, retry_after: Option<Duration>) -> Error {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = if parsed.message.is_empty() {
        body.to_string()
    } else {
        parsed.message
    };
    Error::Upstream {
        status,
        message,
        exc: parsed.exc,
        retry_after,
    }
}

/// Structured retry-after signal from the `Retry-After` header, seconds
/// form only.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
