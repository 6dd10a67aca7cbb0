//! `text/event-stream` framing.

use bytes::Bytes;
use serde_json::json;

pub(super) fn headers() -> Vec<(String, String)> {
    vec![
        ("Content-Type".to_string(), "text/event-stream".to_string()),
        ("Connection".to_string(), "keep-alive".to_string()),
        ("Cache-Control".to_string(), "no-cache".to_string()),
    ]
}

pub(super) fn event(json: &str) -> Bytes {
    Bytes::from(format!("data: {json}\n\n"))
}

/// The last event of a stream whose source failed.
pub(super) fn error_event(message: &str) -> Bytes {
    event(&json!({ "errors": [{ "message": message }] }).to_string())
}
