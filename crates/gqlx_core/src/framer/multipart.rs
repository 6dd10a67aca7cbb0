//! `multipart/mixed` framing with the `-` boundary.

use bytes::Bytes;
use serde_json::json;

use super::byte_length;

pub(super) const PROLOGUE: &[u8] = b"---";
pub(super) const EPILOGUE: &[u8] = b"\r\n-----\r\n";

pub(super) fn headers() -> Vec<(String, String)> {
    vec![
        ("Connection".to_string(), "keep-alive".to_string()),
        (
            "Content-Type".to_string(),
            "multipart/mixed; boundary=\"-\"".to_string(),
        ),
        ("Transfer-Encoding".to_string(), "chunked".to_string()),
    ]
}

/// One part. A boundary follows when more parts are coming.
pub(super) fn part(json: &str, has_next: bool) -> Bytes {
    let mut part = format!(
        "\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: {}\r\n\r\n{json}",
        byte_length(json)
    );
    if has_next {
        part.push_str("\r\n---");
    }
    Bytes::from(part)
}

/// The terminal part reporting a source failure.
pub(super) fn error_part(message: &str) -> Bytes {
    let payload = json!({
        "errors": [{ "message": message }],
        "hasNext": false,
    });
    part(&payload.to_string(), false)
}
