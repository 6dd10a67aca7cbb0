//! Single-document JSON framing.

use bytes::Bytes;
use serde_json::json;
use tracing::warn;

use super::{byte_length, Body, FramedResponse};
use crate::result::Response;

const CONTENT_TYPE: &str = "content-type";
const CONTENT_LENGTH: &str = "content-length";

/// Renders a single-shot response.
///
/// Headers carried by the response override the defaults, except for
/// `content-length`, which always reflects the body.
pub fn render_response(response: Response) -> FramedResponse {
    let (status, body) = match serde_json::to_string(&response.payload) {
        Ok(body) => (response.status, body),
        Err(err) => {
            warn!(error = %err, "failed to serialize response payload");
            let body = json!({ "errors": [{ "message": err.to_string() }] }).to_string();
            (500, body)
        }
    };

    let mut headers = vec![(CONTENT_TYPE.to_string(), "application/json".to_string())];
    for (name, value) in response.headers {
        if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
            continue;
        }
        match headers.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(&name)) {
            Some(existing) => *existing = (name, value),
            None => headers.push((name, value)),
        }
    }
    headers.push((CONTENT_LENGTH.to_string(), byte_length(&body).to_string()));

    FramedResponse {
        status,
        headers,
        body: Body::Full(Bytes::from(body)),
    }
}
