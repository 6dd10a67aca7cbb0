//! Conversions between hyper messages and the dispatcher's types.

use bytes::Bytes;
use futures::StreamExt;
use gqlx_core::{
    Body, ExecutionResult, FramedResponse, GraphQLError, Request, Response, ResultVariant,
};
use http::request::Parts;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::{Method, StatusCode};
use std::convert::Infallible;
use tracing::{debug, error};

/// Body of every response the server writes.
pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// A complete body.
pub fn full<T: Into<Bytes>>(chunk: T) -> ResponseBody {
    Full::new(chunk.into()).boxed_unsync()
}

/// Builds the request descriptor from a hyper request head and its body.
///
/// The query string is decoded into parameters and `POST` bodies are
/// decoded as JSON. A body that is not JSON is answered right away.
pub fn extract_request(parts: &Parts, body: Bytes) -> Result<Request, ResultVariant> {
    let mut request = Request::new(parts.method.as_str());

    for (name, value) in &parts.headers {
        match value.to_str() {
            Ok(value) => request.headers.append(name.as_str(), value),
            Err(_) => debug!(header = %name, "skipping non-ASCII header value"),
        }
    }

    if let Some(query) = parts.uri.query() {
        let params: Vec<(String, String)> = serde_urlencoded::from_str(query)
            .map_err(|_| bad_request("Query string could not be decoded."))?;
        request.query.extend(params);
    }

    if parts.method == Method::POST && !body.is_empty() {
        let body = serde_json::from_slice(&body)
            .map_err(|_| bad_request("POST body sent invalid JSON."))?;
        request.body = Some(body);
    }

    Ok(request)
}

/// Converts a rendered response into a hyper response.
///
/// Streamed bodies are forwarded frame by frame. When hyper drops the body
/// because the client went away, the stream unsubscribes from its source.
pub fn into_hyper_response(framed: FramedResponse) -> hyper::Response<ResponseBody> {
    let body = match framed.body {
        Body::Full(bytes) => full(bytes),
        Body::Stream(frames) => {
            StreamBody::new(frames.map(|bytes| Ok::<_, Infallible>(Frame::data(bytes))))
                .boxed_unsync()
        }
    };

    let mut builder = hyper::Response::builder().status(framed.status);
    for (name, value) in &framed.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder.body(body).unwrap_or_else(|err| {
        error!(error = %err, "invalid response head");
        internal_error()
    })
}

fn bad_request(message: &str) -> ResultVariant {
    Response {
        status: StatusCode::BAD_REQUEST.as_u16(),
        headers: Vec::new(),
        payload: ExecutionResult::errors(vec![GraphQLError::new(message)]),
    }
    .into()
}

fn internal_error() -> hyper::Response<ResponseBody> {
    let mut response = hyper::Response::new(full(r#"{"errors":[{"message":"Internal Server Error"}]}"#));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
