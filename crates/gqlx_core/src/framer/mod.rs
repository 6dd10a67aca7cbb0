//! Renders a [`ResultVariant`] into a status, headers and a body.
//!
//! A [`Response`](crate::result::Response) becomes a single JSON document.
//! Streamed variants become a [`FrameStream`] that pulls one payload per
//! emitted frame:
//!
//! ```text
//! STREAMING -> (per item: SERIALIZE -> EMIT) -> ... -> CLOSE
//! ```
//!
//! Dropping the stream before `CLOSE` unsubscribes from the source.

mod json;
mod multipart;
mod sse;

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

use crate::result::{MultipartResponse, Push, ResultVariant};

pub use json::render_response;

/// A rendered response.
#[derive(Debug)]
pub struct FramedResponse {
    pub status: u16,
    /// Headers, in order. Names keep the case they were written with.
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl FramedResponse {
    /// Looks up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A rendered body.
#[derive(Debug)]
pub enum Body {
    /// The complete body.
    Full(Bytes),
    /// A body produced frame by frame.
    Stream(FrameStream),
}

impl Body {
    /// Collects the whole body.
    ///
    /// For a stream this waits until the source completes.
    pub async fn collect(self) -> Bytes {
        match self {
            Self::Full(bytes) => bytes,
            Self::Stream(stream) => {
                let frames: Vec<Bytes> = stream.collect().await;
                Bytes::from(frames.concat())
            }
        }
    }
}

/// Renders a result variant.
pub fn render(variant: ResultVariant) -> FramedResponse {
    match variant {
        ResultVariant::Response(response) => render_response(response),
        ResultVariant::MultipartResponse(source) => FramedResponse {
            status: 200,
            headers: multipart::headers(),
            body: Body::Stream(FrameStream::multipart(source)),
        },
        ResultVariant::Push(source) => FramedResponse {
            status: 200,
            headers: sse::headers(),
            body: Body::Stream(FrameStream::event_stream(source)),
        },
    }
}

/// UTF-8 byte length of a serialized body, as sent in `content-length`.
pub fn byte_length(body: &str) -> usize {
    body.len()
}

enum Source {
    Multipart(MultipartResponse),
    EventStream(Push),
}

impl Source {
    fn unsubscribe(&self) {
        match self {
            Self::Multipart(source) => source.unsubscribe(),
            Self::EventStream(source) => source.unsubscribe(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Opening,
    Streaming,
    Closing,
    Closed,
}

/// A streamed body, one frame per pulled payload.
pub struct FrameStream {
    source: Source,
    state: State,
}

impl FrameStream {
    fn multipart(source: MultipartResponse) -> Self {
        Self {
            source: Source::Multipart(source),
            state: State::Opening,
        }
    }

    fn event_stream(source: Push) -> Self {
        Self {
            source: Source::EventStream(source),
            state: State::Streaming,
        }
    }

    /// Returns true once the closing frame has been emitted.
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    fn poll_multipart(&mut self, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        let Source::Multipart(source) = &mut self.source else {
            return Poll::Ready(None);
        };
        match self.state {
            State::Opening => {
                self.state = State::Streaming;
                Poll::Ready(Some(Bytes::from_static(multipart::PROLOGUE)))
            }
            State::Streaming => match source.poll_next_unpin(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Some(Ok(patch))) => {
                    if !patch.has_next {
                        self.state = State::Closing;
                    }
                    let frame = match serialize(&patch) {
                        Ok(json) => multipart::part(&json, patch.has_next),
                        Err(message) => {
                            self.state = State::Closing;
                            multipart::error_part(&message)
                        }
                    };
                    Poll::Ready(Some(frame))
                }
                Poll::Ready(Some(Err(err))) => {
                    debug!(error = %err, "multipart source failed");
                    self.state = State::Closing;
                    Poll::Ready(Some(multipart::error_part(&err.to_string())))
                }
                Poll::Ready(None) => {
                    self.state = State::Closed;
                    Poll::Ready(Some(Bytes::from_static(multipart::EPILOGUE)))
                }
            },
            State::Closing => {
                self.state = State::Closed;
                Poll::Ready(Some(Bytes::from_static(multipart::EPILOGUE)))
            }
            State::Closed => Poll::Ready(None),
        }
    }

    fn poll_event_stream(&mut self, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        let Source::EventStream(source) = &mut self.source else {
            return Poll::Ready(None);
        };
        if self.state == State::Closed {
            return Poll::Ready(None);
        }
        match source.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(payload))) => match serialize(&payload) {
                Ok(json) => Poll::Ready(Some(sse::event(&json))),
                Err(message) => {
                    self.state = State::Closed;
                    Poll::Ready(Some(sse::error_event(&message)))
                }
            },
            Poll::Ready(Some(Err(err))) => {
                debug!(error = %err, "event stream source failed");
                self.state = State::Closed;
                Poll::Ready(Some(sse::error_event(&err.to_string())))
            }
            Poll::Ready(None) => {
                self.state = State::Closed;
                Poll::Ready(None)
            }
        }
    }
}

impl Stream for FrameStream {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        let this = self.get_mut();
        match this.source {
            Source::Multipart(_) => this.poll_multipart(cx),
            Source::EventStream(_) => this.poll_event_stream(cx),
        }
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        if self.state != State::Closed {
            debug!("response stream dropped before completion");
            self.source.unsubscribe();
        }
    }
}

impl fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            Source::Multipart(_) => "multipart",
            Source::EventStream(_) => "event-stream",
        };
        f.debug_struct("FrameStream")
            .field("kind", &kind)
            .field("state", &self.state)
            .finish()
    }
}

fn serialize<T: Serialize>(payload: &T) -> Result<String, String> {
    serde_json::to_string(payload).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::result::{ExecutionPatchResult, ExecutionResult, Response, StreamPayload};
    use crate::stream::PayloadStream;
    use futures::stream;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn body_text(framed: FramedResponse) -> String {
        String::from_utf8(framed.body.collect().await.to_vec()).unwrap()
    }

    #[test]
    fn test_byte_length_counts_utf8_bytes() {
        assert_eq!(byte_length("hi"), 2);
        assert_eq!(byte_length("é"), 2);
        assert_eq!(byte_length("😀"), 4);
    }

    #[tokio::test]
    async fn test_multipart_framing() {
        let patches = vec![
            Ok(ExecutionPatchResult::initial(ExecutionResult::data(json!({"a": 1})))),
            Ok(ExecutionPatchResult::deferred(vec![], json!({"b": 2}))),
        ];
        let variant = ResultVariant::MultipartResponse(PayloadStream::from_stream(stream::iter(patches)));

        let framed = render(variant);
        assert_eq!(framed.status, 200);
        assert_eq!(framed.header("content-type"), Some("multipart/mixed; boundary=\"-\""));
        assert_eq!(framed.header("transfer-encoding"), Some("chunked"));
        assert_eq!(framed.header("connection"), Some("keep-alive"));

        let first = r#"{"data":{"a":1},"hasNext":true}"#;
        let second = r#"{"data":{"b":2},"path":[],"hasNext":false}"#;
        let expected = format!(
            "---\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: {}\r\n\r\n{first}\r\n---\
             \r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: {}\r\n\r\n{second}\
             \r\n-----\r\n",
            first.len(),
            second.len(),
        );
        assert_eq!(body_text(framed).await, expected);
    }

    #[tokio::test]
    async fn test_multipart_source_error_closes_with_error_part() {
        let patches = vec![
            Ok(ExecutionPatchResult::initial(ExecutionResult::data(json!({})))),
            Err::<ExecutionPatchResult, BoxError>("engine exploded".into()),
        ];
        let framed = render(ResultVariant::MultipartResponse(PayloadStream::from_stream(
            stream::iter(patches),
        )));

        let body = body_text(framed).await;
        assert!(body.contains(r#"{"errors":[{"message":"engine exploded"}],"hasNext":false}"#));
        assert!(body.ends_with("\r\n-----\r\n"));
    }

    #[tokio::test]
    async fn test_event_stream_framing() {
        let events = vec![
            Ok(StreamPayload::from(ExecutionResult::data(json!({"count": 1})))),
            Ok(StreamPayload::from(ExecutionResult::data(json!({"count": 2})))),
        ];
        let framed = render(ResultVariant::Push(PayloadStream::from_stream(stream::iter(events))));

        assert_eq!(framed.header("content-type"), Some("text/event-stream"));
        assert_eq!(framed.header("cache-control"), Some("no-cache"));
        assert_eq!(
            body_text(framed).await,
            "data: {\"data\":{\"count\":1}}\n\ndata: {\"data\":{\"count\":2}}\n\n"
        );
    }

    #[tokio::test]
    async fn test_event_stream_source_error_emits_final_frame() {
        let events = vec![
            Ok(StreamPayload::from(ExecutionResult::data(json!({"count": 1})))),
            Err::<StreamPayload, BoxError>("lost connection to broker".into()),
            Ok(StreamPayload::from(ExecutionResult::data(json!({"count": 3})))),
        ];
        let framed = render(ResultVariant::Push(PayloadStream::from_stream(stream::iter(events))));

        assert_eq!(
            body_text(framed).await,
            "data: {\"data\":{\"count\":1}}\n\n\
             data: {\"errors\":[{\"message\":\"lost connection to broker\"}]}\n\n"
        );
    }

    #[tokio::test]
    async fn test_dropping_stream_unsubscribes_once() {
        struct Teardown(Arc<AtomicUsize>);
        impl Drop for Teardown {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let teardowns = Arc::new(AtomicUsize::new(0));
        let guard = Teardown(teardowns.clone());
        let events = stream::once(async {
            Ok::<_, BoxError>(StreamPayload::from(ExecutionResult::data(json!(1))))
        })
            .chain(stream::pending())
            .map(move |event| {
                let _ = &guard;
                event
            });

        let push: Push = PayloadStream::from_stream(events);
        let handle = push.unsubscribe_handle();
        let framed = render(ResultVariant::Push(push));

        let Body::Stream(mut frames) = framed.body else {
            panic!("expected a streamed body");
        };
        assert!(frames.next().await.is_some());
        drop(frames);

        assert!(handle.is_unsubscribed());
        handle.unsubscribe();
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_render_response_is_full_body() {
        let framed = render(Response::ok(ExecutionResult::data(json!({"ok": true}))).into());
        assert!(matches!(framed.body, Body::Full(_)));
        assert_eq!(body_text(framed).await, r#"{"data":{"ok":true}}"#);
    }
}
