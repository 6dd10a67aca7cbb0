//! Execution results and the three-way result variant of a request.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GraphQLError, PathSegment, RequestError};
use crate::stream::PayloadStream;

/// A complete GraphQL result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<GraphQLError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl ExecutionResult {
    /// Creates a result holding data.
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Creates a result holding only errors.
    pub fn errors(errors: Vec<GraphQLError>) -> Self {
        Self {
            errors: Some(errors),
            ..Self::default()
        }
    }

    /// Returns true if the result carries errors.
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|errors| !errors.is_empty())
    }
}

impl From<RequestError> for ExecutionResult {
    fn from(err: RequestError) -> Self {
        Self::errors(err.errors)
    }
}

/// One part of an incremental delivery session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPatchResult {
    #[serde(flatten)]
    pub result: ExecutionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// `false` marks the terminal patch.
    pub has_next: bool,
}

impl ExecutionPatchResult {
    /// The initial part: a complete result with more parts to follow.
    pub fn initial(result: ExecutionResult) -> Self {
        Self {
            result,
            has_next: true,
            ..Self::default()
        }
    }

    /// A deferred part merged at `path`.
    pub fn deferred(path: Vec<PathSegment>, data: Value) -> Self {
        Self {
            result: ExecutionResult::data(data),
            path: Some(path),
            ..Self::default()
        }
    }

    /// Sets the label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets whether more parts follow.
    pub fn has_next(mut self, has_next: bool) -> Self {
        self.has_next = has_next;
        self
    }
}

/// A payload pushed over an event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamPayload {
    Patch(ExecutionPatchResult),
    Result(ExecutionResult),
}

impl From<ExecutionResult> for StreamPayload {
    fn from(result: ExecutionResult) -> Self {
        Self::Result(result)
    }
}

impl From<ExecutionPatchResult> for StreamPayload {
    fn from(patch: ExecutionPatchResult) -> Self {
        Self::Patch(patch)
    }
}

/// A terminal, single-shot response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    /// Response headers, in order.
    pub headers: Vec<(String, String)>,
    pub payload: ExecutionResult,
}

impl Response {
    /// A `200` response.
    pub fn ok(payload: ExecutionResult) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            payload,
        }
    }
}

/// An open incremental delivery session (`@defer` / `@stream`).
pub type MultipartResponse = PayloadStream<ExecutionPatchResult>;

/// An open event stream (subscriptions, or incremental delivery over SSE).
pub type Push = PayloadStream<StreamPayload>;

/// The outcome of processing one request.
///
/// Exactly one variant is produced per request.
#[derive(Debug)]
pub enum ResultVariant {
    Response(Response),
    MultipartResponse(MultipartResponse),
    Push(Push),
}

impl ResultVariant {
    /// Returns the response if this is the single-shot variant.
    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Self::Response(response) => Some(response),
            _ => None,
        }
    }

    /// Stops the underlying stream of a streamed variant. Idempotent.
    pub fn unsubscribe(&self) {
        match self {
            Self::Response(_) => {}
            Self::MultipartResponse(stream) => stream.unsubscribe(),
            Self::Push(stream) => stream.unsubscribe(),
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self, Self::MultipartResponse(_))
    }

    pub fn is_push(&self) -> bool {
        matches!(self, Self::Push(_))
    }
}

impl From<Response> for ResultVariant {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}
