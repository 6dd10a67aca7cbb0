//! Error types for request processing.
//!
//! Every failure the dispatcher can run into is classified by an [`ErrorKind`]
//! and carried as a [`RequestError`], which knows the HTTP status, the extra
//! headers and the GraphQL `errors` entries of the response it turns into.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Boxed error returned by caller-supplied hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Typed classification of request processing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorKind {
    // Transport errors
    MethodNotAllowed,
    MissingQuery,

    // Document errors
    Syntax,
    Validation,
    UnknownOperation,

    // Input errors
    InvalidVariables,
    InvalidExtensions,

    // Engine errors
    Execution,
    Internal,
}

impl ErrorKind {
    /// Returns the string representation of the error kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::MissingQuery => "MISSING_QUERY",
            Self::Syntax => "SYNTAX",
            Self::Validation => "VALIDATION",
            Self::UnknownOperation => "UNKNOWN_OPERATION",
            Self::InvalidVariables => "INVALID_VARIABLES",
            Self::InvalidExtensions => "INVALID_EXTENSIONS",
            Self::Execution => "EXECUTION",
            Self::Internal => "INTERNAL",
        }
    }

    /// HTTP status a failure of this kind is answered with.
    pub const fn status(&self) -> u16 {
        match self {
            Self::MethodNotAllowed => 405,
            Self::MissingQuery
            | Self::Syntax
            | Self::Validation
            | Self::UnknownOperation
            | Self::InvalidVariables
            | Self::InvalidExtensions => 400,
            Self::Execution | Self::Internal => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub const fn is_client_error(&self) -> bool {
        matches!(self.status(), 400..=499)
    }

    /// Returns true if this is a server error (5xx).
    pub const fn is_server_error(&self) -> bool {
        matches!(self.status(), 500..=599)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source location inside a GraphQL document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl From<async_graphql_parser::Pos> for Location {
    fn from(pos: async_graphql_parser::Pos) -> Self {
        Self {
            line: pos.line,
            column: pos.column,
        }
    }
}

/// One segment of a response path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        Self::Field(s)
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        Self::Field(s.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

/// An entry of a GraphQL `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Map<String, serde_json::Value>>,
}

impl GraphQLError {
    /// Creates an error holding only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            extensions: None,
        }
    }

    /// Adds a source location.
    pub fn at(mut self, location: impl Into<Location>) -> Self {
        self.locations.push(location.into());
        self
    }

    /// Sets the response path.
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = Some(path);
        self
    }

    /// Adds extension data.
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.extensions
                .get_or_insert_with(serde_json::Map::new)
                .insert(key.into(), v);
        }
        self
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for GraphQLError {}

impl From<async_graphql_parser::Error> for GraphQLError {
    fn from(err: async_graphql_parser::Error) -> Self {
        let locations = err.positions().map(Location::from).collect();
        Self {
            message: format!("Syntax Error: {err}"),
            locations,
            path: None,
            extensions: None,
        }
    }
}

/// A failure that terminates request processing with a plain JSON response.
#[derive(Error, Debug, Clone)]
#[error("[{kind}] {}", .errors.first().map_or("", |e| e.message.as_str()))]
pub struct RequestError {
    /// Typed failure classification.
    pub kind: ErrorKind,
    /// HTTP status of the response.
    pub status: u16,
    /// Headers added to the response, in order.
    pub headers: Vec<(String, String)>,
    /// GraphQL errors placed in the response payload.
    pub errors: Vec<GraphQLError>,
}

impl RequestError {
    /// Creates an error with the kind's default status and a single message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: kind.status(),
            headers: Vec::new(),
            errors: vec![GraphQLError::new(message)],
        }
    }

    /// Creates an error from a list of GraphQL errors.
    pub fn from_errors(kind: ErrorKind, errors: Vec<GraphQLError>) -> Self {
        Self {
            kind,
            status: kind.status(),
            headers: Vec::new(),
            errors,
        }
    }

    /// Overrides the HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Adds a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The wrong HTTP verb was used.
    pub fn method_not_allowed(message: impl Into<String>, allow: impl Into<String>) -> Self {
        Self::new(ErrorKind::MethodNotAllowed, message).with_header("Allow", allow)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Converts an error returned by a hook.
    ///
    /// A `RequestError` keeps its status, headers and errors; a bare
    /// `GraphQLError` keeps its locations; anything else becomes a 500
    /// with the error's message.
    pub fn from_hook(err: BoxError, kind: ErrorKind) -> Self {
        match err.downcast::<RequestError>() {
            Ok(err) => *err,
            Err(err) => match err.downcast::<GraphQLError>() {
                Ok(err) => Self::from_errors(kind, vec![*err]),
                Err(err) => Self::new(kind, err.to_string()),
            },
        }
    }
}

/// Type alias for processing results.
pub type RequestResult<T> = std::result::Result<T, RequestError>;
