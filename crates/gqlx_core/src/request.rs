//! The abstract HTTP request descriptor and GraphQL parameter extraction.
//!
//! Bindings build a [`Request`] from whatever their framework hands them:
//! the method, a header accessor, the already-decoded JSON body and the
//! query-string map. [`GraphQLParams::from_request`] then pulls the
//! GraphQL parameters out of it.

use async_graphql_parser::types::ExecutableDocument;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::protocol::Accept;

/// Ordered, case-insensitive header map.
///
/// Names are stored lower-cased; lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: IndexMap<String, Vec<String>>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first value of a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns every value of a header.
    pub fn get_all(&self, name: &str) -> impl Iterator<Item = &str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Sets a header, replacing any existing values.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(name.as_ref().to_ascii_lowercase(), vec![value.into()]);
    }

    /// Adds a header value, keeping existing ones.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .entry(name.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Returns true if the header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// A generic HTTP request, as seen by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// HTTP method, in whatever case the client sent it.
    pub method: String,
    pub headers: Headers,
    /// Decoded JSON body.
    pub body: Option<Value>,
    /// Decoded query-string parameters.
    pub query: IndexMap<String, String>,
}

impl Request {
    /// Creates a request with the given method.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Self::default()
        }
    }

    /// Creates a `GET` request.
    pub fn get() -> Self {
        Self::new("GET")
    }

    /// Creates a `POST` request with a JSON body.
    pub fn post(body: Value) -> Self {
        Self::new("POST").body(body)
    }

    /// Sets the body.
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a header.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Adds a query-string parameter.
    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Returns true if the method matches, ignoring case.
    pub fn is_method(&self, method: &str) -> bool {
        self.method.eq_ignore_ascii_case(method)
    }

    /// Media types listed across every `Accept` header.
    pub fn accept(&self) -> Accept {
        Accept::from_values(self.headers.get_all("accept"))
    }
}

/// The `query` parameter: raw source text or an already parsed document.
#[derive(Debug, Clone)]
pub enum GraphQLQuery {
    Source(String),
    Document(Arc<ExecutableDocument>),
}

impl From<String> for GraphQLQuery {
    fn from(source: String) -> Self {
        Self::Source(source)
    }
}

impl From<&str> for GraphQLQuery {
    fn from(source: &str) -> Self {
        Self::Source(source.to_string())
    }
}

impl From<ExecutableDocument> for GraphQLQuery {
    fn from(document: ExecutableDocument) -> Self {
        Self::Document(Arc::new(document))
    }
}

/// A JSON object parameter (`variables`, `extensions`) that may still be encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonParam {
    /// JSON text, decoded on demand.
    Raw(String),
    Map(Map<String, Value>),
    /// Any other JSON value, kept as sent.
    Other(Value),
}

impl JsonParam {
    /// Decodes the parameter into an object.
    ///
    /// `null` decodes to `None`; anything that is not an object is an error.
    pub fn decode(self) -> Result<Option<Map<String, Value>>, serde_json::Error> {
        match self {
            Self::Map(map) => Ok(Some(map)),
            Self::Raw(raw) => serde_json::from_str::<Option<Map<String, Value>>>(&raw),
            Self::Other(value) => serde_json::from_value::<Option<Map<String, Value>>>(value),
        }
    }

    /// Returns true for JSON text that still has to be decoded.
    pub fn is_encoded(&self) -> bool {
        matches!(self, Self::Raw(_))
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(raw) if raw.is_empty() => None,
            Value::String(raw) => Some(Self::Raw(raw)),
            Value::Object(map) => Some(Self::Map(map)),
            Value::Null => None,
            other => Some(Self::Other(other)),
        }
    }
}

/// GraphQL parameters extracted once per request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLParams {
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_query")]
    pub query: Option<GraphQLQuery>,
    #[serde(default, deserialize_with = "deserialize_json_param")]
    pub variables: Option<JsonParam>,
    #[serde(default, deserialize_with = "deserialize_json_param")]
    pub extensions: Option<JsonParam>,
}

impl GraphQLParams {
    /// Creates params holding only a query.
    pub fn query(query: impl Into<GraphQLQuery>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    /// Sets the operation name.
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Sets already decoded variables.
    pub fn variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Some(JsonParam::Map(variables));
        self
    }

    /// Sets JSON-encoded variables.
    pub fn raw_variables(mut self, variables: impl Into<String>) -> Self {
        self.variables = Some(JsonParam::Raw(variables.into()));
        self
    }

    /// Sets already decoded extensions.
    pub fn extensions(mut self, extensions: Map<String, Value>) -> Self {
        self.extensions = Some(JsonParam::Map(extensions));
        self
    }

    /// Extracts the parameters from a request.
    ///
    /// `GET` requests read the query string, `POST` requests the decoded
    /// body. Other methods yield empty parameters; the dispatcher rejects
    /// them before looking at the parameters.
    pub fn from_request(request: &Request) -> Self {
        if request.is_method("GET") {
            let param = |name: &str| request.query.get(name).cloned().map(Value::String);
            Self {
                operation_name: param("operationName").and_then(non_empty_string),
                query: param("query").and_then(query_source),
                variables: param("variables").and_then(JsonParam::from_value),
                extensions: param("extensions").and_then(JsonParam::from_value),
            }
        } else if request.is_method("POST") {
            let Some(Value::Object(body)) = &request.body else {
                return Self::default();
            };
            let field = |name: &str| body.get(name).cloned();
            Self {
                operation_name: field("operationName").and_then(non_empty_string),
                query: field("query").and_then(query_source),
                variables: field("variables").and_then(JsonParam::from_value),
                extensions: field("extensions").and_then(JsonParam::from_value),
            }
        } else {
            Self::default()
        }
    }
}

fn non_empty_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    }
}

// An empty query string is still a query: it fails to parse rather than
// counting as missing.
fn query_source(value: Value) -> Option<GraphQLQuery> {
    match value {
        Value::String(s) => Some(GraphQLQuery::Source(s)),
        _ => None,
    }
}

fn deserialize_query<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<GraphQLQuery>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(query_source))
}

fn deserialize_json_param<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<JsonParam>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(JsonParam::from_value))
}
