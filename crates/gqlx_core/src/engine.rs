//! The pluggable GraphQL engine.
//!
//! The dispatcher never parses, validates or executes by itself: it calls
//! the four functions held by an [`Engine`]. Each one can be replaced on
//! its own; `parse` and `validate` have working defaults, `execute` has to
//! be supplied because no execution engine is bundled.

use async_graphql_parser::types::ExecutableDocument;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::context::{Context, SelectedOperation};
use crate::error::{BoxError, GraphQLError};
use crate::result::{ExecutionPatchResult, ExecutionResult};
use crate::validation::{self, ValidationRule};

/// Stream of incremental delivery parts returned by `execute`.
pub type PatchStream = BoxStream<'static, Result<ExecutionPatchResult, BoxError>>;

/// Stream of subscription events returned by `subscribe`.
pub type ResultStream = BoxStream<'static, Result<ExecutionResult, BoxError>>;

/// What `execute` produced.
pub enum ExecutionOutcome {
    /// A complete result.
    Single(ExecutionResult),
    /// An initial result followed by patches (`@defer` / `@stream`).
    Incremental(PatchStream),
}

impl ExecutionOutcome {
    /// Wraps any stream of patches.
    pub fn incremental<S>(patches: S) -> Self
    where
        S: Stream<Item = Result<ExecutionPatchResult, BoxError>> + Send + 'static,
    {
        Self::Incremental(patches.boxed())
    }
}

impl From<ExecutionResult> for ExecutionOutcome {
    fn from(result: ExecutionResult) -> Self {
        Self::Single(result)
    }
}

impl fmt::Debug for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(result) => f.debug_tuple("Single").field(result).finish(),
            Self::Incremental(_) => f.write_str("Incremental(..)"),
        }
    }
}

/// What `subscribe` produced.
pub enum SubscriptionOutcome {
    /// The event stream.
    Stream(ResultStream),
    /// A subscribe-time error (or any single result).
    Single(ExecutionResult),
}

impl SubscriptionOutcome {
    /// Wraps any stream of events.
    pub fn stream<S>(events: S) -> Self
    where
        S: Stream<Item = Result<ExecutionResult, BoxError>> + Send + 'static,
    {
        Self::Stream(events.boxed())
    }
}

impl From<ExecutionResult> for SubscriptionOutcome {
    fn from(result: ExecutionResult) -> Self {
        Self::Single(result)
    }
}

impl fmt::Debug for SubscriptionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(result) => f.debug_tuple("Single").field(result).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Inputs of `execute` and `subscribe`.
pub struct ExecutionArgs<S> {
    pub schema: Arc<S>,
    pub document: Arc<ExecutableDocument>,
    pub operation: Arc<SelectedOperation>,
    /// Coerced variables; empty when none were sent.
    pub variables: Map<String, Value>,
    pub extensions: Option<Map<String, Value>>,
    pub context: Arc<Context>,
    pub root_value: Arc<Value>,
}

impl<S> Clone for ExecutionArgs<S> {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            document: self.document.clone(),
            operation: self.operation.clone(),
            variables: self.variables.clone(),
            extensions: self.extensions.clone(),
            context: self.context.clone(),
            root_value: self.root_value.clone(),
        }
    }
}

/// Parse function type.
pub type ParseFn = Arc<
    dyn Fn(String) -> BoxFuture<'static, Result<ExecutableDocument, GraphQLError>> + Send + Sync,
>;

/// Validate function type.
pub type ValidateFn<S> =
    Arc<dyn Fn(&S, &ExecutableDocument, &[ValidationRule<S>]) -> Vec<GraphQLError> + Send + Sync>;

/// Execute function type.
pub type ExecuteFn<S> = Arc<
    dyn Fn(ExecutionArgs<S>) -> BoxFuture<'static, Result<ExecutionOutcome, BoxError>>
        + Send
        + Sync,
>;

/// Subscribe function type.
pub type SubscribeFn<S> = Arc<
    dyn Fn(ExecutionArgs<S>) -> BoxFuture<'static, Result<SubscriptionOutcome, BoxError>>
        + Send
        + Sync,
>;

/// The four engine functions.
pub struct Engine<S> {
    pub(crate) parse: ParseFn,
    pub(crate) validate: ValidateFn<S>,
    pub(crate) execute: ExecuteFn<S>,
    pub(crate) subscribe: SubscribeFn<S>,
}

impl<S: Send + Sync + 'static> Engine<S> {
    /// Creates an engine around an execute function, with default
    /// `parse`, `validate` and `subscribe`.
    pub fn new<F, Fut>(execute: F) -> Self
    where
        F: Fn(ExecutionArgs<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ExecutionOutcome, BoxError>> + Send + 'static,
    {
        Self {
            parse: Arc::new(|source: String| async move { default_parse(&source) }.boxed()),
            validate: Arc::new(validation::validate::<S>),
            execute: Arc::new(move |args: ExecutionArgs<S>| execute(args).boxed()),
            subscribe: Arc::new(|_: ExecutionArgs<S>| {
                async { Ok::<_, BoxError>(subscriptions_unsupported()) }.boxed()
            }),
        }
    }

    /// Replaces `parse`.
    #[must_use]
    pub fn parse<F, Fut>(mut self, parse: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ExecutableDocument, GraphQLError>> + Send + 'static,
    {
        self.parse = Arc::new(move |source: String| parse(source).boxed());
        self
    }

    /// Replaces `validate`.
    #[must_use]
    pub fn validate<F>(mut self, validate: F) -> Self
    where
        F: Fn(&S, &ExecutableDocument, &[ValidationRule<S>]) -> Vec<GraphQLError>
            + Send
            + Sync
            + 'static,
    {
        self.validate = Arc::new(validate);
        self
    }

    /// Replaces `subscribe`.
    #[must_use]
    pub fn subscribe<F, Fut>(mut self, subscribe: F) -> Self
    where
        F: Fn(ExecutionArgs<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SubscriptionOutcome, BoxError>> + Send + 'static,
    {
        self.subscribe = Arc::new(move |args: ExecutionArgs<S>| subscribe(args).boxed());
        self
    }
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            parse: self.parse.clone(),
            validate: self.validate.clone(),
            execute: self.execute.clone(),
            subscribe: self.subscribe.clone(),
        }
    }
}

impl<S> fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

/// Default `parse`: the async-graphql parser.
pub fn default_parse(source: &str) -> Result<ExecutableDocument, GraphQLError> {
    async_graphql_parser::parse_query(source).map_err(GraphQLError::from)
}

fn subscriptions_unsupported() -> SubscriptionOutcome {
    SubscriptionOutcome::Single(ExecutionResult::errors(vec![GraphQLError::new(
        "Subscriptions are not supported by this engine.",
    )]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parse() {
        let document = default_parse("query Q { a }").unwrap();
        assert_eq!(document.operations.iter().count(), 1);

        let err = default_parse("{ a").unwrap_err();
        assert!(err.message.starts_with("Syntax Error:"));
        assert!(!err.locations.is_empty());
    }

    #[tokio::test]
    async fn test_default_subscribe_reports_error() {
        let engine = Engine::<()>::new(|_| async { Ok(ExecutionResult::default().into()) });
        let document = Arc::new(default_parse("subscription { tick }").unwrap());
        let operation = crate::context::select_operation(&document, None).unwrap();

        let args = ExecutionArgs {
            schema: Arc::new(()),
            document,
            operation: Arc::new(operation),
            variables: Map::new(),
            extensions: None,
            context: Arc::new(Context::new()),
            root_value: Arc::new(Value::Null),
        };

        match (engine.subscribe)(args).await.unwrap() {
            SubscriptionOutcome::Single(result) => assert!(result.has_errors()),
            SubscriptionOutcome::Stream(_) => panic!("expected a single result"),
        }
    }
}
