//! Request classification and dispatch.
//!
//! [`Processor::process_request`] turns one [`Request`] into exactly one
//! [`ResultVariant`]. Every failure along the way becomes a JSON
//! [`Response`] with the matching status; processing itself never fails.

use async_graphql_parser::types::ExecutableDocument;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::context::{select_operation, Context, ExecutionContext, OperationKind, SelectedOperation};
use crate::engine::{
    Engine, ExecutionArgs, ExecutionOutcome, PatchStream, SubscriptionOutcome,
};
use crate::error::{BoxError, ErrorKind, GraphQLError, RequestError, RequestResult};
use crate::protocol::{Accept, ResponseProtocol};
use crate::request::{GraphQLParams, GraphQLQuery, JsonParam, Request};
use crate::result::{
    ExecutionPatchResult, ExecutionResult, MultipartResponse, Push, Response, ResultVariant,
    StreamPayload,
};
use crate::validation::{self, ValidationRule};

/// Builds the request-scoped [`Context`].
pub type ContextFactory =
    Arc<dyn Fn(ExecutionContext) -> BoxFuture<'static, Result<Context, BoxError>> + Send + Sync>;

/// Builds the root value handed to the engine.
pub type RootValueFactory =
    Arc<dyn Fn(ExecutionContext) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// Transforms every payload before it is sent.
pub type FormatPayload = Arc<dyn Fn(&mut ExecutionResult, &FormatContext) + Send + Sync>;

/// What is known about a request when a payload is formatted.
///
/// Fields are `None` when processing stopped before they were built.
#[derive(Debug, Clone, Default)]
pub struct FormatContext {
    pub context: Option<Arc<Context>>,
    pub root_value: Option<Arc<Value>>,
    pub document: Option<Arc<ExecutableDocument>>,
    pub operation: Option<Arc<SelectedOperation>>,
}

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// HTTP methods subscriptions may use.
    pub allowed_subscription_http_methods: Vec<String>,
    /// Maximum field nesting, unchecked when `None`.
    pub max_depth: Option<usize>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self {
            allowed_subscription_http_methods: vec!["GET".to_string()],
            max_depth: None,
        }
    }

    /// Replaces the HTTP methods subscriptions may use.
    pub fn allowed_subscription_http_methods<I, M>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        self.allowed_subscription_http_methods = methods.into_iter().map(Into::into).collect();
        self
    }

    /// Allows one more HTTP method for subscriptions.
    pub fn allow_subscription_method(mut self, method: impl Into<String>) -> Self {
        self.allowed_subscription_http_methods.push(method.into());
        self
    }

    /// Sets the maximum field nesting.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }
}

/// Dispatches GraphQL requests against a schema.
///
/// Shared across requests; cloning is cheap.
pub struct Processor<S> {
    schema: Arc<S>,
    engine: Engine<S>,
    context_factory: Option<ContextFactory>,
    root_value_factory: Option<RootValueFactory>,
    format_payload: Option<FormatPayload>,
    validation_rules: Arc<[ValidationRule<S>]>,
    config: ProcessorConfig,
}

impl<S> Clone for Processor<S> {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            engine: self.engine.clone(),
            context_factory: self.context_factory.clone(),
            root_value_factory: self.root_value_factory.clone(),
            format_payload: self.format_payload.clone(),
            validation_rules: self.validation_rules.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> fmt::Debug for Processor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("validation_rules", &self.validation_rules.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Processor`].
pub struct ProcessorBuilder<S> {
    schema: Arc<S>,
    engine: Engine<S>,
    context_factory: Option<ContextFactory>,
    root_value_factory: Option<RootValueFactory>,
    format_payload: Option<FormatPayload>,
    validation_rules: Option<Vec<ValidationRule<S>>>,
    config: ProcessorConfig,
}

impl<S: Send + Sync + 'static> Processor<S> {
    /// Starts a processor around a schema and an execute function.
    pub fn builder<F, Fut>(schema: S, execute: F) -> ProcessorBuilder<S>
    where
        F: Fn(ExecutionArgs<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ExecutionOutcome, BoxError>> + Send + 'static,
    {
        Self::with_engine(schema, Engine::new(execute))
    }

    /// Starts a processor around a schema and a complete engine.
    pub fn with_engine(schema: S, engine: Engine<S>) -> ProcessorBuilder<S> {
        ProcessorBuilder {
            schema: Arc::new(schema),
            engine,
            context_factory: None,
            root_value_factory: None,
            format_payload: None,
            validation_rules: None,
            config: ProcessorConfig::default(),
        }
    }

    pub fn schema(&self) -> &Arc<S> {
        &self.schema
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Processes one request.
    pub async fn process_request(&self, request: &Request, params: GraphQLParams) -> ResultVariant {
        let mut format = FormatContext::default();
        let dispatched = AssertUnwindSafe(self.dispatch(request, params, &mut format))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(RequestError::internal(panic_message(&*panic))));
        match dispatched {
            Ok(variant) => variant,
            Err(err) => {
                if err.kind.is_server_error() {
                    warn!(status = err.status, error = %err, "GraphQL request failed");
                } else {
                    debug!(status = err.status, error = %err, "GraphQL request rejected");
                }
                self.error_response(err, &format)
            }
        }
    }

    async fn dispatch(
        &self,
        request: &Request,
        params: GraphQLParams,
        format: &mut FormatContext,
    ) -> RequestResult<ResultVariant> {
        debug!(method = %request.method, "processing GraphQL request");

        if !request.is_method("GET") && !request.is_method("POST") {
            return Err(RequestError::method_not_allowed(
                "GraphQL only supports GET and POST requests.",
                "GET, POST",
            ));
        }

        let document = match params.query {
            None => {
                return Err(RequestError::new(
                    ErrorKind::MissingQuery,
                    "Must provide query string.",
                ))
            }
            Some(GraphQLQuery::Document(document)) => document,
            Some(GraphQLQuery::Source(source)) => {
                let document = (self.engine.parse)(source)
                    .await
                    .map_err(|err| RequestError::from_errors(ErrorKind::Syntax, vec![err]))?;
                Arc::new(document)
            }
        };
        format.document = Some(document.clone());

        let errors = (self.engine.validate)(
            self.schema.as_ref(),
            document.as_ref(),
            &self.validation_rules[..],
        );
        if !errors.is_empty() {
            debug!(count = errors.len(), "document failed validation");
            return Err(RequestError::from_errors(ErrorKind::Validation, errors));
        }

        let operation = select_operation(&document, params.operation_name.as_deref())
            .map(Arc::new)
            .ok_or_else(|| {
                RequestError::new(
                    ErrorKind::UnknownOperation,
                    "Could not determine what operation to execute.",
                )
            })?;
        format.operation = Some(operation.clone());
        debug!(name = ?operation.name, kind = %operation.kind, "selected operation");

        match operation.kind {
            OperationKind::Mutation if request.is_method("GET") => {
                return Err(RequestError::method_not_allowed(
                    "Can only perform a mutation operation from a POST request.",
                    "POST",
                ));
            }
            OperationKind::Subscription => self.check_subscription_method(request)?,
            _ => {}
        }

        let variables = decode_param(params.variables, ErrorKind::InvalidVariables, "Variables")?;
        let extensions = decode_param(params.extensions, ErrorKind::InvalidExtensions, "Extensions")?;

        let execution_context = ExecutionContext {
            request: Arc::new(request.clone()),
            document: document.clone(),
            operation: operation.clone(),
            variables: variables.clone().map(Arc::new),
        };

        let context = match &self.context_factory {
            Some(factory) => factory(execution_context.clone())
                .await
                .map_err(|err| RequestError::from_hook(err, ErrorKind::Internal))?,
            None => Context::new(),
        };
        let context = Arc::new(context);
        format.context = Some(context.clone());

        let root_value = match &self.root_value_factory {
            Some(factory) => factory(execution_context)
                .await
                .map_err(|err| RequestError::from_hook(err, ErrorKind::Internal))?,
            None => Value::Object(Map::new()),
        };
        let root_value = Arc::new(root_value);
        format.root_value = Some(root_value.clone());

        let args = ExecutionArgs {
            schema: self.schema.clone(),
            document,
            operation: operation.clone(),
            variables: variables.unwrap_or_default(),
            extensions,
            context,
            root_value,
        };
        let accept = request.accept();

        if operation.kind == OperationKind::Subscription {
            let outcome = (self.engine.subscribe)(args)
                .await
                .map_err(|err| RequestError::from_hook(err, ErrorKind::Execution))?;
            Ok(self.subscription_variant(outcome, &accept, format.clone()))
        } else {
            let outcome = (self.engine.execute)(args)
                .await
                .map_err(|err| RequestError::from_hook(err, ErrorKind::Execution))?;
            Ok(self.execution_variant(outcome, &accept, format.clone()))
        }
    }

    fn check_subscription_method(&self, request: &Request) -> RequestResult<()> {
        let allowed = &self.config.allowed_subscription_http_methods;
        if allowed.iter().any(|method| request.is_method(method)) {
            return Ok(());
        }
        if allowed.is_empty() {
            return Err(RequestError::new(
                ErrorKind::MethodNotAllowed,
                "Subscription operations are not allowed over HTTP.",
            ));
        }
        Err(RequestError::method_not_allowed(
            format!(
                "Can only perform a subscription operation from a {} request.",
                allowed.join(" or ")
            ),
            allowed.join(", "),
        ))
    }

    fn subscription_variant(
        &self,
        outcome: SubscriptionOutcome,
        accept: &Accept,
        format: FormatContext,
    ) -> ResultVariant {
        let formatter = self.formatter(format);
        match outcome {
            SubscriptionOutcome::Stream(events) => {
                debug!("streaming subscription events");
                let events = until_failure(events, |err| {
                    ExecutionResult::errors(RequestError::from_hook(err, ErrorKind::Execution).errors)
                });
                ResultVariant::Push(Push::from_stream(events.map(move |event| {
                    event.map(|mut result| {
                        formatter(&mut result);
                        StreamPayload::Result(result)
                    })
                })))
            }
            SubscriptionOutcome::Single(mut result) => {
                formatter(&mut result);
                match accept.subscription_protocol() {
                    ResponseProtocol::Json => Response::ok(result).into(),
                    _ => ResultVariant::Push(Push::once(result.into())),
                }
            }
        }
    }

    fn execution_variant(
        &self,
        outcome: ExecutionOutcome,
        accept: &Accept,
        format: FormatContext,
    ) -> ResultVariant {
        let formatter = self.formatter(format);
        match outcome {
            ExecutionOutcome::Single(mut result) => {
                formatter(&mut result);
                Response::ok(result).into()
            }
            ExecutionOutcome::Incremental(patches) => {
                let patches = until_failure(until_last_patch(patches), |err| {
                    let errors = RequestError::from_hook(err, ErrorKind::Execution).errors;
                    ExecutionPatchResult::initial(ExecutionResult::errors(errors)).has_next(false)
                });
                let patches = patches.map(move |patch| {
                    patch.map(|mut patch| {
                        formatter(&mut patch.result);
                        patch
                    })
                });
                match accept.streaming_protocol() {
                    ResponseProtocol::EventStream => {
                        debug!("streaming incremental results as events");
                        ResultVariant::Push(Push::from_stream(
                            patches.map(|patch| patch.map(StreamPayload::Patch)),
                        ))
                    }
                    _ => {
                        debug!("streaming incremental results as multipart");
                        ResultVariant::MultipartResponse(MultipartResponse::from_stream(patches))
                    }
                }
            }
        }
    }

    fn error_response(&self, err: RequestError, format: &FormatContext) -> ResultVariant {
        let mut payload = ExecutionResult::errors(err.errors);
        self.formatter(format.clone())(&mut payload);
        Response {
            status: err.status,
            headers: err.headers,
            payload,
        }
        .into()
    }

    fn formatter(&self, format: FormatContext) -> impl Fn(&mut ExecutionResult) + Send + Sync + 'static {
        let hook = self.format_payload.clone();
        move |result: &mut ExecutionResult| {
            if let Some(hook) = &hook {
                hook(result, &format);
            }
        }
    }
}

impl<S: Send + Sync + 'static> ProcessorBuilder<S> {
    /// Replaces the engine's `parse`.
    pub fn parse<F, Fut>(mut self, parse: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ExecutableDocument, GraphQLError>> + Send + 'static,
    {
        self.engine = self.engine.parse(parse);
        self
    }

    /// Replaces the engine's `validate`.
    pub fn validate<F>(mut self, validate: F) -> Self
    where
        F: Fn(&S, &ExecutableDocument, &[ValidationRule<S>]) -> Vec<GraphQLError>
            + Send
            + Sync
            + 'static,
    {
        self.engine = self.engine.validate(validate);
        self
    }

    /// Replaces the engine's `subscribe`.
    pub fn subscribe<F, Fut>(mut self, subscribe: F) -> Self
    where
        F: Fn(ExecutionArgs<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SubscriptionOutcome, BoxError>> + Send + 'static,
    {
        self.engine = self.engine.subscribe(subscribe);
        self
    }

    /// Sets the context factory.
    pub fn context_factory<F, Fut>(mut self, factory: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Context, BoxError>> + Send + 'static,
    {
        self.context_factory = Some(Arc::new(move |ctx: ExecutionContext| factory(ctx).boxed()));
        self
    }

    /// Sets the root value factory.
    pub fn root_value_factory<F, Fut>(mut self, factory: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.root_value_factory = Some(Arc::new(move |ctx: ExecutionContext| factory(ctx).boxed()));
        self
    }

    /// Sets the payload formatter.
    pub fn format_payload<F>(mut self, format: F) -> Self
    where
        F: Fn(&mut ExecutionResult, &FormatContext) + Send + Sync + 'static,
    {
        self.format_payload = Some(Arc::new(format));
        self
    }

    /// Replaces the built-in validation rules.
    pub fn validation_rules(mut self, rules: Vec<ValidationRule<S>>) -> Self {
        self.validation_rules = Some(rules);
        self
    }

    /// Adds a validation rule.
    pub fn validation_rule(mut self, rule: ValidationRule<S>) -> Self {
        self.validation_rules
            .get_or_insert_with(validation::specified_rules)
            .push(rule);
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Processor<S> {
        let mut rules = self
            .validation_rules
            .unwrap_or_else(validation::specified_rules);
        if let Some(limit) = self.config.max_depth {
            rules.push(validation::max_depth(limit));
        }

        Processor {
            schema: self.schema,
            engine: self.engine,
            context_factory: self.context_factory,
            root_value_factory: self.root_value_factory,
            format_payload: self.format_payload,
            validation_rules: rules.into(),
            config: self.config,
        }
    }
}

/// Per-request inputs of [`process_request`].
#[derive(Debug, Clone, Default)]
pub struct ProcessRequestOptions {
    pub request: Request,
    pub params: GraphQLParams,
}

impl ProcessRequestOptions {
    /// Uses the parameters carried by the request itself.
    pub fn new(request: Request) -> Self {
        let params = GraphQLParams::from_request(&request);
        Self { request, params }
    }

    /// Overrides the GraphQL parameters.
    pub fn params(mut self, params: GraphQLParams) -> Self {
        self.params = params;
        self
    }
}

impl From<Request> for ProcessRequestOptions {
    fn from(request: Request) -> Self {
        Self::new(request)
    }
}

/// Processes one request with a processor.
pub async fn process_request<S: Send + Sync + 'static>(
    processor: &Processor<S>,
    options: ProcessRequestOptions,
) -> ResultVariant {
    processor
        .process_request(&options.request, options.params)
        .await
}

fn decode_param(
    param: Option<JsonParam>,
    kind: ErrorKind,
    label: &str,
) -> RequestResult<Option<Map<String, Value>>> {
    match param {
        None => Ok(None),
        Some(param) if param.is_encoded() => param
            .decode()
            .map_err(|_| RequestError::new(kind, format!("{label} are invalid JSON."))),
        Some(param) => param
            .decode()
            .map_err(|_| RequestError::new(kind, format!("{label} must be provided as an object."))),
    }
}

/// Ends a patch stream right after its terminal patch, without pulling the
/// source again.
fn until_last_patch(
    patches: PatchStream,
) -> impl futures::Stream<Item = Result<ExecutionPatchResult, BoxError>> + Send + 'static {
    stream::unfold(Some(patches), |patches| async move {
        let mut patches = patches?;
        let patch = patches.next().await?;
        let more = matches!(&patch, Ok(patch) if patch.has_next);
        Some((patch, more.then_some(patches)))
    })
}

/// Ends a stream at its first error or panic, yielding `recover`'s
/// payload for it in place of the error.
fn until_failure<T, St, F>(
    source: St,
    recover: F,
) -> impl futures::Stream<Item = Result<T, BoxError>> + Send + 'static
where
    T: Send + 'static,
    St: futures::Stream<Item = Result<T, BoxError>> + Send + 'static,
    F: Fn(BoxError) -> T + Send + 'static,
{
    let source = AssertUnwindSafe(source).catch_unwind().boxed();
    stream::unfold(Some((source, recover)), |state| async move {
        let (mut source, recover) = state?;
        match source.next().await? {
            Ok(Ok(item)) => Some((Ok(item), Some((source, recover)))),
            Ok(Err(err)) => {
                debug!(error = %err, "stream source failed");
                Some((Ok(recover(err)), None))
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(panic = %message, "stream source panicked");
                Some((Ok(recover(message.into())), None))
            }
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Unexpected error.".to_string())
}
