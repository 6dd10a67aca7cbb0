//! # gqlx_core
//!
//! Transport-agnostic GraphQL over HTTP.
//!
//! This crate sits between an HTTP server and a GraphQL execution engine:
//!
//! - [`process`]: classifies a request (method, query, operation kind),
//!   runs the pluggable engine and yields exactly one [`ResultVariant`]
//! - [`framer`]: renders that variant as a JSON document, a
//!   `multipart/mixed` stream or a `text/event-stream`
//!
//! No execution engine is bundled. `parse` and `validate` default to the
//! async-graphql parser and the built-in rules; `execute` is supplied by
//! the caller.
//!
//! ```
//! use gqlx_core::prelude::*;
//! use serde_json::json;
//!
//! # let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # runtime.block_on(async {
//! let processor = Processor::builder((), |_args| async {
//!     Ok(ExecutionResult::data(json!({ "hello": "world" })).into())
//! })
//! .build();
//!
//! let request = Request::post(json!({ "query": "{ hello }" }));
//! let params = GraphQLParams::from_request(&request);
//! let framed = render(processor.process_request(&request, params).await);
//!
//! assert_eq!(framed.status, 200);
//! assert_eq!(framed.header("content-type"), Some("application/json"));
//! # });
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod framer;
pub mod process;
pub mod protocol;
pub mod request;
pub mod result;
pub mod stream;
pub mod validation;

pub use context::{Context, ExecutionContext, OperationKind, SelectedOperation};
pub use engine::{Engine, ExecutionArgs, ExecutionOutcome, SubscriptionOutcome};
pub use error::{BoxError, ErrorKind, GraphQLError, Location, PathSegment, RequestError};
pub use framer::{render, Body, FrameStream, FramedResponse};
pub use process::{
    process_request, FormatContext, ProcessRequestOptions, Processor, ProcessorBuilder,
    ProcessorConfig,
};
pub use protocol::{Accept, ResponseProtocol};
pub use request::{GraphQLParams, GraphQLQuery, Headers, JsonParam, Request};
pub use result::{
    ExecutionPatchResult, ExecutionResult, MultipartResponse, Push, Response, ResultVariant,
    StreamPayload,
};
pub use stream::{PayloadStream, Unsubscribe};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::context::{Context, ExecutionContext, OperationKind};
    pub use crate::engine::{Engine, ExecutionArgs, ExecutionOutcome, SubscriptionOutcome};
    pub use crate::error::{BoxError, GraphQLError, RequestError};
    pub use crate::framer::{render, Body, FramedResponse};
    pub use crate::process::{Processor, ProcessorConfig};
    pub use crate::request::{GraphQLParams, Request};
    pub use crate::result::{ExecutionPatchResult, ExecutionResult, ResultVariant};
}
