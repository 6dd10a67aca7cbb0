//! # gqlx_http
//!
//! Serves a [`gqlx_core::Processor`] over HTTP/1.1 with hyper.
//!
//! - `GET|POST <endpoint>` - GraphQL (JSON, multipart or event stream)
//! - `GET /health` - Health check
//!
//! ```no_run
//! use gqlx_core::prelude::*;
//! use gqlx_http::ServerConfig;
//!
//! # async fn run() -> Result<(), gqlx_http::ServerError> {
//! let processor = Processor::builder((), |_args| async {
//!     Ok(ExecutionResult::data(serde_json::json!({ "hello": "world" })).into())
//! })
//! .build();
//!
//! gqlx_http::run(processor, ServerConfig::new().port(4000)).await
//! # }
//! ```

mod config;
mod convert;
mod error;
mod server;

pub use config::ServerConfig;
pub use convert::{extract_request, full, into_hyper_response, ResponseBody};
pub use error::{ServerError, ServerResult};
pub use server::{handle, run, serve};
