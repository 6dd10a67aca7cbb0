//! The HTTP/1.1 server.

use bytes::Bytes;
use gqlx_core::{render, GraphQLParams, Processor};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::convert::{extract_request, full, into_hyper_response, ResponseBody};
use crate::error::{ServerError, ServerResult};

/// Binds `config.address()` and serves until accepting fails.
pub async fn run<S>(processor: Processor<S>, config: ServerConfig) -> ServerResult<()>
where
    S: Send + Sync + 'static,
{
    let address = config.address();
    let listener = match TcpListener::bind(address.as_str()).await {
        Ok(listener) => listener,
        Err(source) => return Err(ServerError::Bind { address, source }),
    };
    serve(listener, processor, config).await
}

/// Serves connections from `listener`, one task per connection.
pub async fn serve<S>(
    listener: TcpListener,
    processor: Processor<S>,
    config: ServerConfig,
) -> ServerResult<()>
where
    S: Send + Sync + 'static,
{
    if let Ok(address) = listener.local_addr() {
        info!("Listening on http://{}{}", address, config.endpoint);
    }
    let config = Arc::new(config);

    loop {
        let (stream, peer) = listener.accept().await.map_err(ServerError::Accept)?;
        debug!(%peer, "accepted connection");

        let io = TokioIo::new(stream);
        let processor = processor.clone();
        let config = config.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: hyper::Request<Incoming>| {
                let processor = processor.clone();
                let config = config.clone();
                async move { Ok::<_, Infallible>(handle(&processor, &config, req).await) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                if !err.is_incomplete_message() {
                    error!("Connection error: {:?}", err);
                }
            }
        });
    }
}

/// Routes one request.
///
/// The GraphQL endpoint accepts every method; the dispatcher answers
/// unsupported ones with `405`.
pub async fn handle<S, B>(
    processor: &Processor<S>,
    config: &ServerConfig,
    req: hyper::Request<B>,
) -> hyper::Response<ResponseBody>
where
    S: Send + Sync + 'static,
    B: hyper::body::Body<Data = Bytes>,
    B::Error: Display,
{
    let (parts, body) = req.into_parts();
    let path = parts.uri.path();

    if path == config.endpoint {
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                debug!(error = %err, "failed to read request body");
                return json_response(
                    StatusCode::BAD_REQUEST,
                    r#"{"errors":[{"message":"Failed to read request body."}]}"#,
                );
            }
        };

        let variant = match extract_request(&parts, body) {
            Ok(request) => {
                let params = GraphQLParams::from_request(&request);
                processor.process_request(&request, params).await
            }
            Err(variant) => variant,
        };
        return into_hyper_response(render(variant));
    }

    match (&parts.method, path) {
        (&Method::GET, "/health") => json_response(StatusCode::OK, r#"{"status":"healthy"}"#),
        _ => json_response(StatusCode::NOT_FOUND, r#"{"error":"Not Found"}"#),
    }
}

fn json_response(status: StatusCode, body: &'static str) -> hyper::Response<ResponseBody> {
    let mut response = hyper::Response::new(full(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}
