// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Minimal HTTP/1 listener shared by the metrics, health and webhook endpoints.

use crate::error::{KeelError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Response, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Request handler behind a listener. The body is fully buffered before routing.
#[async_trait]
pub trait Router: Send + Sync + 'static {
    async fn route(&self, method: &Method, path: &str, body: Bytes) -> Response<Full<Bytes>>;
}

/// Build a response, falling back to a bare 500 if the builder rejects it.
pub fn build_response(
    status: StatusCode,
    content_type: &str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .body(Full::new(body.into()))
        .unwrap_or_else(|e| {
            error!(error = %e, "Failed to build response");
            let mut response = Response::new(Full::new(Bytes::from("Internal Error")));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
}

pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    build_response(status, "text/plain; charset=utf-8", body)
}

pub fn not_found() -> Response<Full<Bytes>> {
    text_response(StatusCode::NOT_FOUND, "Not Found")
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| KeelError::Server(format!("failed to bind {}: {}", addr, e)))
}

/// Accepts connections until `shutdown` fires. Open connections are dropped at
/// the same moment.
pub async fn serve<R: Router>(
    name: &'static str,
    listener: TcpListener,
    router: Arc<R>,
    shutdown: CancellationToken,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(server = name, address = %local, "HTTP server listening");

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };

        let router = Arc::clone(&router);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let io = hyper_util::rt::TokioIo::new(stream);
            let service = hyper::service::service_fn(move |req| {
                let router = Arc::clone(&router);
                async move { handle(router.as_ref(), req).await }
            });
            let connection = hyper::server::conn::http1::Builder::new().serve_connection(io, service);
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = connection => {
                    if let Err(e) = result {
                        debug!(server = name, peer = %peer, error = %e, "Connection error");
                    }
                }
            }
        });
    }

    info!(server = name, "HTTP server stopped");
    Ok(())
}

async fn handle<R: Router>(
    router: &R,
    req: Request<hyper::body::Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(error = %e, "Failed to read request body");
            return Ok(text_response(StatusCode::BAD_REQUEST, "Failed to read request body"));
        }
    };
    Ok(router.route(&method, &path, body).await)
}

/// Serves `/metrics` from the installed Prometheus recorder.
pub struct MetricsRouter {
    handle: Option<PrometheusHandle>,
}

impl MetricsRouter {
    pub fn new(handle: Option<PrometheusHandle>) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl Router for MetricsRouter {
    async fn route(&self, method: &Method, path: &str, _body: Bytes) -> Response<Full<Bytes>> {
        match (method, path) {
            (&Method::GET, "/metrics") => {
                let body = self.handle.as_ref().map(|h| h.render()).unwrap_or_default();
                build_response(StatusCode::OK, "text/plain; version=0.0.4", body)
            }
            _ => not_found(),
        }
    }
}

pub type ReadinessCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// `/healthz` answers as long as the process runs; `/readyz` reflects `ready`.
pub struct HealthRouter {
    ready: ReadinessCheck,
}

impl HealthRouter {
    pub fn new(ready: ReadinessCheck) -> Self {
        Self { ready }
    }
}

#[async_trait]
impl Router for HealthRouter {
    async fn route(&self, method: &Method, path: &str, _body: Bytes) -> Response<Full<Bytes>> {
        match (method, path) {
            (&Method::GET, "/healthz") => text_response(StatusCode::OK, "OK"),
            (&Method::GET, "/readyz") => {
                if (self.ready)() {
                    text_response(StatusCode::OK, "Ready")
                } else {
                    text_response(StatusCode::SERVICE_UNAVAILABLE, "Not Ready")
                }
            }
            _ => not_found(),
        }
    }
}
