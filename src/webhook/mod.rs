// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Admission webhook dispatch.
//!
//! Handlers are registered per URL path. The server only routes: it decodes the
//! review, calls the handler and encodes its verdict. TLS is terminated in front
//! of the process.

pub mod admission;

pub use admission::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, AdmissionStatus, Operation,
};

use crate::error::{KeelError, Result};
use crate::server::{self, build_response, not_found, text_response, Router};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Response, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Handler(String),
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub message: Option<String>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            message: None,
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: Some(message.into()),
        }
    }
}

/// A verdict plus the changes to apply when allowed.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub verdict: Verdict,
    pub patch: Option<json_patch::Patch>,
}

impl Mutation {
    pub fn unchanged() -> Self {
        Self {
            verdict: Verdict::allow(),
            patch: None,
        }
    }

    pub fn patch(patch: json_patch::Patch) -> Self {
        Self {
            verdict: Verdict::allow(),
            patch: Some(patch),
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::deny(message),
            patch: None,
        }
    }
}

#[async_trait]
pub trait ValidatingHandler: Send + Sync + 'static {
    async fn validate(&self, request: &AdmissionRequest) -> std::result::Result<Verdict, WebhookError>;
}

#[async_trait]
pub trait MutatingHandler: Send + Sync + 'static {
    async fn mutate(&self, request: &AdmissionRequest) -> std::result::Result<Mutation, WebhookError>;
}

#[derive(Clone)]
enum Handler {
    Validating(Arc<dyn ValidatingHandler>),
    Mutating(Arc<dyn MutatingHandler>),
}

#[derive(Clone, Default)]
pub struct WebhookServer {
    handlers: HashMap<String, Handler>,
}

impl WebhookServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_validating<H: ValidatingHandler>(&mut self, path: &str, handler: H) -> Result<()> {
        self.register(path, Handler::Validating(Arc::new(handler)))
    }

    pub fn register_mutating<H: MutatingHandler>(&mut self, path: &str, handler: H) -> Result<()> {
        self.register(path, Handler::Mutating(Arc::new(handler)))
    }

    fn register(&mut self, path: &str, handler: Handler) -> Result<()> {
        if self.handlers.contains_key(path) {
            return Err(KeelError::DuplicateWebhookPath(path.to_string()));
        }
        debug!(path, "Registered webhook handler");
        self.handlers.insert(path.to_string(), handler);
        Ok(())
    }

    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Routes `review` to the handler at `path`. `None` when nothing is registered there.
    pub async fn dispatch(
        &self,
        path: &str,
        review: AdmissionReview,
    ) -> Option<std::result::Result<AdmissionReview, WebhookError>> {
        let handler = self.handlers.get(path)?;
        let Some(request) = review.request else {
            return Some(Err(WebhookError::InvalidReview(
                "review carries no request".to_string(),
            )));
        };

        let response = match handler {
            Handler::Validating(h) => match h.validate(&request).await {
                Ok(verdict) => verdict_response(&request.uid, verdict),
                Err(e) => handler_failed(path, &request, e),
            },
            Handler::Mutating(h) => match h.mutate(&request).await {
                Ok(Mutation { verdict, patch }) => {
                    let response = verdict_response(&request.uid, verdict);
                    match patch {
                        Some(patch) if response.allowed => match response.with_patch(&patch) {
                            Ok(response) => response,
                            Err(e) => handler_failed(path, &request, e.into()),
                        },
                        _ => response,
                    }
                }
                Err(e) => handler_failed(path, &request, e),
            },
        };

        debug!(
            path,
            uid = %request.uid,
            operation = ?request.operation,
            allowed = response.allowed,
            "Admission decided"
        );
        Some(Ok(AdmissionReview::from_response(response)))
    }

    /// Serves admission reviews on `listener` until `shutdown` fires.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!(paths = ?self.paths(), "Starting webhook server");
        server::serve("webhook", listener, self, shutdown).await
    }
}

fn verdict_response(uid: &str, verdict: Verdict) -> AdmissionResponse {
    if verdict.allowed {
        AdmissionResponse::allow(uid)
    } else {
        AdmissionResponse::deny(uid, 403, verdict.message.unwrap_or_default())
    }
}

fn handler_failed(path: &str, request: &AdmissionRequest, e: WebhookError) -> AdmissionResponse {
    warn!(path, uid = %request.uid, error = %e, "Webhook handler failed, denying");
    AdmissionResponse::deny(&request.uid, 500, e.to_string())
}

#[async_trait]
impl Router for WebhookServer {
    async fn route(&self, method: &Method, path: &str, body: Bytes) -> Response<Full<Bytes>> {
        if *method != Method::POST || !self.handlers.contains_key(path) {
            return not_found();
        }

        let review: AdmissionReview = match serde_json::from_slice(&body) {
            Ok(review) => review,
            Err(e) => {
                warn!(path, error = %e, "Failed to parse AdmissionReview");
                return text_response(StatusCode::BAD_REQUEST, "Invalid AdmissionReview format");
            }
        };

        match self.dispatch(path, review).await {
            None => not_found(),
            Some(Err(e)) => text_response(StatusCode::BAD_REQUEST, e.to_string()),
            Some(Ok(review)) => match serde_json::to_vec(&review) {
                Ok(json) => build_response(StatusCode::OK, "application/json", json),
                Err(e) => {
                    error!(error = %e, "Failed to serialize AdmissionReview");
                    text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to serialize response")
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admission::{AdmissionKind, AdmissionResource, UserInfo};

    struct MinReplicas;

    #[async_trait]
    impl ValidatingHandler for MinReplicas {
        async fn validate(&self, request: &AdmissionRequest) -> std::result::Result<Verdict, WebhookError> {
            let object: serde_json::Value = request
                .object_as()?
                .ok_or_else(|| WebhookError::InvalidReview("missing object".to_string()))?;
            match object["spec"]["replicas"].as_i64() {
                Some(n) if n < 0 => Ok(Verdict::deny("replicas must not be negative")),
                Some(_) => Ok(Verdict::allow()),
                None => Err(WebhookError::Handler("replicas is not a number".to_string())),
            }
        }
    }

    struct AddTeamLabel;

    #[async_trait]
    impl MutatingHandler for AddTeamLabel {
        async fn mutate(&self, _request: &AdmissionRequest) -> std::result::Result<Mutation, WebhookError> {
            let patch: json_patch::Patch = serde_json::from_value(serde_json::json!([
                { "op": "add", "path": "/metadata/labels", "value": { "team": "platform" } }
            ]))?;
            Ok(Mutation::patch(patch))
        }
    }

    fn make_review(object: serde_json::Value) -> AdmissionReview {
        AdmissionReview::from_request(AdmissionRequest {
            uid: "uid-1".to_string(),
            kind: AdmissionKind {
                group: "example.com".to_string(),
                version: "v1".to_string(),
                kind: "Widget".to_string(),
            },
            resource: AdmissionResource {
                group: "example.com".to_string(),
                version: "v1".to_string(),
                resource: "widgets".to_string(),
            },
            operation: Operation::Create,
            object: Some(object),
            old_object: None,
            namespace: Some("default".to_string()),
            name: Some("a".to_string()),
            user_info: UserInfo::default(),
            dry_run: None,
        })
    }

    fn make_server() -> WebhookServer {
        let mut server = WebhookServer::new();
        server.register_validating("/validate", MinReplicas).unwrap();
        server.register_mutating("/mutate", AddTeamLabel).unwrap();
        server
    }

    async fn response_for(server: &WebhookServer, path: &str, object: serde_json::Value) -> AdmissionResponse {
        server
            .dispatch(path, make_review(object))
            .await
            .unwrap()
            .unwrap()
            .response
            .unwrap()
    }

    #[tokio::test]
    async fn test_validating_allow_and_deny() {
        let server = make_server();

        let allowed = response_for(&server, "/validate", serde_json::json!({ "spec": { "replicas": 2 } })).await;
        assert!(allowed.allowed);
        assert_eq!(allowed.uid, "uid-1");

        let denied = response_for(&server, "/validate", serde_json::json!({ "spec": { "replicas": -1 } })).await;
        assert!(!denied.allowed);
        let status = denied.status.unwrap();
        assert_eq!(status.code, Some(403));
        assert_eq!(status.message.as_deref(), Some("replicas must not be negative"));
    }

    #[tokio::test]
    async fn test_handler_error_denies() {
        let server = make_server();
        let response = response_for(&server, "/validate", serde_json::json!({ "spec": {} })).await;

        assert!(!response.allowed);
        assert_eq!(
            response.status.unwrap().message.as_deref(),
            Some("replicas is not a number")
        );
    }

    #[tokio::test]
    async fn test_mutating_returns_patch() {
        let server = make_server();
        let response = response_for(&server, "/mutate", serde_json::json!({ "metadata": {} })).await;

        assert!(response.allowed);
        let patch = response.decoded_patch().unwrap();
        let mut doc = serde_json::json!({ "metadata": {} });
        json_patch::patch(&mut doc, &patch).unwrap();
        assert_eq!(doc["metadata"]["labels"]["team"], "platform");
    }

    #[tokio::test]
    async fn test_duplicate_path_rejected() {
        let mut server = make_server();
        let err = server.register_mutating("/validate", AddTeamLabel).unwrap_err();
        assert!(matches!(err, KeelError::DuplicateWebhookPath(p) if p == "/validate"));
    }

    #[tokio::test]
    async fn test_unknown_path_and_bad_body() {
        let server = make_server();
        assert!(server.dispatch("/other", make_review(serde_json::json!({}))).await.is_none());

        let response = server.route(&Method::POST, "/other", Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = server.route(&Method::POST, "/validate", Bytes::from_static(b"{")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_route_encodes_review() {
        let server = make_server();
        let body = serde_json::to_vec(&make_review(serde_json::json!({ "spec": { "replicas": 1 } }))).unwrap();

        let response = server.route(&Method::POST, "/validate", Bytes::from(body)).await;

        assert_eq!(response.status(), StatusCode::OK);
        use http_body_util::BodyExt;
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let review: AdmissionReview = serde_json::from_slice(&bytes).unwrap();
        assert!(review.response.unwrap().allowed);
    }
}
