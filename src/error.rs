// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeelError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Resource client error: {0}")]
    Client(#[from] ClientError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Resource type {0} is already registered")]
    DuplicateResource(String),

    #[error("Webhook path {0} is already registered")]
    DuplicateWebhookPath(String),

    #[error("HTTP server error: {0}")]
    Server(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KeelError>;

/// Failure kinds surfaced by a resource client, independent of the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },

    #[error("conflict writing {key}: {message}")]
    Conflict { key: String, message: String },

    /// The requested resource version is older than the store still remembers.
    #[error("resource version {0} is too old")]
    Gone(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("transient failure: {0}")]
    Transient(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Conflict { .. } | ClientError::Transient(_)
        )
    }
}

impl From<kube::Error> for ClientError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => ClientError::NotFound {
                    kind: "resource".to_string(),
                    key: resp.message,
                },
                409 => ClientError::Conflict {
                    key: resp.reason,
                    message: resp.message,
                },
                410 => ClientError::Gone(resp.message),
                400 | 422 => ClientError::Invalid(resp.message),
                _ => ClientError::Transient(format!("{} ({})", resp.message, resp.code)),
            },
            kube::Error::SerdeError(e) => ClientError::Invalid(e.to_string()),
            other => ClientError::Transient(other.to_string()),
        }
    }
}

/// Error returned by reconcilers and finalizers.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("{0}")]
    Other(String),
}
