// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod client;
pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod events;
pub mod informer;
pub mod kubernetes;
pub mod metrics;
pub mod operator;
pub mod queue;
pub mod reconcilers;
pub mod server;
pub mod types;
pub mod webhook;

#[cfg(test)]
pub mod test_utils;

pub use client::{KubeResourceClient, MemoryClient, ObjectKey, ObjectResource, ResourceClient};
pub use config::Config;
pub use controller::{Context, Controller, ControllerConfig, Predicate, ReconcileResult, Reconciler};
pub use error::{ClientError, KeelError, ReconcileError, Result};
pub use events::{EventRecord, EventRecorder, EventType};
pub use informer::{Informer, InformerEvent};
pub use operator::{ManagedController, Operator};
pub use queue::{RateLimiter, WorkQueue};
pub use webhook::{MutatingHandler, Mutation, ValidatingHandler, Verdict, WebhookServer};
