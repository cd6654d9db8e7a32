// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Calling convention between the controller and operator-supplied reconcilers.

use super::owner::create_owner_reference;
use super::status::{update_condition, update_status, Condition};
use crate::client::{ObjectResource, ResourceClient};
use crate::error::{ClientError, ReconcileError};
use crate::events::{EventRecord, EventRecorder};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the controller should do with a key after a successful reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue: bool,
    /// Revisit after this long; implies `requeue`.
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    /// Nothing left to do until the resource changes again.
    pub fn done() -> Self {
        Self::default()
    }

    /// Run again after the rate limiter's backoff.
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: true,
            requeue_after: Some(delay),
        }
    }
}

/// Level-triggered reconciliation logic for one resource type.
///
/// Both entry points must be idempotent: the same resource may be passed any number
/// of times, with or without changes in between.
#[async_trait]
pub trait Reconciler<K: ObjectResource>: Send + Sync + 'static {
    async fn reconcile(
        &self,
        resource: Arc<K>,
        ctx: &Context<K>,
    ) -> Result<ReconcileResult, ReconcileError>;

    /// Cleanup run before the controller's finalizer is removed from a terminating resource.
    async fn finalize(&self, _resource: Arc<K>, _ctx: &Context<K>) -> Result<(), ReconcileError> {
        Ok(())
    }
}

/// Handles a reconciler gets alongside each resource.
pub struct Context<K: ObjectResource> {
    client: Arc<dyn ResourceClient<K>>,
    recorder: EventRecorder,
    cancellation: CancellationToken,
}

impl<K: ObjectResource> Context<K> {
    pub fn new(
        client: Arc<dyn ResourceClient<K>>,
        recorder: EventRecorder,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            client,
            recorder,
            cancellation,
        }
    }

    pub fn client(&self) -> &Arc<dyn ResourceClient<K>> {
        &self.client
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    /// Fires when the operator is stopping. Long reconciles may check it to return early.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn update_status<S: Serialize + Sync>(
        &self,
        resource: &K,
        status: &S,
    ) -> Result<K, ClientError> {
        update_status(self.client.as_ref(), resource, status).await
    }

    pub async fn update_condition(
        &self,
        resource: &K,
        condition: Condition,
    ) -> Result<K, ClientError> {
        update_condition(self.client.as_ref(), resource, condition).await
    }

    pub fn owner_reference(&self, resource: &K) -> Result<OwnerReference, ClientError> {
        create_owner_reference(resource)
    }

    pub async fn event(&self, resource: &K, record: EventRecord) {
        self.recorder.event(resource, record).await
    }
}
