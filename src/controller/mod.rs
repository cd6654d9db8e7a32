// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-resource-type reconciliation loop.
//!
//! A controller owns one informer and one work queue. Informer events pass the
//! predicate and become queue keys; a fixed pool of workers pops keys, re-reads
//! the cached resource and walks the finalizer state machine before handing the
//! resource to the reconciler.

pub mod finalizer;
pub mod owner;
pub mod reconciler;
pub mod status;

pub use finalizer::{add_finalizer, has_finalizer, remove_finalizer};
pub use owner::{create_owner_reference, is_controlled_by};
pub use reconciler::{Context, ReconcileResult, Reconciler};
pub use status::{conditions_of, set_condition, update_condition, update_status, Condition};

use crate::client::{ObjectKey, ObjectResource, ResourceClient};
use crate::config::Config;
use crate::constants::defaults;
use crate::error::ReconcileError;
use crate::events::{EventRecord, EventRecorder};
use crate::informer::{Informer, InformerEvent, Store};
use crate::metrics::ControllerMetrics;
use crate::queue::{RateLimiter, WorkQueue};
use futures::FutureExt;
use kube::core::GroupVersionKind;
use kube::{Resource, ResourceExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Used in logs, metrics labels and events.
    pub name: String,
    /// Watch a single namespace, or all when `None`.
    pub namespace: Option<String>,
    pub workers: usize,
    pub rate_limit_base: Duration,
    pub rate_limit_max: Duration,
    pub reconnect_backoff: Duration,
    /// Finalizer that gates deletion; no finalizer handling when `None`.
    pub finalizer: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: "controller".to_string(),
            namespace: None,
            workers: defaults::WORKERS,
            rate_limit_base: Duration::from_millis(defaults::RATE_LIMIT_BASE_MS),
            rate_limit_max: Duration::from_secs(defaults::RATE_LIMIT_MAX_SECS),
            reconnect_backoff: Duration::from_secs(defaults::WATCH_RECONNECT_SECS),
            finalizer: None,
        }
    }
}

impl ControllerConfig {
    pub fn from_config(name: &str, config: &Config) -> Self {
        Self {
            name: name.to_string(),
            namespace: config.watch_namespace.clone(),
            workers: config.workers,
            rate_limit_base: config.rate_limit_base,
            rate_limit_max: config.rate_limit_max,
            reconnect_backoff: config.watch_reconnect,
            finalizer: None,
        }
    }

    pub fn with_finalizer(mut self, finalizer: &str) -> Self {
        self.finalizer = Some(finalizer.to_string());
        self
    }
}

/// Filter deciding which informer events enqueue a key.
pub enum Predicate<K> {
    Always,
    /// Skip status-only and metadata-only updates.
    GenerationChanged,
    Custom(Arc<dyn Fn(&InformerEvent<K>) -> bool + Send + Sync>),
}

impl<K> Clone for Predicate<K> {
    fn clone(&self) -> Self {
        match self {
            Predicate::Always => Predicate::Always,
            Predicate::GenerationChanged => Predicate::GenerationChanged,
            Predicate::Custom(f) => Predicate::Custom(Arc::clone(f)),
        }
    }
}

impl<K: ObjectResource> Predicate<K> {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&InformerEvent<K>) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(f))
    }

    pub fn matches(&self, event: &InformerEvent<K>) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Custom(f) => f(event),
            Predicate::GenerationChanged => match event {
                InformerEvent::Modified { old: Some(old), new } => {
                    let (old, new) = (old.meta(), new.meta());
                    old.generation != new.generation
                        || (old.deletion_timestamp.is_none() && new.deletion_timestamp.is_some())
                        || old.finalizers != new.finalizers
                }
                _ => true,
            },
        }
    }
}

pub struct Controller<K: ObjectResource, R: Reconciler<K>> {
    config: ControllerConfig,
    client: Arc<dyn ResourceClient<K>>,
    reconciler: Arc<R>,
    recorder: EventRecorder,
    informer: Arc<Informer<K>>,
    queue: Arc<WorkQueue<ObjectKey>>,
    predicate: Predicate<K>,
    metrics: ControllerMetrics,
}

impl<K: ObjectResource, R: Reconciler<K>> Controller<K, R> {
    pub fn new(
        client: Arc<dyn ResourceClient<K>>,
        reconciler: R,
        recorder: EventRecorder,
        config: ControllerConfig,
    ) -> Self {
        let informer = Informer::new(
            Arc::clone(&client),
            config.namespace.clone(),
            config.reconnect_backoff,
        );
        let queue = WorkQueue::new(RateLimiter::new(
            config.rate_limit_base,
            config.rate_limit_max,
        ));
        let metrics = ControllerMetrics::new(&config.name);

        Self {
            config,
            client,
            reconciler: Arc::new(reconciler),
            recorder,
            informer: Arc::new(informer),
            queue: Arc::new(queue),
            predicate: Predicate::Always,
            metrics,
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate<K>) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()))
    }

    pub fn has_synced(&self) -> bool {
        self.informer.has_synced()
    }

    pub fn store(&self) -> Store<K> {
        self.informer.store()
    }

    pub fn queue(&self) -> &Arc<WorkQueue<ObjectKey>> {
        &self.queue
    }

    /// Runs the informer, dispatcher and workers until `shutdown` fires. In-flight
    /// reconciliations are allowed to finish before this returns.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            controller = %self.config.name,
            kind = %K::kind(&()),
            workers = self.config.workers,
            finalizer = self.config.finalizer.as_deref().unwrap_or("none"),
            "Starting controller"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let informer_token = CancellationToken::new();
        let informer_task = {
            let informer = Arc::clone(&self.informer);
            let token = informer_token.clone();
            tokio::spawn(async move { informer.run(tx, token).await })
        };
        let dispatch_task = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.dispatch(rx).await })
        };

        let ctx = Arc::new(Context::new(
            Arc::clone(&self.client),
            self.recorder.clone(),
            shutdown.clone(),
        ));
        let workers: Vec<_> = (0..self.config.workers.max(1))
            .map(|id| {
                let this = Arc::clone(&self);
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move { this.worker(id, ctx).await })
            })
            .collect();

        shutdown.cancelled().await;
        info!(controller = %self.config.name, "Stopping controller");

        self.queue.shut_down();
        for worker in workers {
            if let Err(e) = worker.await {
                error!(controller = %self.config.name, error = %e, "Worker task failed");
            }
        }
        informer_token.cancel();
        let _ = informer_task.await;
        let _ = dispatch_task.await;

        info!(controller = %self.config.name, "Controller stopped");
    }

    async fn dispatch(&self, mut rx: mpsc::UnboundedReceiver<InformerEvent<K>>) {
        while let Some(event) = rx.recv().await {
            if self.predicate.matches(&event) {
                self.queue.add(event.key());
            }
        }
    }

    async fn worker(&self, id: usize, ctx: Arc<Context<K>>) {
        debug!(controller = %self.config.name, worker = id, "Worker started");
        while let Some(key) = self.queue.get().await {
            self.process(key, &ctx).await;
        }
        debug!(controller = %self.config.name, worker = id, "Worker stopped");
    }

    /// Handles one key and reports the outcome back to the queue.
    pub(crate) async fn process(&self, key: ObjectKey, ctx: &Context<K>) {
        let started = Instant::now();
        let outcome = match AssertUnwindSafe(self.reconcile_key(&key, ctx))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(ReconcileError::Other(format!(
                "reconciler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };
        self.metrics.observe(started.elapsed(), outcome.is_ok());

        match outcome {
            Ok(result) if result.requeue || result.requeue_after.is_some() => {
                debug!(key = %key, after = ?result.requeue_after, "Requeue requested");
                self.queue.requeue(key, result.requeue_after);
            }
            Ok(_) => self.queue.done(&key),
            Err(e) => {
                warn!(
                    controller = %self.config.name,
                    key = %key,
                    retries = self.queue.num_requeues(&key),
                    error = %e,
                    "Reconciliation failed, backing off"
                );
                self.queue.requeue(key, None);
            }
        }
    }

    #[instrument(skip(self, key, ctx), fields(controller = %self.config.name, key = %key))]
    async fn reconcile_key(
        &self,
        key: &ObjectKey,
        ctx: &Context<K>,
    ) -> Result<ReconcileResult, ReconcileError> {
        let Some(resource) = self.informer.store().get(key).await else {
            debug!("Resource no longer cached, dropping");
            return Ok(ReconcileResult::done());
        };
        let finalizer = self.config.finalizer.as_deref();

        if resource.meta().deletion_timestamp.is_some() {
            return match finalizer {
                Some(finalizer) if has_finalizer(resource.as_ref(), finalizer) => {
                    self.finalize(resource, finalizer, ctx).await
                }
                _ => {
                    debug!("Resource is terminating without our finalizer, skipping");
                    Ok(ReconcileResult::done())
                }
            };
        }

        if let Some(finalizer) = finalizer {
            if !has_finalizer(resource.as_ref(), finalizer) {
                add_finalizer(self.client.as_ref(), resource.as_ref(), finalizer).await?;
                // The write comes back as an informer event that reconciles the resource.
                return Ok(ReconcileResult::done());
            }
        }

        debug!(generation = ?resource.meta().generation, "Reconciling");
        match self.reconciler.reconcile(Arc::clone(&resource), ctx).await {
            Ok(result) => Ok(result),
            Err(e) => {
                ctx.event(
                    resource.as_ref(),
                    EventRecord::warning("ReconcileFailed", e.to_string()),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn finalize(
        &self,
        resource: Arc<K>,
        finalizer: &str,
        ctx: &Context<K>,
    ) -> Result<ReconcileResult, ReconcileError> {
        info!(name = %resource.name_any(), "Finalizing");
        if let Err(e) = self.reconciler.finalize(Arc::clone(&resource), ctx).await {
            ctx.event(
                resource.as_ref(),
                EventRecord::warning("FinalizeFailed", e.to_string()),
            )
            .await;
            return Err(e);
        }

        remove_finalizer(self.client.as_ref(), resource.as_ref(), finalizer).await?;
        ctx.event(
            resource.as_ref(),
            EventRecord::normal("Finalized", format!("Removed finalizer {}", finalizer)),
        )
        .await;
        Ok(ReconcileResult::done())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
