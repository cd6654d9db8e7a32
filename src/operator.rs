// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Process-level coordinator: controllers, the webhook server and the
//! metrics/health endpoints, started together and stopped in order.

use crate::client::ObjectResource;
use crate::config::LeaderElectionConfig;
use crate::controller::{Controller, Reconciler};
use crate::error::{KeelError, Result};
use crate::server::{self, HealthRouter, MetricsRouter, ReadinessCheck};
use crate::webhook::WebhookServer;
use async_trait::async_trait;
use kube::core::GroupVersionKind;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Type-erased controller as seen by the operator.
#[async_trait]
pub trait ManagedController: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn gvk(&self) -> GroupVersionKind;

    fn has_synced(&self) -> bool;

    /// Runs until `shutdown` fires and in-flight work has drained.
    async fn run(self: Arc<Self>, shutdown: CancellationToken);
}

#[async_trait]
impl<K: ObjectResource, R: Reconciler<K>> ManagedController for Controller<K, R> {
    fn name(&self) -> &str {
        Controller::name(self)
    }

    fn gvk(&self) -> GroupVersionKind {
        Controller::gvk(self)
    }

    fn has_synced(&self) -> bool {
        Controller::has_synced(self)
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        Controller::run(self, shutdown).await
    }
}

fn gvk_key(gvk: &GroupVersionKind) -> String {
    format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
}

#[derive(Default)]
pub struct Operator {
    controllers: Vec<Arc<dyn ManagedController>>,
    registered: HashSet<String>,
    webhook: Option<(SocketAddr, Arc<WebhookServer>)>,
    metrics: Option<(SocketAddr, Option<PrometheusHandle>)>,
    health_addr: Option<SocketAddr>,
    leader_election: LeaderElectionConfig,
    stop: CancellationToken,
}

impl Operator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a controller. Each group/version/kind may be managed by one controller only.
    pub fn add_controller<C: ManagedController>(&mut self, controller: Arc<C>) -> Result<()> {
        let key = gvk_key(&controller.gvk());
        if !self.registered.insert(key.clone()) {
            return Err(KeelError::DuplicateResource(key));
        }
        info!(controller = controller.name(), gvk = %key, "Registered controller");
        self.controllers.push(controller);
        Ok(())
    }

    pub fn with_webhook(mut self, addr: SocketAddr, webhook: WebhookServer) -> Self {
        self.webhook = Some((addr, Arc::new(webhook)));
        self
    }

    /// Serves `/metrics` on `addr`, rendered from `handle` when a recorder is installed.
    pub fn with_metrics(mut self, addr: SocketAddr, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = Some((addr, handle));
        self
    }

    pub fn with_health(mut self, addr: SocketAddr) -> Self {
        self.health_addr = Some(addr);
        self
    }

    pub fn with_leader_election(mut self, config: LeaderElectionConfig) -> Self {
        self.leader_election = config;
        self
    }

    pub fn controller_names(&self) -> Vec<&str> {
        self.controllers.iter().map(|c| c.name()).collect()
    }

    /// Whether every controller's informer has completed its first list.
    pub fn is_ready(&self) -> bool {
        self.controllers.iter().all(|c| c.has_synced())
    }

    /// Token that ends `start` when cancelled; handy for signal handlers.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn stop(&self) {
        info!("Operator stop requested");
        self.stop.cancel();
    }

    /// Brings up auxiliary endpoints, then the webhook server, then every controller,
    /// and blocks until `stop`. Shutdown runs in the opposite order.
    pub async fn start(&self) -> Result<()> {
        if self.leader_election.enabled {
            warn!(
                lease = %self.leader_election.lease_name,
                namespace = %self.leader_election.lease_namespace,
                "Leader election is configured but not performed; running as leader"
            );
        }

        let aux_token = CancellationToken::new();
        let aux_tasks = match self.start_aux(&aux_token).await {
            Ok(tasks) => tasks,
            Err(e) => {
                aux_token.cancel();
                return Err(e);
            }
        };

        let webhook_token = CancellationToken::new();
        let mut webhook_task = None;
        if let Some((addr, webhook)) = &self.webhook {
            let listener = match server::bind(*addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    aux_token.cancel();
                    join_servers(aux_tasks).await;
                    return Err(e);
                }
            };
            webhook_task = Some(tokio::spawn(
                Arc::clone(webhook).serve(listener, webhook_token.clone()),
            ));
        }

        let controllers_token = CancellationToken::new();
        let controller_tasks: Vec<_> = self
            .controllers
            .iter()
            .map(|c| {
                let controller = Arc::clone(c);
                let token = controllers_token.clone();
                tokio::spawn(async move { controller.run(token).await })
            })
            .collect();
        info!(controllers = controller_tasks.len(), "Operator started");

        self.stop.cancelled().await;
        info!("Stopping operator");

        controllers_token.cancel();
        for task in controller_tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Controller task failed");
            }
        }

        webhook_token.cancel();
        if let Some(task) = webhook_task {
            join_servers(vec![task]).await;
        }

        aux_token.cancel();
        join_servers(aux_tasks).await;

        info!("Operator stopped");
        Ok(())
    }

    async fn start_aux(&self, token: &CancellationToken) -> Result<Vec<JoinHandle<Result<()>>>> {
        let mut tasks = Vec::new();

        if let Some((addr, handle)) = &self.metrics {
            let listener = server::bind(*addr).await?;
            let router = Arc::new(MetricsRouter::new(handle.clone()));
            tasks.push(tokio::spawn(server::serve("metrics", listener, router, token.clone())));
        }

        if let Some(addr) = self.health_addr {
            let listener = match server::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    token.cancel();
                    join_servers(tasks).await;
                    return Err(e);
                }
            };
            let controllers = self.controllers.clone();
            let ready: ReadinessCheck = Arc::new(move || controllers.iter().all(|c| c.has_synced()));
            let router = Arc::new(HealthRouter::new(ready));
            tasks.push(tokio::spawn(server::serve("health", listener, router, token.clone())));
        }

        Ok(tasks)
    }
}

async fn join_servers(tasks: Vec<JoinHandle<Result<()>>>) {
    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
            Err(e) => error!(error = %e, "HTTP server task failed"),
        }
    }
}
