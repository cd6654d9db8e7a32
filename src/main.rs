// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Event;
use kube::Client;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use keel::client::{KubeResourceClient, ResourceClient};
use keel::config::Config;
use keel::constants::{OPERATOR_NAME, WIDGET_FINALIZER, WIDGET_VALIDATE_PATH};
use keel::controller::{Controller, ControllerConfig, Predicate};
use keel::events::EventRecorder;
use keel::kubernetes::wait_for_crd;
use keel::operator::Operator;
use keel::reconcilers::{WidgetReconciler, WidgetValidator};
use keel::types::Widget;
use keel::webhook::WebhookServer;

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().nth(1).as_deref() == Some("crd") {
        return print_crd();
    }

    init_logging();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting keel operator");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        namespace = config.watch_namespace.as_deref().unwrap_or("all"),
        workers = config.workers,
        "Configuration loaded"
    );

    let metrics_handle =
        keel::metrics::install_prometheus().context("Failed to install Prometheus recorder")?;

    // Create Kubernetes client
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    // Wait for the Widget CRD before starting the controller
    info!("Waiting for Widget CRD to become available...");
    wait_for_crd::<Widget>(&client).await?;

    let events = Arc::new(KubeResourceClient::<Event>::new(client.clone(), OPERATOR_NAME));
    let recorder = EventRecorder::new(events, config.event_reporter.clone());

    let widgets: Arc<dyn ResourceClient<Widget>> =
        Arc::new(KubeResourceClient::<Widget>::new(client.clone(), OPERATOR_NAME));
    let deployments = Arc::new(KubeResourceClient::<Deployment>::new(client, OPERATOR_NAME));
    let controller = Controller::new(
        widgets,
        WidgetReconciler::new(deployments),
        recorder,
        ControllerConfig::from_config("widgets", &config).with_finalizer(WIDGET_FINALIZER),
    )
    .with_predicate(Predicate::GenerationChanged);

    let mut operator = Operator::new()
        .with_metrics(config.metrics_addr, Some(metrics_handle))
        .with_health(config.health_addr)
        .with_leader_election(config.leader_election.clone());
    if let Some(addr) = config.webhook_addr {
        let mut webhook = WebhookServer::new();
        webhook.register_validating(WIDGET_VALIDATE_PATH, WidgetValidator)?;
        operator = operator.with_webhook(addr, webhook);
    } else {
        warn!("WEBHOOK_ADDR not set, admission webhook disabled");
    }
    operator.add_controller(Arc::new(controller))?;

    let stop = operator.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            stop.cancel();
        }
    });

    operator.start().await.context("Operator failed")?;
    Ok(())
}

/// Initialize logging; `LOG_JSON=true` switches to JSON lines
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_JSON").is_ok_and(|v| v == "true");
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Print the Widget CRD YAML for installation
fn print_crd() -> Result<()> {
    use kube::CustomResourceExt;

    let yaml = serde_yaml::to_string(&Widget::crd())?;
    println!("{}", yaml);
    Ok(())
}
