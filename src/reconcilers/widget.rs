// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Widget reconciler - keeps one owned Deployment per Widget at the requested scale.

use crate::client::ResourceClient;
use crate::constants::OPERATOR_NAME;
use crate::controller::{is_controlled_by, Condition, Context, ReconcileResult, Reconciler};
use crate::error::{ClientError, ReconcileError};
use crate::types::widget::{Widget, WidgetStatus, PHASE_PENDING, PHASE_RUNNING};
use crate::webhook::{AdmissionRequest, Operation, ValidatingHandler, Verdict, WebhookError};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const WIDGET_LABEL: &str = "example.com/widget";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const READY: &str = "Ready";

pub struct WidgetReconciler {
    deployments: Arc<dyn ResourceClient<Deployment>>,
}

impl WidgetReconciler {
    pub fn new(deployments: Arc<dyn ResourceClient<Deployment>>) -> Self {
        Self { deployments }
    }

    /// Creates or scales the widget's Deployment. Returns whether anything was written.
    async fn ensure_deployment(&self, widget: &Widget, ctx: &Context<Widget>) -> Result<bool, ReconcileError> {
        let namespace = widget.namespace();
        let name = widget.deployment_name();

        let existing = match self.deployments.get(namespace.as_deref(), &name).await {
            Ok(existing) => existing,
            Err(e) if e.is_not_found() => {
                let desired = desired_deployment(widget, ctx)?;
                info!(widget = %widget.name_any(), deployment = %name, "Creating deployment");
                self.deployments.create(namespace.as_deref(), &desired).await?;
                return Ok(true);
            }
            Err(e) => return Err(e.into()),
        };

        if !is_controlled_by(&existing.metadata, widget) {
            return Err(ReconcileError::InvalidResource(format!(
                "deployment {} exists and is not owned by widget {}",
                name,
                widget.name_any()
            )));
        }

        let spec = existing.spec.as_ref();
        let replicas = spec.and_then(|s| s.replicas);
        let image = spec
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.containers.first())
            .and_then(|c| c.image.as_deref());
        if replicas == Some(widget.spec.replicas) && image == Some(widget.image()) {
            debug!(deployment = %name, "Deployment up to date");
            return Ok(false);
        }

        info!(
            deployment = %name,
            replicas = widget.spec.replicas,
            image = widget.image(),
            "Updating deployment"
        );
        let patch = serde_json::json!({
            "spec": {
                "replicas": widget.spec.replicas,
                "template": { "spec": { "containers": [container(widget)] } },
            }
        });
        self.deployments.patch(namespace.as_deref(), &name, &patch).await?;
        Ok(true)
    }

    /// Writes the Ready condition, then `phase` and observedGeneration, skipping
    /// whatever the status already says.
    async fn report(
        &self,
        widget: &Widget,
        ctx: &Context<Widget>,
        phase: &str,
        ready: Condition,
    ) -> Result<(), ReconcileError> {
        let current = widget.status.clone().unwrap_or_default();
        let condition_current = current.conditions.as_deref().unwrap_or_default().iter().any(|c| {
            c.condition_type == ready.condition_type
                && c.status == ready.status
                && c.reason == ready.reason
                && c.message == ready.message
        });
        if !condition_current {
            ctx.update_condition(widget, ready).await?;
        }

        if current.phase.as_deref() != Some(phase) || !widget.is_observed() {
            let status = WidgetStatus {
                phase: Some(phase.to_string()),
                observed_generation: widget.metadata.generation,
                conditions: None,
            };
            ctx.update_status(widget, &status).await?;
        }
        Ok(())
    }
}

fn labels(widget: &Widget) -> BTreeMap<String, String> {
    BTreeMap::from([
        (WIDGET_LABEL.to_string(), widget.name_any()),
        (MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string()),
    ])
}

fn container(widget: &Widget) -> Container {
    Container {
        name: "widget".to_string(),
        image: Some(widget.image().to_string()),
        ..Default::default()
    }
}

fn desired_deployment(widget: &Widget, ctx: &Context<Widget>) -> Result<Deployment, ClientError> {
    let labels = labels(widget);
    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(widget.deployment_name()),
            namespace: widget.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![ctx.owner_reference(widget)?]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(widget.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    WIDGET_LABEL.to_string(),
                    widget.name_any(),
                )])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container(widget)],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[async_trait]
impl Reconciler<Widget> for WidgetReconciler {
    async fn reconcile(
        &self,
        widget: Arc<Widget>,
        ctx: &Context<Widget>,
    ) -> Result<ReconcileResult, ReconcileError> {
        let generation = widget.metadata.generation;

        if widget.spec.replicas < 0 {
            let message = format!("spec.replicas must not be negative, got {}", widget.spec.replicas);
            let condition = Condition::new(READY, false, "InvalidSpec", &message)
                .with_observed_generation(generation);
            self.report(&widget, ctx, PHASE_PENDING, condition).await?;
            return Ok(ReconcileResult::done());
        }

        self.ensure_deployment(&widget, ctx).await?;

        let condition = Condition::new(
            READY,
            true,
            "DeploymentConfigured",
            &format!("Deployment {} runs {} replicas", widget.deployment_name(), widget.spec.replicas),
        )
        .with_observed_generation(generation);
        self.report(&widget, ctx, PHASE_RUNNING, condition).await?;

        Ok(ReconcileResult::done())
    }

    async fn finalize(&self, widget: Arc<Widget>, _ctx: &Context<Widget>) -> Result<(), ReconcileError> {
        let name = widget.deployment_name();
        match self.deployments.delete(widget.namespace().as_deref(), &name).await {
            Ok(()) => {
                info!(widget = %widget.name_any(), deployment = %name, "Deleted deployment");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Rejects Widgets that ask for a negative replica count.
pub struct WidgetValidator;

#[async_trait]
impl ValidatingHandler for WidgetValidator {
    async fn validate(&self, request: &AdmissionRequest) -> Result<Verdict, WebhookError> {
        if !matches!(request.operation, Operation::Create | Operation::Update) {
            return Ok(Verdict::allow());
        }
        let widget: Widget = request
            .object_as()?
            .ok_or_else(|| WebhookError::InvalidReview("request carries no object".to_string()))?;

        if widget.spec.replicas < 0 {
            return Ok(Verdict::deny(format!(
                "spec.replicas must not be negative, got {}",
                widget.spec.replicas
            )));
        }
        Ok(Verdict::allow())
    }
}
