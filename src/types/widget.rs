// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::controller::Condition;
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

/// Container image used when a Widget does not name one
pub const DEFAULT_IMAGE: &str = "nginx:1.27";

pub const PHASE_PENDING: &str = "Pending";
pub const PHASE_RUNNING: &str = "Running";

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(group = "example.com", version = "v1", kind = "Widget")]
#[kube(namespaced)]
#[kube(status = "WidgetStatus")]
#[kube(printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSpec {
    pub replicas: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Widget {
    /// Check if this widget is ready based on its status conditions
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.condition_type == "Ready" && c.is_true())
            })
    }

    pub fn image(&self) -> &str {
        self.spec.image.as_deref().unwrap_or(DEFAULT_IMAGE)
    }

    /// Name of the Deployment that runs this widget
    pub fn deployment_name(&self) -> String {
        format!("{}-widget", self.name_any())
    }

    /// Whether the status already reflects the current generation
    pub fn is_observed(&self) -> bool {
        let observed = self.status.as_ref().and_then(|s| s.observed_generation);
        observed.is_some() && observed == self.metadata.generation
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WidgetStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn make_widget(name: &str, status: Option<WidgetStatus>) -> Widget {
        Widget {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                generation: Some(2),
                ..Default::default()
            },
            spec: WidgetSpec {
                replicas: 3,
                image: None,
            },
            status,
        }
    }

    fn make_status(ready: bool, observed_generation: Option<i64>) -> WidgetStatus {
        WidgetStatus {
            phase: Some(PHASE_RUNNING.to_string()),
            observed_generation,
            conditions: Some(vec![Condition::new("Ready", ready, "Test", "test")]),
        }
    }

    #[test]
    fn test_is_ready_with_ready_condition() {
        let widget = make_widget("a", Some(make_status(true, None)));
        assert!(widget.is_ready());
    }

    #[test]
    fn test_is_ready_with_not_ready_condition() {
        let widget = make_widget("a", Some(make_status(false, None)));
        assert!(!widget.is_ready());
    }

    #[test]
    fn test_is_ready_with_no_status() {
        let widget = make_widget("a", None);
        assert!(!widget.is_ready());
    }

    #[test]
    fn test_image_fallback() {
        let mut widget = make_widget("a", None);
        assert_eq!(widget.image(), DEFAULT_IMAGE);

        widget.spec.image = Some("busybox:1.36".to_string());
        assert_eq!(widget.image(), "busybox:1.36");
    }

    #[test]
    fn test_deployment_name() {
        assert_eq!(make_widget("a", None).deployment_name(), "a-widget");
    }

    #[test]
    fn test_is_observed() {
        assert!(make_widget("a", Some(make_status(true, Some(2)))).is_observed());
        assert!(!make_widget("a", Some(make_status(true, Some(1)))).is_observed());
        assert!(!make_widget("a", None).is_observed());
    }

    #[test]
    fn test_spec_wire_format() {
        let value = serde_json::to_value(make_widget("a", None)).unwrap();
        assert_eq!(value["apiVersion"], "example.com/v1");
        assert_eq!(value["kind"], "Widget");
        assert_eq!(value["spec"]["replicas"], 3);
        assert!(value["spec"].get("image").is_none());
    }
}
