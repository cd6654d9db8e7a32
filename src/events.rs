// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes Event publishing.
//!
//! Recording is fire-and-forget: a failed write is logged and otherwise ignored, it
//! never fails the reconcile that produced it.

use crate::client::{ObjectResource, ResourceClient};
use chrono::Utc;
use k8s_openapi::api::core::v1::{Event, EventSource};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub type_: EventType,
    /// Short CamelCase cause, e.g. `ReconcileFailed`.
    pub reason: String,
    pub message: String,
}

impl EventRecord {
    pub fn normal(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Normal,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn warning(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Warning,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct EventRecorder {
    events: Arc<dyn ResourceClient<Event>>,
    reporter: String,
}

impl EventRecorder {
    pub fn new(events: Arc<dyn ResourceClient<Event>>, reporter: impl Into<String>) -> Self {
        Self {
            events,
            reporter: reporter.into(),
        }
    }

    pub fn reporter(&self) -> &str {
        &self.reporter
    }

    /// Publishes `record` against `resource`.
    pub async fn event<K: ObjectResource>(&self, resource: &K, record: EventRecord) {
        let event = self.build(resource, &record);
        let namespace = event.metadata.namespace.clone();

        match self.events.create(namespace.as_deref(), &event).await {
            Ok(_) => debug!(
                object = %resource.name_any(),
                reason = %record.reason,
                "Recorded {} event",
                record.type_
            ),
            Err(e) => warn!(
                object = %resource.name_any(),
                reason = %record.reason,
                error = %e,
                "Failed to record event"
            ),
        }
    }

    fn build<K: ObjectResource>(&self, resource: &K, record: &EventRecord) -> Event {
        let now = Time(Utc::now());
        let namespace = resource
            .namespace()
            .unwrap_or_else(|| "default".to_string());

        Event {
            metadata: ObjectMeta {
                name: Some(format!(
                    "{}.{}",
                    resource.name_any(),
                    uuid::Uuid::new_v4().simple()
                )),
                namespace: Some(namespace),
                ..Default::default()
            },
            involved_object: resource.object_ref(&()),
            type_: Some(record.type_.to_string()),
            reason: Some(record.reason.clone()),
            message: Some(record.message.clone()),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            source: Some(EventSource {
                component: Some(self.reporter.clone()),
                host: None,
            }),
            reporting_component: Some(self.reporter.clone()),
            ..Default::default()
        }
    }
}
