// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Status sub-resource writes and Kubernetes-style condition lists.

use crate::client::{ObjectResource, ResourceClient};
use crate::error::ClientError;
use chrono::{SecondsFormat, Utc};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";
pub const CONDITION_UNKNOWN: &str = "Unknown";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(condition_type: &str, status: bool, reason: &str, message: &str) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status: if status { CONDITION_TRUE } else { CONDITION_FALSE }.to_string(),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            last_transition_time: None,
            observed_generation: None,
        }
    }

    pub fn with_observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == CONDITION_TRUE
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Replaces the condition of the same type or appends it. Every other entry is left
/// untouched. The transition time only moves when the status actually changes.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == new.condition_type)
    {
        Some(existing) => {
            if new.last_transition_time.is_none() {
                new.last_transition_time = if existing.status == new.status {
                    existing.last_transition_time.clone().or_else(|| Some(now()))
                } else {
                    Some(now())
                };
            }
            *existing = new;
        }
        None => {
            if new.last_transition_time.is_none() {
                new.last_transition_time = Some(now());
            }
            conditions.push(new);
        }
    }
}

/// Conditions currently recorded in `status.conditions`.
pub fn conditions_of<K: Serialize>(resource: &K) -> Result<Vec<Condition>, serde_json::Error> {
    let value = serde_json::to_value(resource)?;
    match value.pointer("/status/conditions") {
        Some(conditions) if !conditions.is_null() => serde_json::from_value(conditions.clone()),
        _ => Ok(Vec::new()),
    }
}

/// Writes `status` to the status sub-resource unconditionally; the spec is never touched.
pub async fn update_status<K, S>(
    client: &dyn ResourceClient<K>,
    resource: &K,
    status: &S,
) -> Result<K, ClientError>
where
    K: ObjectResource,
    S: Serialize + Sync + ?Sized,
{
    let status = serde_json::to_value(status).map_err(|e| ClientError::Invalid(e.to_string()))?;
    client
        .update_status(resource.namespace().as_deref(), &resource.name_any(), &status, None)
        .await
}

/// Merges `condition` into the resource's condition list and writes the full list back.
///
/// The write is conditional on `resource`'s resourceVersion: the list replaces the
/// stored one wholesale, so merging into a stale copy would drop conditions written
/// since. A stale copy fails with `Conflict` and the caller retries from a fresh read.
pub async fn update_condition<K: ObjectResource>(
    client: &dyn ResourceClient<K>,
    resource: &K,
    condition: Condition,
) -> Result<K, ClientError> {
    let mut conditions =
        conditions_of(resource).map_err(|e| ClientError::Invalid(e.to_string()))?;
    set_condition(&mut conditions, condition);
    let status = serde_json::json!({ "conditions": conditions });
    let resource_version = resource.resource_version();
    client
        .update_status(
            resource.namespace().as_deref(),
            &resource.name_any(),
            &status,
            resource_version.as_deref(),
        )
        .await
}
