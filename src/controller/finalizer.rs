// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Finalizer bookkeeping on resource metadata.
//!
//! Both writes are merge patches that carry the cached resourceVersion, so a patch
//! computed from a stale cache entry fails with a conflict instead of clobbering
//! finalizers another controller added meanwhile.

use crate::client::{resource_version, ObjectResource, ResourceClient};
use crate::error::ClientError;
use kube::ResourceExt;
use tracing::debug;

pub fn has_finalizer<K: ObjectResource>(resource: &K, finalizer: &str) -> bool {
    resource.finalizers().iter().any(|f| f == finalizer)
}

pub async fn add_finalizer<K: ObjectResource>(
    client: &dyn ResourceClient<K>,
    resource: &K,
    finalizer: &str,
) -> Result<K, ClientError> {
    let mut finalizers = resource.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    debug!(name = %resource.name_any(), finalizer, "Adding finalizer");
    patch_finalizers(client, resource, finalizers).await
}

/// Strips `finalizer`, leaving any other controllers' finalizers in place.
pub async fn remove_finalizer<K: ObjectResource>(
    client: &dyn ResourceClient<K>,
    resource: &K,
    finalizer: &str,
) -> Result<K, ClientError> {
    let finalizers: Vec<String> = resource
        .finalizers()
        .iter()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect();
    debug!(name = %resource.name_any(), finalizer, "Removing finalizer");
    patch_finalizers(client, resource, finalizers).await
}

async fn patch_finalizers<K: ObjectResource>(
    client: &dyn ResourceClient<K>,
    resource: &K,
    finalizers: Vec<String>,
) -> Result<K, ClientError> {
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": resource_version(resource),
        }
    });
    client
        .patch(resource.namespace().as_deref(), &resource.name_any(), &patch)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn make_configmap(finalizers: &[&str]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("a".to_string()),
                finalizers: Some(finalizers.iter().map(|f| f.to_string()).collect()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_add_then_remove_keeps_foreign_finalizers() {
        let store = MemoryClient::<ConfigMap>::new();
        let created = store
            .create(Some("default"), &make_configmap(&["other.io/keep"]))
            .await
            .unwrap();

        let added = add_finalizer(&store, &created, "example.com/f").await.unwrap();
        assert!(has_finalizer(&added, "example.com/f"));
        assert!(has_finalizer(&added, "other.io/keep"));

        let removed = remove_finalizer(&store, &added, "example.com/f").await.unwrap();
        assert_eq!(removed.finalizers(), ["other.io/keep".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_resource_conflicts() {
        let store = MemoryClient::<ConfigMap>::new();
        let stale = store.create(Some("default"), &make_configmap(&[])).await.unwrap();
        add_finalizer(&store, &stale, "other.io/first").await.unwrap();

        let err = add_finalizer(&store, &stale, "example.com/f").await.unwrap_err();

        assert!(matches!(err, ClientError::Conflict { .. }));
        let current = store.get(Some("default"), "a").await.unwrap();
        assert!(has_finalizer(&current, "other.io/first"));
    }
}
