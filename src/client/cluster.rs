// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resource client backed by a live API server through `kube::Api`.

use super::{ObjectList, ObjectResource, ResourceClient, WatchEvent, WatchStream};
use crate::error::ClientError;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{
    DeleteParams, ListParams, Patch, PatchParams, PostParams, WatchEvent as ApiWatchEvent,
    WatchParams,
};
use kube::{Api, Client, Resource};
use std::marker::PhantomData;
use tracing::{debug, instrument};

/// Server-side watch timeout; the informer reconnects when the server closes the stream.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// Picks the right `Api` constructor for a resource's scope.
pub trait ScopedApi {
    fn api<K>(client: Client, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>;
}

impl ScopedApi for NamespaceResourceScope {
    fn api<K>(client: Client, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>,
    {
        match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        }
    }
}

impl ScopedApi for ClusterResourceScope {
    fn api<K>(client: Client, _namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>,
    {
        Api::all(client)
    }
}

pub struct KubeResourceClient<K> {
    client: Client,
    field_manager: String,
    _resource: PhantomData<fn() -> K>,
}

impl<K> KubeResourceClient<K>
where
    K: ObjectResource,
    K::Scope: ScopedApi,
{
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            field_manager: field_manager.to_string(),
            _resource: PhantomData,
        }
    }

    fn api(&self, namespace: Option<&str>) -> Api<K> {
        <K::Scope as ScopedApi>::api(self.client.clone(), namespace)
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

fn object_name<K: Resource>(obj: &K) -> Result<String, ClientError> {
    obj.meta()
        .name
        .clone()
        .ok_or_else(|| ClientError::Invalid("object has no metadata.name".to_string()))
}

fn convert_event<K>(event: ApiWatchEvent<K>) -> WatchEvent<K> {
    match event {
        ApiWatchEvent::Added(obj) => WatchEvent::Added(obj),
        ApiWatchEvent::Modified(obj) => WatchEvent::Modified(obj),
        ApiWatchEvent::Deleted(obj) => WatchEvent::Deleted(obj),
        ApiWatchEvent::Bookmark(bookmark) => {
            WatchEvent::Bookmark(bookmark.metadata.resource_version)
        }
        ApiWatchEvent::Error(err) => WatchEvent::Error {
            code: err.code,
            message: err.message,
        },
    }
}

#[async_trait]
impl<K> ResourceClient<K> for KubeResourceClient<K>
where
    K: ObjectResource,
    K::Scope: ScopedApi,
{
    #[instrument(skip(self), fields(kind = %K::kind(&())))]
    async fn list(&self, namespace: Option<&str>) -> Result<ObjectList<K>, ClientError> {
        let list = self.api(namespace).list(&ListParams::default()).await?;
        let resource_version = list.metadata.resource_version.unwrap_or_default();
        debug!(
            count = list.items.len(),
            resource_version = %resource_version,
            "Listed resources"
        );
        Ok(ObjectList {
            items: list.items,
            resource_version,
        })
    }

    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K, ClientError> {
        Ok(self.api(namespace).get(name).await?)
    }

    async fn create(&self, namespace: Option<&str>, obj: &K) -> Result<K, ClientError> {
        Ok(self.api(namespace).create(&self.post_params(), obj).await?)
    }

    async fn update(&self, namespace: Option<&str>, obj: &K) -> Result<K, ClientError> {
        let name = object_name(obj)?;
        Ok(self
            .api(namespace)
            .replace(&name, &self.post_params(), obj)
            .await?)
    }

    async fn patch(
        &self,
        namespace: Option<&str>,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, ClientError> {
        Ok(self
            .api(namespace)
            .patch(name, &self.patch_params(), &Patch::Merge(patch))
            .await?)
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), ClientError> {
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        namespace: Option<&str>,
        name: &str,
        status: &serde_json::Value,
        resource_version: Option<&str>,
    ) -> Result<K, ClientError> {
        let mut patch = serde_json::json!({ "status": status });
        if let Some(rv) = resource_version {
            patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
        }
        Ok(self
            .api(namespace)
            .patch_status(name, &self.patch_params(), &Patch::Merge(&patch))
            .await?)
    }

    async fn watch(
        &self,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream<K>, ClientError> {
        let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let stream = self.api(namespace).watch(&params, resource_version).await?;
        Ok(stream
            .map_ok(convert_event)
            .map_err(ClientError::from)
            .boxed())
    }
}
