// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Typed CRUD and watch primitives against a resource store.

pub mod cluster;
pub mod memory;

pub use cluster::KubeResourceClient;
pub use memory::MemoryClient;

use crate::error::ClientError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::fmt::Debug;

/// Bound shared by every resource type the framework can reconcile.
pub trait ObjectResource:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> ObjectResource for K where
    K: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Composite `(namespace, name)` identity of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self::new(Some(namespace), name)
    }

    pub fn cluster(name: &str) -> Self {
        Self::new(None, name)
    }

    pub fn from_obj<K: Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A list response together with the collection's resource version.
#[derive(Debug, Clone)]
pub struct ObjectList<K> {
    pub items: Vec<K>,
    pub resource_version: String,
}

/// Change notification delivered by a watch stream.
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// Progress marker carrying only a resource version.
    Bookmark(String),
    /// Server-side error, `code` follows HTTP semantics (410 means the version expired).
    Error { code: u16, message: String },
}

pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>, ClientError>>;

/// CRUD and watch operations the controller core needs from a store.
///
/// `namespace` is `None` for cluster-scoped access (or all namespaces when listing).
/// Patches use JSON merge-patch semantics.
#[async_trait]
pub trait ResourceClient<K: ObjectResource>: Send + Sync {
    async fn list(&self, namespace: Option<&str>) -> Result<ObjectList<K>, ClientError>;

    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K, ClientError>;

    async fn create(&self, namespace: Option<&str>, obj: &K) -> Result<K, ClientError>;

    async fn update(&self, namespace: Option<&str>, obj: &K) -> Result<K, ClientError>;

    async fn patch(
        &self,
        namespace: Option<&str>,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, ClientError>;

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), ClientError>;

    /// Merge `status` into the status sub-resource only. With `resource_version` set
    /// the write fails with `Conflict` unless the stored object is still at that version.
    async fn update_status(
        &self,
        namespace: Option<&str>,
        name: &str,
        status: &serde_json::Value,
        resource_version: Option<&str>,
    ) -> Result<K, ClientError>;

    async fn watch(
        &self,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream<K>, ClientError>;
}

/// Resource version of an object, empty when unset.
pub fn resource_version<K: Resource>(obj: &K) -> String {
    obj.meta().resource_version.clone().unwrap_or_default()
}
