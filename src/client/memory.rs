// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! In-process resource store implementing the same contract as the API server:
//! monotonic resource versions, generation bumps on spec change, finalizer-gated
//! deletion, merge-patch with resourceVersion preconditions and resumable watches
//! over a bounded event history.

use super::{
    resource_version, ObjectKey, ObjectList, ObjectResource, ResourceClient, WatchEvent,
    WatchStream,
};
use crate::error::ClientError;
use async_trait::async_trait;
use chrono::Utc;
use futures::{stream, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Resource;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_HISTORY_LIMIT: usize = 1000;
const BROADCAST_CAPACITY: usize = 1024;

type Revisioned<K> = (u64, WatchEvent<K>);

struct StoreState<K> {
    objects: BTreeMap<ObjectKey, K>,
    revision: u64,
    history: VecDeque<Revisioned<K>>,
    history_limit: usize,
    /// Watches must start at or after this revision.
    oldest_resumable: u64,
    sender: broadcast::Sender<Revisioned<K>>,
    writes: u64,
}

#[derive(Clone)]
pub struct MemoryClient<K> {
    state: Arc<Mutex<StoreState<K>>>,
}

impl<K: ObjectResource> Default for MemoryClient<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ObjectResource> MemoryClient<K> {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Keep at most `limit` events for watch resumption.
    pub fn with_history_limit(limit: usize) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(StoreState {
                objects: BTreeMap::new(),
                revision: 0,
                history: VecDeque::new(),
                history_limit: limit.max(1),
                oldest_resumable: 0,
                sender,
                writes: 0,
            })),
        }
    }

    /// Number of successful mutating calls so far.
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    pub fn current_revision(&self) -> u64 {
        self.lock().revision
    }

    /// Ends every open watch stream, as a dropped connection would.
    pub fn disconnect_watchers(&self) {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        self.lock().sender = sender;
    }

    /// Forgets the event history so that resuming from any earlier version fails with `Gone`.
    pub fn compact(&self) {
        let mut state = self.lock();
        state.history.clear();
        state.oldest_resumable = state.revision;
    }

    fn lock(&self) -> MutexGuard<'_, StoreState<K>> {
        // A poisoned lock only means another test thread panicked mid-write.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn kind<K: ObjectResource>() -> String {
    K::kind(&()).to_string()
}

fn not_found<K: ObjectResource>(key: &ObjectKey) -> ClientError {
    ClientError::NotFound {
        kind: kind::<K>(),
        key: key.to_string(),
    }
}

fn to_value<K: ObjectResource>(obj: &K) -> Result<Value, ClientError> {
    serde_json::to_value(obj).map_err(|e| ClientError::Invalid(e.to_string()))
}

fn from_value<K: ObjectResource>(value: Value) -> Result<K, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Invalid(e.to_string()))
}

fn spec_of(value: &Value) -> Option<&Value> {
    value.get("spec")
}

fn event_namespace<K: Resource>(event: &WatchEvent<K>) -> Option<Option<&str>> {
    match event {
        WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => {
            Some(obj.meta().namespace.as_deref())
        }
        WatchEvent::Bookmark(_) | WatchEvent::Error { .. } => None,
    }
}

fn in_scope<K: Resource>(event: &WatchEvent<K>, namespace: Option<&str>) -> bool {
    match (namespace, event_namespace(event)) {
        (Some(ns), Some(obj_ns)) => obj_ns == Some(ns),
        _ => true,
    }
}

impl<K: ObjectResource> StoreState<K> {
    fn existing(&self, key: &ObjectKey) -> Result<&K, ClientError> {
        self.objects.get(key).ok_or_else(|| not_found::<K>(key))
    }

    fn record(&mut self, event: WatchEvent<K>) {
        let revision = self.revision;
        self.history.push_back((revision, event.clone()));
        while self.history.len() > self.history_limit {
            if let Some((dropped, _)) = self.history.pop_front() {
                self.oldest_resumable = dropped;
            }
        }
        // No receivers is fine; nobody is watching.
        let _ = self.sender.send((revision, event));
    }

    fn bump(&mut self, obj: &mut K) {
        self.revision += 1;
        self.writes += 1;
        obj.meta_mut().resource_version = Some(self.revision.to_string());
    }

    /// Stores `next` over `previous`, keeping server-owned metadata and status,
    /// and deletes the object once it is terminating with no finalizers left.
    fn replace(&mut self, key: ObjectKey, previous: &K, next: K, keep_status: bool) -> Result<K, ClientError> {
        let old_value = to_value(previous)?;
        let mut new_value = to_value(&next)?;
        if keep_status {
            match old_value.get("status") {
                Some(status) => new_value["status"] = status.clone(),
                None => {
                    if let Some(obj) = new_value.as_object_mut() {
                        obj.remove("status");
                    }
                }
            }
        }
        let spec_changed = spec_of(&old_value) != spec_of(&new_value);
        let mut obj: K = from_value(new_value)?;

        let prev = previous.meta();
        let meta = obj.meta_mut();
        meta.name = prev.name.clone();
        meta.namespace = prev.namespace.clone();
        meta.uid = prev.uid.clone();
        meta.creation_timestamp = prev.creation_timestamp.clone();
        meta.deletion_timestamp = prev.deletion_timestamp.clone();
        meta.generation = match (prev.generation, spec_changed) {
            (Some(generation), true) => Some(generation + 1),
            (generation, _) => generation,
        };

        self.bump(&mut obj);
        let terminating = obj.meta().deletion_timestamp.is_some();
        let finalizers_left = obj.meta().finalizers.as_ref().is_some_and(|f| !f.is_empty());
        if terminating && !finalizers_left {
            trace!(key = %key, "Last finalizer removed, deleting");
            self.objects.remove(&key);
            self.record(WatchEvent::Deleted(obj.clone()));
        } else {
            self.objects.insert(key, obj.clone());
            self.record(WatchEvent::Modified(obj.clone()));
        }
        Ok(obj)
    }

    fn check_version(&self, key: &ObjectKey, current: &K, requested: Option<&str>) -> Result<(), ClientError> {
        match requested {
            Some(rv) if !rv.is_empty() && rv != resource_version(current) => {
                Err(ClientError::Conflict {
                    key: key.to_string(),
                    message: format!(
                        "resource version {} does not match current {}",
                        rv,
                        resource_version(current)
                    ),
                })
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<K: ObjectResource> ResourceClient<K> for MemoryClient<K> {
    async fn list(&self, namespace: Option<&str>) -> Result<ObjectList<K>, ClientError> {
        let state = self.lock();
        let items = state
            .objects
            .iter()
            .filter(|(key, _)| namespace.is_none() || key.namespace.as_deref() == namespace)
            .map(|(_, obj)| obj.clone())
            .collect();
        Ok(ObjectList {
            items,
            resource_version: state.revision.to_string(),
        })
    }

    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K, ClientError> {
        let key = ObjectKey::new(namespace, name);
        self.lock().existing(&key).cloned()
    }

    async fn create(&self, namespace: Option<&str>, obj: &K) -> Result<K, ClientError> {
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or_else(|| ClientError::Invalid("metadata.name is required".to_string()))?;
        let key = ObjectKey::new(namespace, &name);

        let mut state = self.lock();
        if state.objects.contains_key(&key) {
            return Err(ClientError::Conflict {
                key: key.to_string(),
                message: format!("{} already exists", kind::<K>()),
            });
        }

        let mut created = obj.clone();
        let meta = created.meta_mut();
        meta.namespace = namespace.map(str::to_string);
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.generation = Some(1);
        meta.creation_timestamp = Some(Time(Utc::now()));
        meta.deletion_timestamp = None;

        state.bump(&mut created);
        state.objects.insert(key, created.clone());
        state.record(WatchEvent::Added(created.clone()));
        Ok(created)
    }

    async fn update(&self, namespace: Option<&str>, obj: &K) -> Result<K, ClientError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let key = ObjectKey::new(namespace, &name);

        let mut state = self.lock();
        let current = state.existing(&key)?.clone();
        state.check_version(&key, &current, obj.meta().resource_version.as_deref())?;
        state.replace(key, &current, obj.clone(), true)
    }

    async fn patch(
        &self,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<K, ClientError> {
        let key = ObjectKey::new(namespace, name);

        let mut state = self.lock();
        let current = state.existing(&key)?.clone();
        let requested = patch
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str);
        state.check_version(&key, &current, requested)?;

        let mut doc = to_value(&current)?;
        json_patch::merge(&mut doc, patch);
        let next: K = from_value(doc)?;
        state.replace(key, &current, next, true)
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), ClientError> {
        let key = ObjectKey::new(namespace, name);

        let mut state = self.lock();
        let mut obj = state.existing(&key)?.clone();
        let has_finalizers = obj.meta().finalizers.as_ref().is_some_and(|f| !f.is_empty());

        if has_finalizers {
            if obj.meta().deletion_timestamp.is_some() {
                return Ok(());
            }
            obj.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
            state.bump(&mut obj);
            state.objects.insert(key, obj.clone());
            state.record(WatchEvent::Modified(obj));
        } else {
            state.bump(&mut obj);
            state.objects.remove(&key);
            state.record(WatchEvent::Deleted(obj));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        namespace: Option<&str>,
        name: &str,
        status: &Value,
        resource_version: Option<&str>,
    ) -> Result<K, ClientError> {
        let key = ObjectKey::new(namespace, name);

        let mut state = self.lock();
        let current = state.existing(&key)?.clone();
        state.check_version(&key, &current, resource_version)?;
        let mut doc = to_value(&current)?;
        json_patch::merge(&mut doc, &serde_json::json!({ "status": status }));
        let next: K = from_value(doc)?;
        state.replace(key, &current, next, false)
    }

    async fn watch(
        &self,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream<K>, ClientError> {
        let state = self.lock();
        let from = if resource_version.is_empty() {
            state.revision
        } else {
            resource_version
                .parse::<u64>()
                .map_err(|_| ClientError::Invalid(format!("bad resource version {}", resource_version)))?
        };
        if from < state.oldest_resumable {
            return Err(ClientError::Gone(resource_version.to_string()));
        }

        let scope = namespace.map(str::to_string);
        let backlog: Vec<Result<WatchEvent<K>, ClientError>> = state
            .history
            .iter()
            .filter(|(revision, event)| *revision > from && in_scope(event, scope.as_deref()))
            .map(|(_, event)| Ok(event.clone()))
            .collect();
        let receiver = state.sender.subscribe();
        drop(state);

        let live = stream::unfold((receiver, scope), |(mut receiver, scope)| async move {
            loop {
                match receiver.recv().await {
                    Ok((_, event)) => {
                        if in_scope(&event, scope.as_deref()) {
                            return Some((Ok(event), (receiver, scope)));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        let event = WatchEvent::Error {
                            code: 410,
                            message: format!("watcher fell behind by {} events", missed),
                        };
                        return Some((Ok(event), (receiver, scope)));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream::iter(backlog).chain(live).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn make_configmap(name: &str, value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("key".to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_server_fields() {
        let store = MemoryClient::<ConfigMap>::new();
        let created = store.create(Some("default"), &make_configmap("a", "1")).await.unwrap();

        assert_eq!(created.metadata.namespace.as_deref(), Some("default"));
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_status_write_with_stale_version_conflicts() {
        let store = MemoryClient::<ConfigMap>::new();
        store.create(Some("default"), &make_configmap("a", "1")).await.unwrap();
        store
            .patch(Some("default"), "a", &serde_json::json!({ "data": { "key": "2" } }))
            .await
            .unwrap();
        let revision = store.current_revision();

        let err = store
            .update_status(Some("default"), "a", &serde_json::json!({}), Some("1"))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Conflict { .. }));
        assert_eq!(store.current_revision(), revision);
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let store = MemoryClient::<ConfigMap>::new();
        store.create(Some("default"), &make_configmap("a", "1")).await.unwrap();
        let err = store
            .create(Some("default"), &make_configmap("a", "2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_patch_with_stale_version_conflicts() {
        let store = MemoryClient::<ConfigMap>::new();
        store.create(Some("default"), &make_configmap("a", "1")).await.unwrap();
        store
            .patch(Some("default"), "a", &serde_json::json!({ "data": { "key": "2" } }))
            .await
            .unwrap();

        let err = store
            .patch(
                Some("default"),
                "a",
                &serde_json::json!({ "metadata": { "resourceVersion": "1" }, "data": { "key": "3" } }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_delete_with_finalizer_marks_terminating() {
        let store = MemoryClient::<ConfigMap>::new();
        let mut cm = make_configmap("a", "1");
        cm.metadata.finalizers = Some(vec!["example.com/f".to_string()]);
        store.create(Some("default"), &cm).await.unwrap();

        store.delete(Some("default"), "a").await.unwrap();
        let terminating = store.get(Some("default"), "a").await.unwrap();
        assert!(terminating.metadata.deletion_timestamp.is_some());

        store
            .patch(Some("default"), "a", &serde_json::json!({ "metadata": { "finalizers": [] } }))
            .await
            .unwrap();
        assert!(store.get(Some("default"), "a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_watch_resumes_from_version() {
        let store = MemoryClient::<ConfigMap>::new();
        store.create(Some("default"), &make_configmap("a", "1")).await.unwrap();
        store.create(Some("default"), &make_configmap("b", "1")).await.unwrap();

        let mut events = store.watch(Some("default"), "1").await.unwrap();
        match events.next().await {
            Some(Ok(WatchEvent::Added(cm))) => assert_eq!(cm.metadata.name.as_deref(), Some("b")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_watch_after_compaction_is_gone() {
        let store = MemoryClient::<ConfigMap>::new();
        store.create(Some("default"), &make_configmap("a", "1")).await.unwrap();
        store.create(Some("default"), &make_configmap("b", "1")).await.unwrap();
        store.compact();

        let err = store.watch(None, "1").await.err().unwrap();
        assert!(matches!(err, ClientError::Gone(_)));
        assert!(store.watch(None, "2").await.is_ok());
    }

    #[tokio::test]
    async fn test_history_limit_expires_old_versions() {
        let store = MemoryClient::<ConfigMap>::with_history_limit(2);
        for name in ["a", "b", "c", "d"] {
            store.create(Some("default"), &make_configmap(name, "1")).await.unwrap();
        }
        assert!(matches!(store.watch(None, "1").await.err(), Some(ClientError::Gone(_))));
        assert!(store.watch(None, "2").await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream() {
        let store = MemoryClient::<ConfigMap>::new();
        let mut events = store.watch(None, "").await.unwrap();
        store.disconnect_watchers();
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_metadata_patch_keeps_generation() {
        let store = MemoryClient::<ConfigMap>::new();
        store.create(Some("default"), &make_configmap("a", "1")).await.unwrap();
        let before = store.get(Some("default"), "a").await.unwrap();

        store
            .patch(Some("default"), "a", &serde_json::json!({ "metadata": { "labels": { "x": "y" } } }))
            .await
            .unwrap();
        let after = store.get(Some("default"), "a").await.unwrap();

        assert_eq!(before.metadata.generation, after.metadata.generation);
        assert_ne!(before.metadata.resource_version, after.metadata.resource_version);
    }
}
