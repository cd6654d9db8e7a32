// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! List-then-watch cache of one resource collection.
//!
//! The informer seeds its cache with a list, then follows a watch stream from the
//! list's resource version. A dropped stream is resumed from the last version seen;
//! an expired version (410 Gone) forces a fresh list whose differences against the
//! cache are emitted as events, so nothing that happened during the gap is lost.

use crate::client::{
    resource_version, ObjectKey, ObjectResource, ResourceClient, WatchEvent, WatchStream,
};
use crate::error::ClientError;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Change observed by the informer, after it has been applied to the cache.
#[derive(Debug, Clone)]
pub enum InformerEvent<K> {
    Added(Arc<K>),
    Modified { old: Option<Arc<K>>, new: Arc<K> },
    Deleted(Arc<K>),
}

impl<K: ObjectResource> InformerEvent<K> {
    pub fn object(&self) -> &Arc<K> {
        match self {
            InformerEvent::Added(obj) | InformerEvent::Deleted(obj) => obj,
            InformerEvent::Modified { new, .. } => new,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::from_obj(self.object().as_ref())
    }
}

/// Read handle on the informer cache. Only the owning informer writes to it.
pub struct Store<K> {
    objects: Arc<RwLock<HashMap<ObjectKey, Arc<K>>>>,
}

impl<K> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            objects: Arc::clone(&self.objects),
        }
    }
}

impl<K: ObjectResource> Store<K> {
    fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<K>> {
        self.objects.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn upsert(&self, obj: K) -> InformerEvent<K> {
        let key = ObjectKey::from_obj(&obj);
        let new = Arc::new(obj);
        match self.objects.write().await.insert(key, Arc::clone(&new)) {
            Some(old) => InformerEvent::Modified {
                old: Some(old),
                new,
            },
            None => InformerEvent::Added(new),
        }
    }

    async fn remove(&self, obj: K) -> InformerEvent<K> {
        let key = ObjectKey::from_obj(&obj);
        self.objects.write().await.remove(&key);
        InformerEvent::Deleted(Arc::new(obj))
    }

    /// Swaps in a fresh listing and returns what changed relative to the old contents.
    async fn replace(&self, items: Vec<K>) -> Vec<InformerEvent<K>> {
        let fresh: HashMap<ObjectKey, Arc<K>> = items
            .into_iter()
            .map(|obj| (ObjectKey::from_obj(&obj), Arc::new(obj)))
            .collect();

        let mut objects = self.objects.write().await;
        let previous = std::mem::replace(&mut *objects, fresh.clone());
        drop(objects);

        let mut events = Vec::new();
        for (key, obj) in &fresh {
            match previous.get(key) {
                None => events.push(InformerEvent::Added(Arc::clone(obj))),
                Some(old) if resource_version(old.as_ref()) != resource_version(obj.as_ref()) => {
                    events.push(InformerEvent::Modified {
                        old: Some(Arc::clone(old)),
                        new: Arc::clone(obj),
                    })
                }
                Some(_) => {}
            }
        }
        for (key, obj) in previous {
            if !fresh.contains_key(&key) {
                events.push(InformerEvent::Deleted(obj));
            }
        }
        events
    }
}

enum WatchOutcome {
    /// Stream ended or failed; resume from the contained version.
    Disconnected(String),
    /// The version is too old to resume from; a re-list is needed.
    Expired,
    Cancelled,
}

pub struct Informer<K> {
    client: Arc<dyn ResourceClient<K>>,
    namespace: Option<String>,
    store: Store<K>,
    reconnect_backoff: Duration,
    synced: Arc<AtomicBool>,
}

impl<K: ObjectResource> Informer<K> {
    pub fn new(
        client: Arc<dyn ResourceClient<K>>,
        namespace: Option<String>,
        reconnect_backoff: Duration,
    ) -> Self {
        Self {
            client,
            namespace,
            store: Store::new(),
            reconnect_backoff,
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    /// Cached copy of `namespace/name`; never a live fetch.
    pub async fn get(&self, name: &str, namespace: Option<&str>) -> Option<Arc<K>> {
        self.store.get(&ObjectKey::new(namespace, name)).await
    }

    /// Whether the first list has completed.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Keeps the cache current until `shutdown` fires. Every applied change is sent on
    /// `events`; the channel is unbounded so the watch loop never waits on its consumer.
    pub async fn run(
        &self,
        events: mpsc::UnboundedSender<InformerEvent<K>>,
        shutdown: CancellationToken,
    ) {
        let kind = K::kind(&()).to_string();
        info!(
            kind = %kind,
            namespace = self.namespace.as_deref().unwrap_or("all"),
            "Starting informer"
        );

        let mut resume_from: Option<String> = None;
        loop {
            let version = match resume_from.take() {
                Some(version) => version,
                None => match self.relist(&events, &shutdown).await {
                    Some(Ok(version)) => version,
                    Some(Err(e)) => {
                        warn!(kind = %kind, error = %e, "List failed, retrying");
                        if !self.backoff(&shutdown).await {
                            break;
                        }
                        continue;
                    }
                    None => break,
                },
            };

            match self.watch_from(version, &events, &shutdown).await {
                WatchOutcome::Cancelled => break,
                WatchOutcome::Expired => {
                    info!(kind = %kind, "Watch version expired, re-listing");
                }
                WatchOutcome::Disconnected(version) => {
                    debug!(kind = %kind, resource_version = %version, "Watch ended, reconnecting");
                    resume_from = Some(version);
                    if !self.backoff(&shutdown).await {
                        break;
                    }
                }
            }
        }

        info!(kind = %kind, "Informer stopped");
    }

    /// Returns `None` when cancelled.
    async fn relist(
        &self,
        events: &mpsc::UnboundedSender<InformerEvent<K>>,
        shutdown: &CancellationToken,
    ) -> Option<Result<String, ClientError>> {
        let listed = tokio::select! {
            _ = shutdown.cancelled() => return None,
            listed = self.client.list(self.namespace.as_deref()) => listed,
        };
        let list = match listed {
            Ok(list) => list,
            Err(e) => return Some(Err(e)),
        };

        let changes = self.store.replace(list.items).await;
        debug!(
            changes = changes.len(),
            resource_version = %list.resource_version,
            "Cache re-listed"
        );
        for event in changes {
            // The receiver is gone only while the controller shuts down.
            let _ = events.send(event);
        }
        self.synced.store(true, Ordering::Release);
        Some(Ok(list.resource_version))
    }

    async fn watch_from(
        &self,
        mut version: String,
        events: &mpsc::UnboundedSender<InformerEvent<K>>,
        shutdown: &CancellationToken,
    ) -> WatchOutcome {
        let opened = tokio::select! {
            _ = shutdown.cancelled() => return WatchOutcome::Cancelled,
            opened = self.client.watch(self.namespace.as_deref(), &version) => opened,
        };
        let mut stream: WatchStream<K> = match opened {
            Ok(stream) => stream,
            Err(ClientError::Gone(_)) => return WatchOutcome::Expired,
            Err(e) => {
                warn!(error = %e, "Failed to open watch");
                return WatchOutcome::Disconnected(version);
            }
        };

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return WatchOutcome::Cancelled,
                next = stream.next() => next,
            };
            let event = match next {
                None => return WatchOutcome::Disconnected(version),
                Some(Ok(event)) => event,
                Some(Err(ClientError::Gone(_))) => return WatchOutcome::Expired,
                Some(Err(e)) => {
                    warn!(error = %e, "Watch stream failed");
                    return WatchOutcome::Disconnected(version);
                }
            };

            let applied = match event {
                WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                    advance(&mut version, &obj);
                    self.store.upsert(obj).await
                }
                WatchEvent::Deleted(obj) => {
                    advance(&mut version, &obj);
                    self.store.remove(obj).await
                }
                WatchEvent::Bookmark(bookmark) => {
                    if !bookmark.is_empty() {
                        version = bookmark;
                    }
                    continue;
                }
                WatchEvent::Error { code: 410, .. } => return WatchOutcome::Expired,
                WatchEvent::Error { code, message } => {
                    warn!(code, message = %message, "Watch returned an error");
                    return WatchOutcome::Disconnected(version);
                }
            };
            let _ = events.send(applied);
        }
    }

    /// Sleeps for the reconnect backoff; `false` if cancelled meanwhile.
    async fn backoff(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.reconnect_backoff) => true,
        }
    }
}

fn advance<K: ObjectResource>(version: &mut String, obj: &K) {
    let seen = resource_version(obj);
    if !seen.is_empty() {
        *version = seen;
    }
}
