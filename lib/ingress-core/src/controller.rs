//! Generic per-kind reconciliation controller
//!
//! Each declared resource kind gets one `Controller` wrapping a kind-specific
//! [`Reconciler`]. The controller owns the rate limited queue, drives the
//! resolve/translate/sync state machine and turns failures into requeues
//! and observability events.

use crate::cache::{meta_namespace_key, resource_version, split_meta_namespace_key};
use crate::error::{CoreError, LookupError, ReconcileError, SyncError, TranslateError};
use crate::event::{Event, EventKind};
use crate::informer::ResourceEventHandler;
use crate::recorder::{
    sync_failed_message, synced_message, EventRecorder, REASON_SYNCED, REASON_SYNC_ABORTED,
};
use crate::workqueue::{FastSlowRateLimiter, WorkQueue};
use async_trait::async_trait;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Kind-specific strategy plugged into a [`Controller`]
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Object: Resource<DynamicType = ()> + Clone + Send + Sync + 'static;
    type Output: Send + Sync;

    /// Kind name used in logs and event messages
    fn kind(&self) -> &'static str;

    /// Current state of the object from the cluster cache
    fn lookup(&self, namespace: &str, name: &str) -> Result<Arc<Self::Object>, LookupError>;

    /// Queue key of an object
    fn key(&self, obj: &Self::Object) -> String {
        meta_namespace_key(obj)
    }

    /// Whether a change to `obj` concerns this controller at all
    fn filter(&self, _obj: &Self::Object) -> bool {
        true
    }

    /// Whether a delete is outdated given the object currently cached under
    /// the same key
    fn is_stale_delete(&self, _current: &Self::Object, _tombstone: &Self::Object) -> bool {
        true
    }

    fn translate(
        &self,
        obj: &Self::Object,
        kind: EventKind,
    ) -> Result<Self::Output, TranslateError>;

    /// Local bookkeeping that must happen even if the gateway sync fails
    fn before_sync(&self, _obj: &Self::Object, _output: &Self::Output, _kind: EventKind) {}

    async fn sync(&self, output: &Self::Output, kind: EventKind) -> Result<(), SyncError>;

    /// Resolves once every cache the reconciler reads has synced
    async fn wait_for_cache_sync(&self) -> bool;
}

/// How a queue item ended without error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Synced,
    /// The object was removed before its event was processed
    Vanished,
    /// A delete for an object that was recreated meanwhile
    StaleDelete,
    /// An update older than what the cache already holds
    Superseded,
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub workers: usize,
    pub fast_retry_delay: Duration,
    pub slow_retry_delay: Duration,
    pub max_fast_attempts: u32,
    /// Empty means every namespace
    pub watching_namespaces: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            fast_retry_delay: Duration::from_secs(1),
            slow_retry_delay: Duration::from_secs(60),
            max_fast_attempts: 5,
            watching_namespaces: Vec::new(),
        }
    }
}

pub struct Controller<R: Reconciler> {
    reconciler: Arc<R>,
    queue: Arc<WorkQueue<Event<R::Object>>>,
    recorder: Arc<dyn EventRecorder>,
    workers: usize,
    namespaces: HashSet<String>,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(reconciler: Arc<R>, recorder: Arc<dyn EventRecorder>, config: ControllerConfig) -> Self {
        let limiter = FastSlowRateLimiter::new(
            config.fast_retry_delay,
            config.slow_retry_delay,
            config.max_fast_attempts,
        );
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new(limiter)),
            recorder,
            workers: config.workers.max(1),
            namespaces: config.watching_namespaces.into_iter().collect(),
        }
    }

    pub fn reconciler(&self) -> &Arc<R> {
        &self.reconciler
    }

    /// Failed attempts recorded for `key` since it was last forgotten
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.queue.num_requeues(key)
    }

    /// Namespace watch predicate
    pub fn is_watching(&self, namespace: &str) -> bool {
        self.namespaces.is_empty() || self.namespaces.contains(namespace)
    }

    /// Queue an event through the rate limiter; a pending event for the same
    /// key is replaced
    pub fn enqueue(&self, event: Event<R::Object>) {
        let key = event.key.clone();
        debug!(kind = self.reconciler.kind(), key = %key, event = %event.kind, "enqueue");
        self.queue.add_rate_limited(&key, event);
    }

    /// Queue a request to look at a key again. An event already pending for
    /// the key is kept, so a pending delete is never turned into an update.
    pub fn enqueue_if_absent(&self, event: Event<R::Object>) {
        let key = event.key.clone();
        debug!(kind = self.reconciler.kind(), key = %key, event = %event.kind, "enqueue if absent");
        self.queue.add_rate_limited_if_absent(&key, event);
    }

    fn accepts(&self, obj: &R::Object) -> bool {
        let namespace = obj.namespace().unwrap_or_default();
        if !self.is_watching(&namespace) {
            return false;
        }
        self.reconciler.filter(obj)
    }

    /// Wait for the caches, run the workers, and stop them once `shutdown`
    /// resolves. In-flight items are finished before returning.
    pub async fn run<F>(self: Arc<Self>, shutdown: F) -> Result<(), CoreError>
    where
        F: Future<Output = ()> + Send,
    {
        let kind = self.reconciler.kind();
        info!(kind, "controller started");
        tokio::pin!(shutdown);

        let synced = tokio::select! {
            synced = self.reconciler.wait_for_cache_sync() => synced,
            _ = &mut shutdown => {
                self.queue.shutdown();
                info!(kind, "controller exited before caches synced");
                return Ok(());
            }
        };
        if !synced {
            error!(kind, "informers sync failed");
            return Err(CoreError::Internal(format!("{} caches failed to sync", kind)));
        }

        let mut handles = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let this = Arc::clone(&self);
            handles.push(tokio::spawn(async move { this.run_worker(worker).await }));
        }

        shutdown.await;
        self.queue.shutdown();
        for handle in handles {
            if let Err(err) = handle.await {
                error!(kind, error = %err, "worker panicked");
            }
        }
        info!(kind, "controller exited");
        Ok(())
    }

    async fn run_worker(&self, worker: usize) {
        debug!(kind = self.reconciler.kind(), worker, "worker started");
        while let Some((key, event)) = self.queue.get().await {
            let result = self.process(&event).await;
            self.handle_result(&key, event, result);
            self.queue.done(&key);
        }
    }

    fn handle_result(
        &self,
        key: &str,
        event: Event<R::Object>,
        result: Result<Outcome, ReconcileError>,
    ) {
        let kind = self.reconciler.kind();
        match result {
            Ok(outcome) => {
                debug!(kind, key = %key, ?outcome, "processed");
                self.queue.forget(key);
            }
            Err(err) if err.is_permanent() => {
                error!(kind, key = %key, error = %err, "dropping item");
                self.queue.forget(key);
            }
            Err(err) => {
                warn!(
                    kind,
                    key = %key,
                    error = %err,
                    requeues = self.queue.num_requeues(key),
                    "sync failed, will retry"
                );
                self.queue.requeue(key, event);
            }
        }
    }

    /// One reconcile attempt for a queue item
    pub async fn process(&self, event: &Event<R::Object>) -> Result<Outcome, ReconcileError> {
        let kind = self.reconciler.kind();
        let key = event.key.as_str();
        let (namespace, name) = split_meta_namespace_key(key)
            .ok_or_else(|| ReconcileError::InvalidKey(key.to_string()))?;

        let current = match self.reconciler.lookup(namespace, name) {
            Ok(obj) => Some(obj),
            Err(err) if err.is_not_found() => None,
            Err(err) => {
                error!(kind, key = %key, error = %err, "failed to read cache");
                return Err(err.into());
            }
        };

        let obj = match event.kind {
            EventKind::Delete => {
                let tombstone = event
                    .prior
                    .clone()
                    .ok_or_else(|| ReconcileError::MissingTombstone(key.to_string()))?;
                // An object still cached but out of scope is removed all the same
                if let Some(current) = current.filter(|current| self.reconciler.filter(current)) {
                    if self.reconciler.is_stale_delete(&current, &tombstone) {
                        warn!(
                            kind,
                            key = %key,
                            tombstone_version = ?tombstone.resource_version(),
                            current_version = ?current.resource_version(),
                            "discard the stale delete event since the object exists"
                        );
                        return Ok(Outcome::StaleDelete);
                    }
                }
                tombstone
            }
            EventKind::Add | EventKind::Update => {
                let Some(current) = current else {
                    warn!(kind, key = %key, "object was deleted before it could be delivered");
                    return Ok(Outcome::Vanished);
                };
                if event.kind == EventKind::Update {
                    let prior = event.prior.as_deref().and_then(resource_version);
                    if let (Some(prior), Some(cached)) = (prior, resource_version(current.as_ref())) {
                        if prior >= cached {
                            debug!(kind, key = %key, prior, cached, "update superseded");
                            return Ok(Outcome::Superseded);
                        }
                    }
                }
                current
            }
        };

        let object_ref = obj.object_ref(&());
        let output = match self.reconciler.translate(&obj, event.kind) {
            Ok(output) => output,
            Err(err) => {
                error!(kind, key = %key, error = %err, "failed to translate");
                self.recorder
                    .record(
                        &object_ref,
                        EventType::Warning,
                        REASON_SYNC_ABORTED,
                        &sync_failed_message(kind, &err),
                    )
                    .await;
                return Err(err.into());
            }
        };

        self.reconciler.before_sync(&obj, &output, event.kind);

        if let Err(err) = self.reconciler.sync(&output, event.kind).await {
            error!(kind, key = %key, error = %err, "failed to sync to gateway");
            self.recorder
                .record(
                    &object_ref,
                    EventType::Warning,
                    REASON_SYNC_ABORTED,
                    &sync_failed_message(kind, &err),
                )
                .await;
            return Err(err.into());
        }

        info!(kind, key = %key, event = %event.kind, "synced");
        self.recorder
            .record(&object_ref, EventType::Normal, REASON_SYNCED, &synced_message(kind))
            .await;
        Ok(Outcome::Synced)
    }
}

impl<R: Reconciler> ResourceEventHandler<R::Object> for Controller<R> {
    fn on_add(&self, obj: Arc<R::Object>) {
        if !self.accepts(&obj) {
            return;
        }
        self.enqueue(Event::add(self.reconciler.key(&obj)));
    }

    fn on_update(&self, old: Arc<R::Object>, new: Arc<R::Object>) {
        if let (Some(old_rv), Some(new_rv)) = (resource_version(old.as_ref()), resource_version(new.as_ref())) {
            if old_rv >= new_rv {
                return;
            }
        }
        let key = self.reconciler.key(&new);
        if self.accepts(&new) {
            self.enqueue(Event::update(key, Some(old)));
        } else if self.accepts(&old) {
            info!(kind = self.reconciler.kind(), key = %key, "object left the controller scope");
            self.enqueue(Event::delete(key, old));
        }
    }

    fn on_delete(&self, obj: Arc<R::Object>) {
        if !self.accepts(&obj) {
            return;
        }
        let key = self.reconciler.key(&obj);
        self.enqueue(Event::delete(key, obj));
    }
}
