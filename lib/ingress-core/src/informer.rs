//! Watch-driven cache with add/update/delete notifications
//!
//! An informer keeps a reflector store in sync with the cluster and tells
//! registered handlers what changed. A re-list is applied atomically: the
//! notifications for it are delivered once the store holds the new state,
//! and objects that disappeared while the watch was down get a synthesized
//! delete carrying their last known state.

use futures::StreamExt;
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receiver of cache change notifications
pub trait ResourceEventHandler<K>: Send + Sync {
    fn on_add(&self, obj: Arc<K>);

    fn on_update(&self, old: Arc<K>, new: Arc<K>);

    /// `obj` is the last known state; the cache no longer holds it
    fn on_delete(&self, obj: Arc<K>);
}

/// Applies watcher events to a store and derives notifications from the
/// difference between the previous and the new store content
pub struct Dispatcher<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    reader: Store<K>,
    writer: Writer<K>,
    handlers: Vec<Arc<dyn ResourceEventHandler<K>>>,
    relist: Option<Relist<K>>,
}

struct Relist<K: Resource<DynamicType = ()>> {
    previous: HashMap<ObjectRef<K>, Arc<K>>,
    listed: Vec<ObjectRef<K>>,
}

impl<K> Dispatcher<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    pub fn new() -> Self {
        let (reader, writer) = reflector::store::<K>();
        Self {
            reader,
            writer,
            handlers: Vec::new(),
            relist: None,
        }
    }

    pub fn store(&self) -> Store<K> {
        self.reader.clone()
    }

    pub fn add_event_handler(&mut self, handler: Arc<dyn ResourceEventHandler<K>>) {
        self.handlers.push(handler);
    }

    pub fn handle(&mut self, event: watcher::Event<K>) {
        match &event {
            watcher::Event::Apply(obj) => {
                let obj_ref = ObjectRef::from_obj(obj);
                let old = self.reader.get(&obj_ref);
                self.writer.apply_watcher_event(&event);
                self.notify_applied(&obj_ref, old);
            }
            watcher::Event::Delete(obj) => {
                self.writer.apply_watcher_event(&event);
                let tombstone = Arc::new(obj.clone());
                for handler in &self.handlers {
                    handler.on_delete(Arc::clone(&tombstone));
                }
            }
            watcher::Event::Init => {
                let previous = self
                    .reader
                    .state()
                    .into_iter()
                    .map(|obj| (ObjectRef::from_obj(obj.as_ref()), obj))
                    .collect();
                self.writer.apply_watcher_event(&event);
                self.relist = Some(Relist {
                    previous,
                    listed: Vec::new(),
                });
            }
            watcher::Event::InitApply(obj) => {
                self.writer.apply_watcher_event(&event);
                if let Some(relist) = self.relist.as_mut() {
                    relist.listed.push(ObjectRef::from_obj(obj));
                }
            }
            watcher::Event::InitDone => {
                self.writer.apply_watcher_event(&event);
                let Some(mut relist) = self.relist.take() else {
                    return;
                };
                for obj_ref in &relist.listed {
                    let old = relist.previous.remove(obj_ref);
                    self.notify_applied(obj_ref, old);
                }
                for (_, gone) in relist.previous {
                    debug!(kind = %K::kind(&()), "object vanished during re-list");
                    for handler in &self.handlers {
                        handler.on_delete(Arc::clone(&gone));
                    }
                }
            }
        }
    }

    fn notify_applied(&self, obj_ref: &ObjectRef<K>, old: Option<Arc<K>>) {
        let Some(new) = self.reader.get(obj_ref) else {
            return;
        };
        match old {
            None => {
                for handler in &self.handlers {
                    handler.on_add(Arc::clone(&new));
                }
            }
            // Periodic resyncs and re-lists redeliver unchanged objects
            Some(old) if old.meta().resource_version == new.meta().resource_version => {}
            Some(old) => {
                for handler in &self.handlers {
                    handler.on_update(Arc::clone(&old), Arc::clone(&new));
                }
            }
        }
    }
}

impl<K> Default for Dispatcher<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Watches one resource kind and feeds a [`Dispatcher`]
pub struct Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    api: Api<K>,
    config: watcher::Config,
    dispatcher: Dispatcher<K>,
}

impl<K> Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    pub fn new(api: Api<K>) -> Self {
        Self {
            api,
            config: watcher::Config::default(),
            dispatcher: Dispatcher::new(),
        }
    }

    pub fn with_config(mut self, config: watcher::Config) -> Self {
        self.config = config;
        self
    }

    /// Lister over the informer's cache; ready once the first list completed
    pub fn store(&self) -> Store<K> {
        self.dispatcher.store()
    }

    pub fn add_event_handler(&mut self, handler: Arc<dyn ResourceEventHandler<K>>) {
        self.dispatcher.add_event_handler(handler);
    }

    /// Run the watch until the stream ends; watch errors are retried with
    /// backoff
    pub async fn run(mut self) {
        let kind = K::kind(&()).to_string();
        info!(kind = %kind, "starting informer");

        let mut stream = watcher::watcher(self.api.clone(), self.config.clone())
            .default_backoff()
            .boxed();
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => self.dispatcher.handle(event),
                Err(err) => warn!(kind = %kind, error = %err, "watch failed, retrying"),
            }
        }
        info!(kind = %kind, "informer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Service;
    use kube::ResourceExt;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    impl Recording {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.seen.lock().unwrap())
        }
    }

    impl ResourceEventHandler<Service> for Recording {
        fn on_add(&self, obj: Arc<Service>) {
            self.seen.lock().unwrap().push(format!("add {}", obj.name_any()));
        }

        fn on_update(&self, old: Arc<Service>, new: Arc<Service>) {
            self.seen.lock().unwrap().push(format!(
                "update {} {}->{}",
                new.name_any(),
                old.resource_version().unwrap_or_default(),
                new.resource_version().unwrap_or_default()
            ));
        }

        fn on_delete(&self, obj: Arc<Service>) {
            self.seen.lock().unwrap().push(format!("delete {}", obj.name_any()));
        }
    }

    fn svc(name: &str, rv: &str) -> Service {
        serde_json::from_value(serde_json::json!({
            "metadata": {"namespace": "default", "name": name, "resourceVersion": rv}
        }))
        .unwrap()
    }

    fn dispatcher() -> (Dispatcher<Service>, Arc<Recording>) {
        let recording = Arc::new(Recording::default());
        let mut dispatcher = Dispatcher::new();
        dispatcher.add_event_handler(recording.clone());
        (dispatcher, recording)
    }

    #[test]
    fn test_apply_and_delete() {
        let (mut d, rec) = dispatcher();
        d.handle(watcher::Event::Apply(svc("a", "1")));
        d.handle(watcher::Event::Apply(svc("a", "2")));
        d.handle(watcher::Event::Apply(svc("a", "2")));
        d.handle(watcher::Event::Delete(svc("a", "3")));

        assert_eq!(rec.take(), vec!["add a", "update a 1->2", "delete a"]);
        assert!(d.store().state().is_empty());
    }

    #[test]
    fn test_initial_list_notifies_after_store_is_filled() {
        struct StoreCheck(Store<Service>, Mutex<Vec<bool>>);
        impl ResourceEventHandler<Service> for StoreCheck {
            fn on_add(&self, obj: Arc<Service>) {
                let found = self.0.get(&ObjectRef::from_obj(obj.as_ref())).is_some();
                self.1.lock().unwrap().push(found);
            }
            fn on_update(&self, _old: Arc<Service>, _new: Arc<Service>) {}
            fn on_delete(&self, _obj: Arc<Service>) {}
        }

        let mut d = Dispatcher::<Service>::new();
        let check = Arc::new(StoreCheck(d.store(), Mutex::new(Vec::new())));
        d.add_event_handler(check.clone());

        d.handle(watcher::Event::Init);
        d.handle(watcher::Event::InitApply(svc("a", "1")));
        d.handle(watcher::Event::InitApply(svc("b", "1")));
        assert!(check.1.lock().unwrap().is_empty());
        d.handle(watcher::Event::InitDone);

        assert_eq!(*check.1.lock().unwrap(), vec![true, true]);
    }

    #[test]
    fn test_relist_synthesizes_deletes() {
        let (mut d, rec) = dispatcher();
        d.handle(watcher::Event::Init);
        d.handle(watcher::Event::InitApply(svc("a", "1")));
        d.handle(watcher::Event::InitApply(svc("b", "1")));
        d.handle(watcher::Event::InitDone);
        assert_eq!(rec.take(), vec!["add a", "add b"]);

        // Watch restarted: "a" changed, "b" is gone, "c" is new
        d.handle(watcher::Event::Init);
        d.handle(watcher::Event::InitApply(svc("a", "5")));
        d.handle(watcher::Event::InitApply(svc("c", "6")));
        d.handle(watcher::Event::InitDone);

        assert_eq!(rec.take(), vec!["update a 1->5", "add c", "delete b"]);
        let mut names: Vec<String> = d.store().state().iter().map(|s| s.name_any()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "c"]);
    }
}
