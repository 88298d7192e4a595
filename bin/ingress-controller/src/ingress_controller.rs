//! Ingress controller: translates Ingress rules into gateway routes and the
//! upstreams they point at
//!
//! The same reconciler serves both Ingress versions; the binary picks the
//! one the cluster is configured to watch.

use crate::caches::Caches;
use async_trait::async_trait;
use dashmap::DashMap;
use ingress_api::networking_v1beta1;
use ingress_core::apisix::Route;
use ingress_core::gateway::sync_object;
use ingress_core::translation::{KubeIngress, TranslatedIngress};
use ingress_core::{
    CacheSync, EventKind, Gateway, Lister, LookupError, Reconciler, SyncError, TranslateError,
    Translator,
};
use k8s_openapi::api::networking::v1 as networking;
use kube::runtime::reflector::Store;
use kube::Resource;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};

/// An Ingress object of one served API version
pub trait IngressResource:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
    fn to_ingress(&self) -> KubeIngress;
}

impl IngressResource for networking::Ingress {
    fn to_ingress(&self) -> KubeIngress {
        KubeIngress::V1(Arc::new(self.clone()))
    }
}

impl IngressResource for networking_v1beta1::Ingress {
    fn to_ingress(&self) -> KubeIngress {
        KubeIngress::V1beta1(Arc::new(self.clone()))
    }
}

/// Gateway objects for one Ingress
#[derive(Clone, Debug)]
pub struct IngressSync {
    pub key: String,
    pub translated: TranslatedIngress,
}

pub struct IngressReconciler<K: IngressResource> {
    ingresses: Store<K>,
    caches: Caches,
    translator: Arc<Translator>,
    gateway: Arc<dyn Gateway>,
    ingress_class: String,
    /// Route ids last written for each Ingress key
    synced_routes: DashMap<String, Vec<String>>,
}

impl<K: IngressResource> IngressReconciler<K> {
    pub fn new(
        ingresses: Store<K>,
        caches: Caches,
        translator: Arc<Translator>,
        gateway: Arc<dyn Gateway>,
        ingress_class: impl Into<String>,
    ) -> Self {
        Self {
            ingresses,
            caches,
            translator,
            gateway,
            ingress_class: ingress_class.into(),
            synced_routes: DashMap::new(),
        }
    }

    fn route_ids(routes: &[Route]) -> Vec<String> {
        routes.iter().map(|route| route.id.clone()).collect()
    }

    async fn apply(&self, output: &IngressSync, kind: EventKind) -> Result<(), SyncError> {
        let translated = &output.translated;
        for ups in &translated.upstreams {
            sync_object(self.gateway.upstream(), kind, ups).await?;
        }
        for route in &translated.routes {
            sync_object(self.gateway.route(), kind, route).await?;
        }

        let current = Self::route_ids(&translated.routes);
        let previous = self
            .synced_routes
            .get(&output.key)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        let keep: HashSet<&String> = current.iter().collect();
        for id in previous.iter().filter(|id| !keep.contains(id)) {
            debug!(ingress = %output.key, route = %id, "removing route no longer declared");
            self.gateway.route().delete(id).await?;
        }
        self.synced_routes.insert(output.key.clone(), current);
        Ok(())
    }

    /// Upstreams stay behind: other routes may still point at them
    async fn remove(&self, output: &IngressSync) -> Result<(), SyncError> {
        let mut ids = self
            .synced_routes
            .get(&output.key)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        for id in Self::route_ids(&output.translated.routes) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        for id in &ids {
            self.gateway.route().delete(id).await?;
        }
        self.synced_routes.remove(&output.key);
        Ok(())
    }
}

#[async_trait]
impl<K: IngressResource> Reconciler for IngressReconciler<K> {
    type Object = K;
    type Output = IngressSync;

    fn kind(&self) -> &'static str {
        "Ingress"
    }

    fn lookup(&self, namespace: &str, name: &str) -> Result<Arc<K>, LookupError> {
        Lister::get(&self.ingresses, namespace, name)
    }

    fn filter(&self, ing: &K) -> bool {
        ing.to_ingress().is_effective(&self.ingress_class)
    }

    fn translate(&self, ing: &K, kind: EventKind) -> Result<IngressSync, TranslateError> {
        let ingress = ing.to_ingress();
        let key = format!("{}/{}", ingress.namespace(), ingress.name());
        let translated = match self.translator.translate_ingress(&ingress) {
            Ok(translated) => translated,
            // Backends may be gone already; the remembered route ids suffice
            Err(err) if kind == EventKind::Delete => {
                warn!(ingress = %key, error = %err, "removing routes of untranslatable ingress");
                TranslatedIngress::default()
            }
            Err(err) => return Err(err),
        };
        Ok(IngressSync { key, translated })
    }

    async fn sync(&self, output: &IngressSync, kind: EventKind) -> Result<(), SyncError> {
        match kind {
            EventKind::Delete => self.remove(output).await,
            EventKind::Add | EventKind::Update => self.apply(output, kind).await,
        }
    }

    async fn wait_for_cache_sync(&self) -> bool {
        self.ingresses.wait_for_sync().await && self.caches.wait_for_sync().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caches::fixtures::{apply, delete, endpoints, object, service, Cluster};
    use ingress_core::testing::{MemoryGateway, MemoryRecorder};
    use ingress_core::{Controller, ControllerConfig, Event, Outcome};
    use kube::runtime::reflector::{self, store::Writer};
    use kube::ResourceExt;
    use serde_json::json;

    struct Fixture<K: IngressResource> {
        cluster: Cluster,
        ingresses: Writer<K>,
        gateway: Arc<MemoryGateway>,
        controller: Controller<IngressReconciler<K>>,
    }

    fn fixture<K: IngressResource>(class: &str) -> Fixture<K> {
        let mut cluster = Cluster::new();
        apply(&mut cluster.services, service("default", "httpbin"));
        apply(&mut cluster.endpoints, endpoints("default", "httpbin", &["10.0.0.5"]));
        let (store, ingresses) = reflector::store();
        let gateway = Arc::new(MemoryGateway::default());
        let reconciler = IngressReconciler::new(
            store,
            cluster.caches.clone(),
            Arc::new(cluster.caches.translator().unwrap()),
            gateway.clone(),
            class,
        );
        let controller = Controller::new(
            Arc::new(reconciler),
            Arc::new(MemoryRecorder::default()),
            ControllerConfig::default(),
        );
        Fixture {
            cluster,
            ingresses,
            gateway,
            controller,
        }
    }

    fn ingress(rv: &str, paths: &[&str]) -> networking::Ingress {
        let paths: Vec<_> = paths
            .iter()
            .map(|path| {
                json!({
                    "path": path,
                    "pathType": "Prefix",
                    "backend": {"service": {"name": "httpbin", "port": {"number": 80}}}
                })
            })
            .collect();
        object(json!({
            "metadata": {
                "namespace": "default",
                "name": "site",
                "resourceVersion": rv,
                "annotations": {"kubernetes.io/ingress.class": "apisix"}
            },
            "spec": {"rules": [{"host": "httpbin.org", "http": {"paths": paths}}]}
        }))
    }

    fn route_names(gateway: &MemoryGateway) -> Vec<String> {
        let mut names: Vec<String> = gateway
            .routes
            .objects
            .lock()
            .unwrap()
            .values()
            .map(|route| route.name.clone())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_add_writes_upstreams_before_routes() {
        let mut f = fixture("apisix");
        apply(&mut f.ingresses, ingress("1", &["/ip"]));

        let outcome = f.controller.process(&Event::add("default/site")).await.unwrap();
        assert_eq!(outcome, Outcome::Synced);

        assert_eq!(f.gateway.upstreams.calls(), vec!["create default_httpbin_80"]);
        let upstream = f.gateway.upstreams.objects.lock().unwrap()["default_httpbin_80"].clone();
        assert_eq!(upstream.nodes[0].ip, "10.0.0.5");
        assert_eq!(route_names(&f.gateway), vec!["default_site_httpbin.org_/ip"]);
        let routes = f.gateway.routes.objects.lock().unwrap();
        let route = routes.values().next().unwrap();
        assert_eq!(route.upstream_id, "default_httpbin_80");
        assert_eq!(route.uris, vec!["/ip".to_string(), "/ip/*".to_string()]);
    }

    #[tokio::test]
    async fn test_update_prunes_removed_paths() {
        let mut f = fixture("apisix");
        apply(&mut f.ingresses, ingress("1", &["/ip", "/headers"]));
        f.controller.process(&Event::add("default/site")).await.unwrap();
        assert_eq!(route_names(&f.gateway).len(), 2);

        apply(&mut f.ingresses, ingress("2", &["/ip"]));
        let prior = Arc::new(ingress("1", &["/ip", "/headers"]));
        f.controller
            .process(&Event::update("default/site", Some(prior)))
            .await
            .unwrap();

        assert_eq!(route_names(&f.gateway), vec!["default_site_httpbin.org_/ip"]);
    }

    #[tokio::test]
    async fn test_delete_removes_routes_and_keeps_upstreams() {
        let mut f = fixture("apisix");
        let ing = ingress("1", &["/ip"]);
        apply(&mut f.ingresses, ing.clone());
        f.controller.process(&Event::add("default/site")).await.unwrap();

        delete(&mut f.ingresses, ing.clone());
        let outcome = f
            .controller
            .process(&Event::delete("default/site", Arc::new(ing)))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Synced);
        assert!(route_names(&f.gateway).is_empty());
        assert!(f
            .gateway
            .upstreams
            .objects
            .lock()
            .unwrap()
            .contains_key("default_httpbin_80"));
    }

    #[tokio::test]
    async fn test_delete_after_service_removed() {
        let mut f = fixture("apisix");
        let ing = ingress("1", &["/ip"]);
        apply(&mut f.ingresses, ing.clone());
        f.controller.process(&Event::add("default/site")).await.unwrap();

        delete(&mut f.cluster.services, service("default", "httpbin"));
        delete(&mut f.ingresses, ing.clone());
        f.controller
            .process(&Event::delete("default/site", Arc::new(ing)))
            .await
            .unwrap();
        assert!(route_names(&f.gateway).is_empty());
    }

    #[tokio::test]
    async fn test_class_change_removes_routes() {
        let mut f = fixture("apisix");
        let old = ingress("1", &["/ip"]);
        apply(&mut f.ingresses, old.clone());
        f.controller.process(&Event::add("default/site")).await.unwrap();
        assert_eq!(route_names(&f.gateway).len(), 1);

        let mut moved = ingress("2", &["/ip"]);
        moved
            .annotations_mut()
            .insert("kubernetes.io/ingress.class".to_string(), "nginx".to_string());
        apply(&mut f.ingresses, moved.clone());
        assert!(!f.controller.reconciler().filter(&moved));

        // What the controller queues once the class no longer matches
        let outcome = f
            .controller
            .process(&Event::delete("default/site", Arc::new(old)))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Synced);
        assert!(route_names(&f.gateway).is_empty());
    }

    #[test]
    fn test_other_ingress_classes_are_ignored() {
        let f = fixture::<networking::Ingress>("nginx");
        assert!(!f.controller.reconciler().filter(&ingress("1", &["/ip"])));

        let any = fixture::<networking::Ingress>("*");
        assert!(any.controller.reconciler().filter(&ingress("1", &["/ip"])));
    }

    #[tokio::test]
    async fn test_v1beta1_ingress() {
        let mut f = fixture::<networking_v1beta1::Ingress>("*");
        apply(
            &mut f.ingresses,
            object(json!({
                "metadata": {"namespace": "default", "name": "legacy", "resourceVersion": "1"},
                "spec": {"rules": [{"host": "httpbin.org", "http": {"paths": [
                    {"path": "/status", "backend": {"serviceName": "httpbin", "servicePort": 9000}}
                ]}}]}
            })),
        );

        f.controller.process(&Event::add("default/legacy")).await.unwrap();
        assert_eq!(f.gateway.upstreams.calls(), vec!["create default_httpbin_9000"]);
        assert_eq!(route_names(&f.gateway), vec!["default_legacy_httpbin.org_/status"]);
    }
}
