//! Read-only access to the cluster cache
//!
//! Listers are backed by `kube` reflector stores filled by informers. The
//! translator and the controllers only ever read through these traits.

use crate::error::LookupError;
use async_trait::async_trait;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Resource, ResourceExt};
use std::sync::Arc;

/// Label carrying the owning Service name on an EndpointSlice
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Namespaced get-by-name over cached objects
pub trait Lister<K>: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Result<Arc<K>, LookupError>;
}

impl<K> Lister<K> for Store<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    fn get(&self, namespace: &str, name: &str) -> Result<Arc<K>, LookupError> {
        Store::get(self, &ObjectRef::new(name).within(namespace))
            .ok_or_else(|| LookupError::not_found(K::kind(&()), namespace, name))
    }
}

/// EndpointSlices are named after, not by, their Service
pub trait EndpointSliceLister: Send + Sync {
    /// All slices labelled as belonging to the given Service
    fn list_for_service(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Vec<Arc<EndpointSlice>>, LookupError>;
}

impl EndpointSliceLister for Store<EndpointSlice> {
    fn list_for_service(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Vec<Arc<EndpointSlice>>, LookupError> {
        let mut slices: Vec<Arc<EndpointSlice>> = self
            .state()
            .into_iter()
            .filter(|slice| slice.namespace().as_deref() == Some(namespace))
            .filter(|slice| service_name_of_slice(slice) == service)
            .collect();
        if slices.is_empty() {
            return Err(LookupError::not_found("EndpointSlice", namespace, service));
        }
        slices.sort_by_key(|slice| slice.name_any());
        Ok(slices)
    }
}

/// Owning Service of a slice, falling back to the slice name
pub fn service_name_of_slice(slice: &EndpointSlice) -> String {
    slice
        .labels()
        .get(SERVICE_NAME_LABEL)
        .cloned()
        .unwrap_or_else(|| slice.name_any())
}

/// Barrier reporting when a cache has completed its initial list
#[async_trait]
pub trait CacheSync: Send + Sync {
    /// Resolves once the cache is populated; false if it never will be
    async fn wait_for_sync(&self) -> bool;
}

#[async_trait]
impl<K> CacheSync for Store<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    async fn wait_for_sync(&self) -> bool {
        self.wait_until_ready().await.is_ok()
    }
}

/// Wait for every cache in turn
pub async fn wait_for_cache_sync(caches: &[&dyn CacheSync]) -> bool {
    for cache in caches {
        if !cache.wait_for_sync().await {
            return false;
        }
    }
    true
}

/// `namespace/name` key of an object (`name` for cluster scoped objects)
pub fn meta_namespace_key<K: Resource>(obj: &K) -> String {
    let name = obj.meta().name.clone().unwrap_or_default();
    match obj.meta().namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name,
    }
}

/// Split a `namespace/name` key; a bare name has an empty namespace
pub fn split_meta_namespace_key(key: &str) -> Option<(&str, &str)> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Some(("", name)),
        (Some(ns), Some(name), None) if !name.is_empty() => Some((ns, name)),
        _ => None,
    }
}

/// Resource version as an orderable token, when it is numeric
pub fn resource_version<K: Resource>(obj: &K) -> Option<u64> {
    obj.meta()
        .resource_version
        .as_deref()
        .and_then(|rv| rv.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Service;
    use kube::runtime::{reflector, watcher};

    fn service(ns: &str, name: &str, rv: &str) -> Service {
        serde_json::from_value(serde_json::json!({
            "metadata": {"namespace": ns, "name": name, "resourceVersion": rv}
        }))
        .unwrap()
    }

    fn slice(ns: &str, name: &str, service: Option<&str>) -> EndpointSlice {
        let mut value = serde_json::json!({
            "metadata": {"namespace": ns, "name": name},
            "addressType": "IPv4",
            "endpoints": []
        });
        if let Some(service) = service {
            value["metadata"]["labels"][SERVICE_NAME_LABEL] = serde_json::json!(service);
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_split_meta_namespace_key() {
        assert_eq!(split_meta_namespace_key("ns/name"), Some(("ns", "name")));
        assert_eq!(split_meta_namespace_key("name"), Some(("", "name")));
        assert_eq!(split_meta_namespace_key("a/b/c"), None);
        assert_eq!(split_meta_namespace_key("ns/"), None);
        assert_eq!(split_meta_namespace_key(""), None);
    }

    #[test]
    fn test_meta_namespace_key_and_version() {
        let svc = service("default", "httpbin", "42");
        assert_eq!(meta_namespace_key(&svc), "default/httpbin");
        assert_eq!(resource_version(&svc), Some(42));
        assert_eq!(resource_version(&service("a", "b", "not-a-number")), None);
    }

    #[test]
    fn test_store_lister() {
        let (reader, mut writer) = reflector::store::<Service>();
        writer.apply_watcher_event(&watcher::Event::Apply(service("default", "httpbin", "1")));

        let found = Lister::get(&reader, "default", "httpbin").unwrap();
        assert_eq!(found.name_any(), "httpbin");

        let missing = Lister::get(&reader, "other", "httpbin").unwrap_err();
        assert!(missing.is_not_found());
        assert_eq!(missing.to_string(), "Service other/httpbin not found");
    }

    #[test]
    fn test_slices_for_service() {
        let (reader, mut writer) = reflector::store::<EndpointSlice>();
        writer.apply_watcher_event(&watcher::Event::Apply(slice("ns", "web-b", Some("web"))));
        writer.apply_watcher_event(&watcher::Event::Apply(slice("ns", "web-a", Some("web"))));
        writer.apply_watcher_event(&watcher::Event::Apply(slice("ns", "api-a", Some("api"))));
        writer.apply_watcher_event(&watcher::Event::Apply(slice("other", "web-c", Some("web"))));

        let slices = reader.list_for_service("ns", "web").unwrap();
        let names: Vec<String> = slices.iter().map(|s| s.name_any()).collect();
        assert_eq!(names, vec!["web-a".to_string(), "web-b".to_string()]);

        assert!(reader.list_for_service("ns", "missing").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_cache_sync_after_initial_list() {
        let (reader, mut writer) = reflector::store::<Service>();
        writer.apply_watcher_event(&watcher::Event::Init);
        writer.apply_watcher_event(&watcher::Event::InitApply(service("default", "a", "1")));
        writer.apply_watcher_event(&watcher::Event::InitDone);
        assert!(wait_for_cache_sync(&[&reader]).await);
        assert!(Lister::get(&reader, "default", "a").is_ok());
    }
}
