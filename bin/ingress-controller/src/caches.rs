//! Cluster caches shared by the controllers

use ingress_api::{ApisixTls, ApisixUpstream};
use ingress_core::cache::wait_for_cache_sync;
use ingress_core::{
    CacheSync, CoreError, EndpointMode, EndpointSliceLister, Lister, Translator, TranslatorOptions,
};
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::reflector::Store;
use std::sync::Arc;

/// Stores filled by the informers. Only the endpoint representation selected
/// by the endpoint mode is watched.
#[derive(Clone)]
pub struct Caches {
    pub services: Store<Service>,
    pub endpoints: Option<Store<Endpoints>>,
    pub endpoint_slices: Option<Store<EndpointSlice>>,
    pub secrets: Store<Secret>,
    pub apisix_tls: Store<ApisixTls>,
    pub apisix_upstreams: Store<ApisixUpstream>,
}

impl Caches {
    pub fn endpoint_mode(&self) -> EndpointMode {
        if self.endpoint_slices.is_some() {
            EndpointMode::EndpointSlice
        } else {
            EndpointMode::Endpoints
        }
    }

    pub fn translator(&self) -> Result<Translator, CoreError> {
        Translator::new(TranslatorOptions {
            endpoint_mode: self.endpoint_mode(),
            endpoint_lister: self
                .endpoints
                .clone()
                .map(|store| Arc::new(store) as Arc<dyn Lister<Endpoints>>),
            endpoint_slice_lister: self
                .endpoint_slices
                .clone()
                .map(|store| Arc::new(store) as Arc<dyn EndpointSliceLister>),
            service_lister: Arc::new(self.services.clone()),
            apisix_upstream_lister: Arc::new(self.apisix_upstreams.clone()),
            secret_lister: Arc::new(self.secrets.clone()),
        })
    }

    /// Resolves once every watched store completed its first list
    pub async fn wait_for_sync(&self) -> bool {
        let mut caches: Vec<&dyn CacheSync> = vec![
            &self.services,
            &self.secrets,
            &self.apisix_tls,
            &self.apisix_upstreams,
        ];
        if let Some(endpoints) = &self.endpoints {
            caches.push(endpoints);
        }
        if let Some(slices) = &self.endpoint_slices {
            caches.push(slices);
        }
        wait_for_cache_sync(&caches).await
    }
}
