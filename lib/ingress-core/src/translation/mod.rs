//! Translation of declared resources into gateway objects
//!
//! The translator is pure apart from read-only cache lookups: for fixed cache
//! content, translating the same resource twice yields identical objects.
//! Every failure names the field whose resolution failed.

mod endpoints;
mod ingress;
mod tls;
mod upstream;

pub use ingress::{IngressVersion, KubeIngress, TranslatedIngress, ANY_INGRESS_CLASS};
pub use tls::ssl_material;

use crate::cache::{EndpointSliceLister, Lister};
use crate::error::CoreError;
use ingress_api::ApisixUpstream;
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Where upstream nodes are read from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EndpointMode {
    #[default]
    Endpoints,
    EndpointSlice,
}

impl FromStr for EndpointMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "endpoints" => Ok(EndpointMode::Endpoints),
            "endpointslice" | "endpointslices" => Ok(EndpointMode::EndpointSlice),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown endpoint mode {:?}, expected \"endpoints\" or \"endpointslice\"",
                other
            ))),
        }
    }
}

impl fmt::Display for EndpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointMode::Endpoints => write!(f, "endpoints"),
            EndpointMode::EndpointSlice => write!(f, "endpointslice"),
        }
    }
}

/// The endpoint lister selected by the configured mode
#[derive(Clone)]
pub enum EndpointSource {
    Endpoints(Arc<dyn Lister<Endpoints>>),
    Slices(Arc<dyn EndpointSliceLister>),
}

impl EndpointSource {
    pub fn mode(&self) -> EndpointMode {
        match self {
            EndpointSource::Endpoints(_) => EndpointMode::Endpoints,
            EndpointSource::Slices(_) => EndpointMode::EndpointSlice,
        }
    }
}

/// Cache collaborators needed by the translator
#[derive(Clone)]
pub struct TranslatorOptions {
    pub endpoint_mode: EndpointMode,
    pub endpoint_lister: Option<Arc<dyn Lister<Endpoints>>>,
    pub endpoint_slice_lister: Option<Arc<dyn EndpointSliceLister>>,
    pub service_lister: Arc<dyn Lister<Service>>,
    pub apisix_upstream_lister: Arc<dyn Lister<ApisixUpstream>>,
    pub secret_lister: Arc<dyn Lister<Secret>>,
}

pub struct Translator {
    endpoints: EndpointSource,
    services: Arc<dyn Lister<Service>>,
    apisix_upstreams: Arc<dyn Lister<ApisixUpstream>>,
    secrets: Arc<dyn Lister<Secret>>,
}

impl Translator {
    /// Fails when the lister required by the endpoint mode is missing
    pub fn new(options: TranslatorOptions) -> Result<Self, CoreError> {
        let endpoints = match options.endpoint_mode {
            EndpointMode::Endpoints => options
                .endpoint_lister
                .map(EndpointSource::Endpoints)
                .ok_or_else(|| {
                    CoreError::InvalidConfiguration(
                        "endpoint mode \"endpoints\" requires an Endpoints lister".to_string(),
                    )
                })?,
            EndpointMode::EndpointSlice => options
                .endpoint_slice_lister
                .map(EndpointSource::Slices)
                .ok_or_else(|| {
                    CoreError::InvalidConfiguration(
                        "endpoint mode \"endpointslice\" requires an EndpointSlice lister"
                            .to_string(),
                    )
                })?,
        };

        Ok(Self {
            endpoints,
            services: options.service_lister,
            apisix_upstreams: options.apisix_upstream_lister,
            secrets: options.secret_lister,
        })
    }

    pub fn endpoint_mode(&self) -> EndpointMode {
        self.endpoints.mode()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Reflector stores filled with JSON-built objects

    use super::*;
    use kube::runtime::reflector::{self, store::Writer, Store};
    use kube::runtime::watcher;
    use kube::Resource;
    use k8s_openapi::api::discovery::v1::EndpointSlice;
    use serde::de::DeserializeOwned;

    pub fn object<K: DeserializeOwned>(value: serde_json::Value) -> K {
        serde_json::from_value(value).unwrap()
    }

    pub fn store<K>(objects: Vec<K>) -> (Store<K>, Writer<K>)
    where
        K: Resource<DynamicType = ()> + Clone + 'static,
    {
        let (reader, mut writer) = reflector::store::<K>();
        for obj in objects {
            writer.apply_watcher_event(&watcher::Event::Apply(obj));
        }
        (reader, writer)
    }

    pub fn service(ns: &str, name: &str, ports: serde_json::Value) -> Service {
        object(serde_json::json!({
            "metadata": {"namespace": ns, "name": name},
            "spec": {"ports": ports}
        }))
    }

    pub fn endpoints(ns: &str, name: &str, subsets: serde_json::Value) -> Endpoints {
        object(serde_json::json!({
            "metadata": {"namespace": ns, "name": name},
            "subsets": subsets
        }))
    }

    pub fn secret(ns: &str, name: &str, data: serde_json::Value) -> Secret {
        object(serde_json::json!({
            "metadata": {"namespace": ns, "name": name},
            "data": data
        }))
    }

    /// Cache content for translator tests; writers are kept alive so tests
    /// can mutate the stores afterwards
    pub struct Cluster {
        pub services: (Store<Service>, Writer<Service>),
        pub endpoints: (Store<Endpoints>, Writer<Endpoints>),
        pub slices: (Store<EndpointSlice>, Writer<EndpointSlice>),
        pub upstreams: (Store<ApisixUpstream>, Writer<ApisixUpstream>),
        pub secrets: (Store<Secret>, Writer<Secret>),
    }

    impl Default for Cluster {
        fn default() -> Self {
            Self {
                services: store(vec![]),
                endpoints: store(vec![]),
                slices: store(vec![]),
                upstreams: store(vec![]),
                secrets: store(vec![]),
            }
        }
    }

    impl Cluster {
        pub fn apply<K>(writer: &mut Writer<K>, obj: K)
        where
            K: Resource<DynamicType = ()> + Clone + 'static,
        {
            writer.apply_watcher_event(&watcher::Event::Apply(obj));
        }

        pub fn translator(&self, mode: EndpointMode) -> Translator {
            Translator::new(TranslatorOptions {
                endpoint_mode: mode,
                endpoint_lister: Some(Arc::new(self.endpoints.0.clone())),
                endpoint_slice_lister: Some(Arc::new(self.slices.0.clone())),
                service_lister: Arc::new(self.services.0.clone()),
                apisix_upstream_lister: Arc::new(self.upstreams.0.clone()),
                secret_lister: Arc::new(self.secrets.0.clone()),
            })
            .unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::Cluster;
    use super::*;

    #[test]
    fn test_endpoint_mode_from_str() {
        assert_eq!("endpoints".parse::<EndpointMode>().unwrap(), EndpointMode::Endpoints);
        assert_eq!(
            "endpointslice".parse::<EndpointMode>().unwrap(),
            EndpointMode::EndpointSlice
        );
        assert!(matches!(
            "pods".parse::<EndpointMode>(),
            Err(CoreError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_missing_lister_for_mode_fails_construction() {
        let cluster = Cluster::default();
        let result = Translator::new(TranslatorOptions {
            endpoint_mode: EndpointMode::EndpointSlice,
            endpoint_lister: Some(Arc::new(cluster.endpoints.0.clone())),
            endpoint_slice_lister: None,
            service_lister: Arc::new(cluster.services.0.clone()),
            apisix_upstream_lister: Arc::new(cluster.upstreams.0.clone()),
            secret_lister: Arc::new(cluster.secrets.0.clone()),
        });
        assert!(matches!(result, Err(CoreError::InvalidConfiguration(_))));

        let translator = cluster.translator(EndpointMode::EndpointSlice);
        assert_eq!(translator.endpoint_mode(), EndpointMode::EndpointSlice);
    }
}
