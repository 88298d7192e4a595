use super::{EndpointSource, Translator};
use crate::apisix::upstream::DEFAULT_WEIGHT;
use crate::apisix::UpstreamNode;
use crate::error::TranslateError;
use k8s_openapi::api::core::v1::{Endpoints, ServicePort};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::ResourceExt;
use std::sync::Arc;

impl Translator {
    /// Nodes for `port` of the Service `namespace/name`, read from the
    /// configured endpoint source
    pub fn resolve_upstream_nodes(
        &self,
        namespace: &str,
        name: &str,
        port: i32,
    ) -> Result<Vec<UpstreamNode>, TranslateError> {
        match &self.endpoints {
            EndpointSource::Endpoints(lister) => {
                let endpoints = lister
                    .get(namespace, name)
                    .map_err(|err| TranslateError::new("endpoints", err.to_string()))?;
                self.translate_upstream_nodes(&endpoints, port)
            }
            EndpointSource::Slices(lister) => {
                let slices = lister
                    .list_for_service(namespace, name)
                    .map_err(|err| TranslateError::new("endpointslice", err.to_string()))?;
                self.translate_upstream_nodes_from_slices(namespace, name, &slices, port)
            }
        }
    }

    /// Nodes for the Service port numbered `port`, from the Endpoints object of
    /// the same name. Subsets without a port named like the Service port are
    /// skipped.
    pub fn translate_upstream_nodes(
        &self,
        endpoints: &Endpoints,
        port: i32,
    ) -> Result<Vec<UpstreamNode>, TranslateError> {
        let namespace = endpoints.namespace().unwrap_or_default();
        let svc_port = self.service_port(&namespace, &endpoints.name_any(), port)?;
        let port_name = svc_port.name.as_deref().unwrap_or_default();

        let mut nodes = Vec::new();
        for subset in endpoints.subsets.iter().flatten() {
            let ep_port = subset
                .ports
                .iter()
                .flatten()
                .find(|p| p.name.as_deref().unwrap_or_default() == port_name);
            let Some(ep_port) = ep_port else {
                continue;
            };
            for addr in subset.addresses.iter().flatten() {
                nodes.push(UpstreamNode {
                    ip: addr.ip.clone(),
                    port: ep_port.port,
                    weight: DEFAULT_WEIGHT,
                });
            }
        }
        Ok(nodes)
    }

    /// Same resolution as `translate_upstream_nodes`, over the slices of the
    /// Service `namespace/service`
    pub fn translate_upstream_nodes_from_slices(
        &self,
        namespace: &str,
        service: &str,
        slices: &[Arc<EndpointSlice>],
        port: i32,
    ) -> Result<Vec<UpstreamNode>, TranslateError> {
        let svc_port = self.service_port(namespace, service, port)?;
        let port_name = svc_port.name.as_deref().unwrap_or_default();

        let mut nodes = Vec::new();
        for slice in slices {
            let ep_port = slice
                .ports
                .iter()
                .flatten()
                .find(|p| p.name.as_deref().unwrap_or_default() == port_name);
            let Some(target) = ep_port.and_then(|p| p.port) else {
                continue;
            };
            for endpoint in &slice.endpoints {
                for addr in &endpoint.addresses {
                    nodes.push(UpstreamNode {
                        ip: addr.clone(),
                        port: target,
                        weight: DEFAULT_WEIGHT,
                    });
                }
            }
        }
        Ok(nodes)
    }

    fn service_port(
        &self,
        namespace: &str,
        name: &str,
        port: i32,
    ) -> Result<ServicePort, TranslateError> {
        let svc = self
            .services
            .get(namespace, name)
            .map_err(|err| TranslateError::new("service", err.to_string()))?;
        svc.spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .and_then(|ports| ports.iter().find(|p| p.port == port))
            .cloned()
            .ok_or_else(|| TranslateError::new("service.spec.ports", "port not defined"))
    }
}
