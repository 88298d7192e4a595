//! Endpoints controller: keeps upstream nodes in step with Service backends
//!
//! Work is keyed by Service. Endpoints and EndpointSlice changes requeue the
//! Service they belong to.

use crate::caches::Caches;
use async_trait::async_trait;
use ingress_core::apisix::{compose_upstream_name, UpstreamNode};
use ingress_core::cache::service_name_of_slice;
use ingress_core::{
    Controller, Event, EventKind, Gateway, Lister, LookupError, Reconciler, ResourceEventHandler,
    SyncError, TranslateError, Translator,
};
use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::debug;

/// Nodes for the upstream generated for one Service port
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamNodes {
    pub upstream_id: String,
    pub nodes: Vec<UpstreamNode>,
}

pub struct EndpointsReconciler {
    caches: Caches,
    translator: Arc<Translator>,
    gateway: Arc<dyn Gateway>,
}

impl EndpointsReconciler {
    pub fn new(caches: Caches, translator: Arc<Translator>, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            caches,
            translator,
            gateway,
        }
    }
}

#[async_trait]
impl Reconciler for EndpointsReconciler {
    type Object = Service;
    type Output = Vec<UpstreamNodes>;

    fn kind(&self) -> &'static str {
        "Service"
    }

    fn lookup(&self, namespace: &str, name: &str) -> Result<Arc<Service>, LookupError> {
        Lister::get(&self.caches.services, namespace, name)
    }

    /// A deleted Service leaves its upstreams without nodes
    fn translate(&self, svc: &Service, kind: EventKind) -> Result<Vec<UpstreamNodes>, TranslateError> {
        let namespace = svc.namespace().unwrap_or_default();
        let name = svc.name_any();

        let ports = svc.spec.iter().flat_map(|spec| spec.ports.iter().flatten());
        let mut out = Vec::new();
        for port in ports {
            let nodes = match kind {
                EventKind::Delete => Vec::new(),
                EventKind::Add | EventKind::Update => {
                    match self.translator.resolve_upstream_nodes(&namespace, &name, port.port) {
                        Ok(nodes) => nodes,
                        // No endpoint object yet means no ready backends
                        Err(err) if err.field == "endpoints" || err.field == "endpointslice" => {
                            debug!(service = %name, namespace = %namespace, error = %err, "no endpoints");
                            Vec::new()
                        }
                        Err(err) => return Err(err),
                    }
                }
            };
            out.push(UpstreamNodes {
                upstream_id: compose_upstream_name(&namespace, &name, port.port),
                nodes,
            });
        }
        Ok(out)
    }

    /// Only upstreams some route already uses are touched; their policy is
    /// kept as stored on the gateway
    async fn sync(&self, output: &Vec<UpstreamNodes>, _kind: EventKind) -> Result<(), SyncError> {
        let client = self.gateway.upstream();
        for entry in output {
            let Some(mut ups) = client.get(&entry.upstream_id).await? else {
                debug!(upstream = %entry.upstream_id, "upstream not on the gateway, skipping");
                continue;
            };
            if ups.nodes == entry.nodes {
                continue;
            }
            ups.nodes = entry.nodes.clone();
            client.update(&entry.upstream_id, &ups).await?;
        }
        Ok(())
    }

    async fn wait_for_cache_sync(&self) -> bool {
        self.caches.wait_for_sync().await
    }
}

/// Requeues the owning Service on any Endpoints or EndpointSlice change
pub struct ServiceTrigger {
    controller: Arc<Controller<EndpointsReconciler>>,
}

impl ServiceTrigger {
    pub fn new(controller: Arc<Controller<EndpointsReconciler>>) -> Self {
        Self { controller }
    }

    fn requeue(&self, namespace: &str, service: &str) {
        if !self.controller.is_watching(namespace) {
            return;
        }
        let key = if namespace.is_empty() {
            service.to_string()
        } else {
            format!("{}/{}", namespace, service)
        };
        // A pending Service delete outranks this nudge
        self.controller.enqueue_if_absent(Event::update(key, None));
    }
}

impl ResourceEventHandler<Endpoints> for ServiceTrigger {
    fn on_add(&self, obj: Arc<Endpoints>) {
        self.requeue(&obj.namespace().unwrap_or_default(), &obj.name_any());
    }

    fn on_update(&self, _old: Arc<Endpoints>, new: Arc<Endpoints>) {
        self.requeue(&new.namespace().unwrap_or_default(), &new.name_any());
    }

    fn on_delete(&self, obj: Arc<Endpoints>) {
        self.requeue(&obj.namespace().unwrap_or_default(), &obj.name_any());
    }
}

impl ResourceEventHandler<EndpointSlice> for ServiceTrigger {
    fn on_add(&self, obj: Arc<EndpointSlice>) {
        self.requeue(&obj.namespace().unwrap_or_default(), &service_name_of_slice(&obj));
    }

    fn on_update(&self, _old: Arc<EndpointSlice>, new: Arc<EndpointSlice>) {
        self.requeue(&new.namespace().unwrap_or_default(), &service_name_of_slice(&new));
    }

    fn on_delete(&self, obj: Arc<EndpointSlice>) {
        self.requeue(&obj.namespace().unwrap_or_default(), &service_name_of_slice(&obj));
    }
}
