//! ApisixUpstream controller: re-applies upstream policy to the gateway
//! upstreams generated for the Service of the same name

use crate::caches::Caches;
use async_trait::async_trait;
use ingress_api::ApisixUpstream;
use ingress_core::apisix::{compose_upstream_name, Upstream};
use ingress_core::{
    EventKind, Gateway, Lister, LookupError, Reconciler, SyncError, TranslateError, Translator,
};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::debug;

pub struct ApisixUpstreamReconciler {
    caches: Caches,
    translator: Arc<Translator>,
    gateway: Arc<dyn Gateway>,
}

impl ApisixUpstreamReconciler {
    pub fn new(caches: Caches, translator: Arc<Translator>, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            caches,
            translator,
            gateway,
        }
    }
}

#[async_trait]
impl Reconciler for ApisixUpstreamReconciler {
    type Object = ApisixUpstream;
    type Output = Vec<Upstream>;

    fn kind(&self) -> &'static str {
        "ApisixUpstream"
    }

    fn lookup(&self, namespace: &str, name: &str) -> Result<Arc<ApisixUpstream>, LookupError> {
        Lister::get(&self.caches.apisix_upstreams, namespace, name)
    }

    /// One upstream per port of the Service. After a delete the policy is
    /// gone from the cache, so the ports fall back to the default policy.
    fn translate(
        &self,
        au: &ApisixUpstream,
        _kind: EventKind,
    ) -> Result<Vec<Upstream>, TranslateError> {
        let namespace = au.namespace().unwrap_or_default();
        let name = au.name_any();

        let svc = match Lister::get(&self.caches.services, &namespace, &name) {
            Ok(svc) => svc,
            Err(err) if err.is_not_found() => {
                debug!(namespace = %namespace, name = %name, "no service for upstream policy");
                return Ok(Vec::new());
            }
            Err(err) => return Err(TranslateError::new("service", err.to_string())),
        };

        let ports = svc.spec.iter().flat_map(|spec| spec.ports.iter().flatten());
        let mut upstreams = Vec::new();
        for port in ports {
            let mut ups = self.translator.translate_upstream(&namespace, &name, port.port)?;
            ups.id = compose_upstream_name(&namespace, &name, port.port);
            ups.name = ups.id.clone();
            upstreams.push(ups);
        }
        Ok(upstreams)
    }

    /// Only upstreams some route already uses are touched
    async fn sync(&self, upstreams: &Vec<Upstream>, _kind: EventKind) -> Result<(), SyncError> {
        let client = self.gateway.upstream();
        for ups in upstreams {
            if client.get(&ups.id).await?.is_none() {
                debug!(upstream = %ups.id, "upstream not on the gateway, skipping");
                continue;
            }
            client.update(&ups.id, ups).await?;
        }
        Ok(())
    }

    async fn wait_for_cache_sync(&self) -> bool {
        self.caches.wait_for_sync().await
    }
}
