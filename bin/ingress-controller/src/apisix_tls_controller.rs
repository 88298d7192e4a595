//! ApisixTls controller: keeps one gateway Ssl per TLS binding

use crate::caches::Caches;
use async_trait::async_trait;
use dashmap::DashMap;
use ingress_api::ApisixTls;
use ingress_core::apisix::{compose_id, Ssl};
use ingress_core::gateway::sync_object;
use ingress_core::{
    EventKind, Gateway, Lister, LookupError, Reconciler, SecretIndex, SyncError, TranslateError,
    Translator,
};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::warn;

pub struct ApisixTlsReconciler {
    caches: Caches,
    translator: Arc<Translator>,
    index: Arc<SecretIndex>,
    gateway: Arc<dyn Gateway>,
    /// Secret key each Ssl is currently indexed under
    bound_secrets: DashMap<String, String>,
}

impl ApisixTlsReconciler {
    pub fn new(
        caches: Caches,
        translator: Arc<Translator>,
        index: Arc<SecretIndex>,
        gateway: Arc<dyn Gateway>,
    ) -> Self {
        Self {
            caches,
            translator,
            index,
            gateway,
            bound_secrets: DashMap::new(),
        }
    }
}

#[async_trait]
impl Reconciler for ApisixTlsReconciler {
    type Object = ApisixTls;
    type Output = Ssl;

    fn kind(&self) -> &'static str {
        "ApisixTls"
    }

    fn lookup(&self, namespace: &str, name: &str) -> Result<Arc<ApisixTls>, LookupError> {
        Lister::get(&self.caches.apisix_tls, namespace, name)
    }

    fn translate(&self, tls: &ApisixTls, kind: EventKind) -> Result<Ssl, TranslateError> {
        match self.translator.translate_ssl(tls) {
            Ok(ssl) => Ok(ssl),
            // Removal needs the id only, so a vanished secret must not block it
            Err(err) if kind == EventKind::Delete => {
                warn!(
                    tls = %format!("{}/{}", tls.namespace().unwrap_or_default(), tls.name_any()),
                    error = %err,
                    "removing ssl without certificate material"
                );
                Ok(Ssl {
                    id: compose_id(&tls.namespace().unwrap_or_default(), &tls.name_any()),
                    server_names: tls.spec.hosts.clone(),
                    certificate: String::new(),
                    private_key: String::new(),
                    status: 1,
                })
            }
            Err(err) => Err(err),
        }
    }

    fn before_sync(&self, tls: &ApisixTls, ssl: &Ssl, kind: EventKind) {
        let secret = &tls.spec.secret;
        let secret_key = SecretIndex::secret_key(&secret.namespace, &secret.name);

        if kind == EventKind::Delete {
            self.index.remove(&secret_key, &ssl.id);
            self.bound_secrets.remove(&ssl.id);
            return;
        }

        // A binding moved to another secret must stop following the old one
        if let Some(previous) = self.bound_secrets.insert(ssl.id.clone(), secret_key.clone()) {
            if previous != secret_key {
                self.index.remove(&previous, &ssl.id);
            }
        }
        self.index.upsert(&secret_key, &ssl.id, ssl.clone());
    }

    async fn sync(&self, ssl: &Ssl, kind: EventKind) -> Result<(), SyncError> {
        sync_object(self.gateway.ssl(), kind, ssl).await
    }

    async fn wait_for_cache_sync(&self) -> bool {
        self.caches.wait_for_sync().await
    }
}
