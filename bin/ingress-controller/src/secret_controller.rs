//! Secret controller: cascades certificate rotation to the Ssl objects
//! recorded in the secret index

use crate::caches::Caches;
use async_trait::async_trait;
use ingress_core::apisix::Ssl;
use ingress_core::translation::ssl_material;
use ingress_core::{
    EventKind, Gateway, Lister, LookupError, Reconciler, SecretIndex, SyncError, TranslateError,
};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::debug;

pub struct SecretReconciler {
    caches: Caches,
    index: Arc<SecretIndex>,
    gateway: Arc<dyn Gateway>,
}

impl SecretReconciler {
    pub fn new(caches: Caches, index: Arc<SecretIndex>, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            caches,
            index,
            gateway,
        }
    }

    fn secret_key(secret: &Secret) -> String {
        SecretIndex::secret_key(&secret.namespace().unwrap_or_default(), &secret.name_any())
    }
}

/// Dependent Ssl objects of one secret
#[derive(Clone, Debug)]
pub struct SecretSync {
    pub secret_key: String,
    pub ssls: Vec<Ssl>,
}

#[async_trait]
impl Reconciler for SecretReconciler {
    type Object = Secret;
    type Output = SecretSync;

    fn kind(&self) -> &'static str {
        "Secret"
    }

    fn lookup(&self, namespace: &str, name: &str) -> Result<Arc<Secret>, LookupError> {
        Lister::get(&self.caches.secrets, namespace, name)
    }

    /// Only secrets some TLS binding referenced are of interest
    fn filter(&self, secret: &Secret) -> bool {
        self.index.contains(&Self::secret_key(secret))
    }

    fn translate(&self, secret: &Secret, kind: EventKind) -> Result<SecretSync, TranslateError> {
        let secret_key = Self::secret_key(secret);
        let dependents = self.index.lookup(&secret_key);
        if kind == EventKind::Delete {
            return Ok(SecretSync {
                secret_key,
                ssls: dependents,
            });
        }

        let (certificate, private_key) = ssl_material(secret)?;
        let ssls = dependents
            .iter()
            .map(|ssl| ssl.with_material(certificate.clone(), private_key.clone()))
            .collect();
        Ok(SecretSync { secret_key, ssls })
    }

    /// Entries a TLS binding dropped since `translate` stay dropped
    fn before_sync(&self, _secret: &Secret, output: &SecretSync, kind: EventKind) {
        if kind == EventKind::Delete {
            return;
        }
        for ssl in &output.ssls {
            self.index.refresh(&output.secret_key, &ssl.id, ssl.clone());
        }
    }

    async fn sync(&self, output: &SecretSync, kind: EventKind) -> Result<(), SyncError> {
        let client = self.gateway.ssl();
        for ssl in &output.ssls {
            if !self.index.contains_ssl(&output.secret_key, &ssl.id) {
                debug!(ssl = %ssl.id, "ssl no longer bound to the secret, skipping");
                continue;
            }
            debug!(ssl = %ssl.id, event = %kind, "cascading secret change");
            match kind {
                EventKind::Delete => client.delete(&ssl.id).await?,
                EventKind::Add | EventKind::Update => {
                    client.update(&ssl.id, ssl).await?;
                    // The binding may have been deleted while the update was in flight
                    if !self.index.contains_ssl(&output.secret_key, &ssl.id) {
                        debug!(ssl = %ssl.id, "ssl unbound during update, removing");
                        client.delete(&ssl.id).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn wait_for_cache_sync(&self) -> bool {
        self.caches.wait_for_sync().await
    }
}
