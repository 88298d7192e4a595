//! Secret cross-reference index
//!
//! Maps a secret identity (`namespace_name`) to the Ssl objects translated
//! from it, so that a secret rotation can find every dependent Ssl without
//! rescanning all TLS bindings.

use crate::apisix::{compose_id, Ssl};
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

/// Secret identity to (ssl id to Ssl)
///
/// Bucket creation and the mutation that follows happen under the same
/// shard write guard, so readers never observe a bucket missing an update
/// that was already applied to it.
#[derive(Debug, Default)]
pub struct SecretIndex {
    buckets: DashMap<String, HashMap<String, Ssl>>,
}

impl SecretIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity under which a secret's dependents are indexed
    pub fn secret_key(namespace: &str, name: &str) -> String {
        compose_id(namespace, name)
    }

    /// Insert or replace the entry for `ssl_id`, creating the bucket on first use
    pub fn upsert(&self, secret_key: &str, ssl_id: &str, ssl: Ssl) {
        self.buckets
            .entry(secret_key.to_string())
            .or_default()
            .insert(ssl_id.to_string(), ssl);
        debug!(secret = %secret_key, ssl = %ssl_id, "indexed ssl");
    }

    /// Replace the entry for `ssl_id` only if it is still indexed. Returns
    /// whether it was.
    pub fn refresh(&self, secret_key: &str, ssl_id: &str, ssl: Ssl) -> bool {
        let Some(mut bucket) = self.buckets.get_mut(secret_key) else {
            return false;
        };
        match bucket.get_mut(ssl_id) {
            Some(entry) => {
                *entry = ssl;
                true
            }
            None => false,
        }
    }

    /// Remove only the entry for `ssl_id`; an emptied bucket is kept
    pub fn remove(&self, secret_key: &str, ssl_id: &str) {
        if let Some(mut bucket) = self.buckets.get_mut(secret_key) {
            bucket.remove(ssl_id);
            debug!(secret = %secret_key, ssl = %ssl_id, "unindexed ssl");
        }
    }

    /// Ssl objects currently derived from the secret, ordered by id
    pub fn lookup(&self, secret_key: &str) -> Vec<Ssl> {
        let mut ssls: Vec<Ssl> = self
            .buckets
            .get(secret_key)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default();
        ssls.sort_by(|a, b| a.id.cmp(&b.id));
        ssls
    }

    /// Whether `ssl_id` is currently derived from the secret
    pub fn contains_ssl(&self, secret_key: &str, ssl_id: &str) -> bool {
        self.buckets
            .get(secret_key)
            .map_or(false, |bucket| bucket.contains_key(ssl_id))
    }

    /// Whether any binding ever referenced the secret
    pub fn contains(&self, secret_key: &str) -> bool {
        self.buckets.contains_key(secret_key)
    }

    /// Number of secrets with a bucket
    pub fn secret_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ssl(id: &str, cert: &str) -> Ssl {
        Ssl {
            id: id.to_string(),
            server_names: vec!["api6.com".to_string()],
            certificate: cert.to_string(),
            private_key: "key".to_string(),
            status: 1,
        }
    }

    #[test]
    fn test_bindings_sharing_a_secret_coexist() {
        let index = SecretIndex::new();
        let secret = SecretIndex::secret_key("helm", "shared-cert");
        index.upsert(&secret, "helm_foo", ssl("helm_foo", "a"));
        index.upsert(&secret, "helm_bar", ssl("helm_bar", "a"));

        let ids: Vec<String> = index.lookup(&secret).into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["helm_bar".to_string(), "helm_foo".to_string()]);

        index.remove(&secret, "helm_foo");
        let ids: Vec<String> = index.lookup(&secret).into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["helm_bar".to_string()]);
    }

    #[test]
    fn test_upsert_replaces_existing_entry() {
        let index = SecretIndex::new();
        index.upsert("ns_cert", "ns_foo", ssl("ns_foo", "old"));
        index.upsert("ns_cert", "ns_foo", ssl("ns_foo", "new"));

        let ssls = index.lookup("ns_cert");
        assert_eq!(ssls.len(), 1);
        assert_eq!(ssls[0].certificate, "new");
    }

    #[test]
    fn test_same_secret_name_in_different_namespaces() {
        let index = SecretIndex::new();
        let first = SecretIndex::secret_key("ns1", "shared-cert");
        let second = SecretIndex::secret_key("ns2", "shared-cert");
        assert_eq!(first, "ns1_shared-cert");
        assert_eq!(second, "ns2_shared-cert");

        index.upsert(&first, "ns1_foo", ssl("ns1_foo", "one"));
        index.upsert(&second, "ns2_foo", ssl("ns2_foo", "two"));

        assert_eq!(index.lookup(&first)[0].id, "ns1_foo");
        assert_eq!(index.lookup(&second)[0].id, "ns2_foo");
        assert_eq!(index.secret_count(), 2);
    }

    #[test]
    fn test_removing_last_entry_keeps_bucket() {
        let index = SecretIndex::new();
        index.upsert("ns_cert", "ns_foo", ssl("ns_foo", "a"));
        index.remove("ns_cert", "ns_foo");
        index.remove("ns_missing", "ns_foo");

        assert!(index.contains("ns_cert"));
        assert!(index.lookup("ns_cert").is_empty());
        assert!(index.lookup("ns_missing").is_empty());
        assert!(!index.contains("ns_missing"));
    }

    #[test]
    fn test_refresh_never_recreates_removed_entry() {
        let index = SecretIndex::new();
        index.upsert("ns_cert", "ns_foo", ssl("ns_foo", "old"));
        assert!(index.refresh("ns_cert", "ns_foo", ssl("ns_foo", "new")));
        assert_eq!(index.lookup("ns_cert")[0].certificate, "new");

        index.remove("ns_cert", "ns_foo");
        assert!(!index.refresh("ns_cert", "ns_foo", ssl("ns_foo", "newer")));
        assert!(!index.refresh("ns_other", "ns_foo", ssl("ns_foo", "newer")));
        assert!(index.lookup("ns_cert").is_empty());
        assert!(!index.contains_ssl("ns_cert", "ns_foo"));
    }

    #[tokio::test]
    async fn test_concurrent_upserts_are_all_visible() {
        let index = Arc::new(SecretIndex::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let index = Arc::clone(&index);
            handles.push(tokio::spawn(async move {
                let id = format!("ns_tls{}", i);
                index.upsert("ns_cert", &id, ssl(&id, "a"));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(index.lookup("ns_cert").len(), 16);
    }
}
