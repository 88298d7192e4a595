//! Gateway objects as understood by the APISIX admin API
//!
//! Objects are built by the translator and handed to the gateway client.
//! They are never patched in place: a changed declaration produces a new
//! object that replaces the previous one under the same id.

mod route;
mod ssl;
pub mod upstream;

pub use route::Route;
pub use ssl::Ssl;
pub use upstream::{
    ActiveHealthy, ActiveUnhealthy, LoadBalancer, PassiveHealthy, PassiveUnhealthy, Upstream,
    UpstreamActiveHealthCheck, UpstreamHealthCheck, UpstreamNode, UpstreamPassiveHealthCheck,
    UpstreamTimeout,
};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Debug;

/// A configuration entity stored in one admin API collection
pub trait GatewayObject: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection path segment below the admin API base URL
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

/// Identity of a gateway object owned by a namespaced declared resource
pub fn compose_id(namespace: &str, name: &str) -> String {
    format!("{}_{}", namespace, name)
}

/// Name (and id) of the upstream generated for one Service port
pub fn compose_upstream_name(namespace: &str, name: &str, port: i32) -> String {
    format!("{}_{}_{}", namespace, name, port)
}

/// Stable id for names that may carry characters the admin API rejects
/// in ids (hosts, paths)
pub fn stable_id(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    hex::encode(&digest[..16])
}

pub(crate) fn is_zero(v: &i32) -> bool {
    *v == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_id() {
        assert_eq!(compose_id("helm", "foo"), "helm_foo");
        assert_eq!(compose_upstream_name("default", "httpbin", 80), "default_httpbin_80");
    }

    #[test]
    fn test_stable_id_is_deterministic_and_url_safe() {
        let a = stable_id("default_web_example.com/api");
        let b = stable_id("default_web_example.com/api");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, stable_id("default_web_example.com/"));
    }
}
