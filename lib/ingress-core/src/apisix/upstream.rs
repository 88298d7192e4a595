use super::{is_zero, GatewayObject};
use serde::{Deserialize, Serialize};

pub const LB_ROUND_ROBIN: &str = "roundrobin";
pub const LB_CONSISTENT_HASH: &str = "chash";
pub const LB_EWMA: &str = "ewma";
pub const LB_LEAST_CONN: &str = "least_conn";

pub const HASH_ON_VARS: &str = "vars";
pub const HASH_ON_VARS_COMBINATION: &str = "vars_combinations";
pub const HASH_ON_HEADER: &str = "header";
pub const HASH_ON_COOKIE: &str = "cookie";
pub const HASH_ON_CONSUMER: &str = "consumer";

pub const SCHEME_HTTP: &str = "http";
pub const SCHEME_GRPC: &str = "grpc";

pub const HEALTH_CHECK_HTTP: &str = "http";
pub const HEALTH_CHECK_HTTPS: &str = "https";
pub const HEALTH_CHECK_TCP: &str = "tcp";

/// Timeout applied to each of connect/send/read once any of them is declared
pub const DEFAULT_UPSTREAM_TIMEOUT: u64 = 60;

/// Weight given to every node; nodes carry no per-node weight source
pub const DEFAULT_WEIGHT: i32 = 100;

/// Set of backends plus the policy used to reach them
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(flatten)]
    pub load_balancer: LoadBalancer,

    #[serde(rename = "checks", default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<UpstreamHealthCheck>,

    #[serde(default)]
    pub nodes: Vec<UpstreamNode>,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<UpstreamTimeout>,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            load_balancer: LoadBalancer::default(),
            health_check: None,
            nodes: Vec::new(),
            scheme: default_scheme(),
            retries: None,
            timeout: None,
        }
    }
}

fn default_scheme() -> String {
    SCHEME_HTTP.to_string()
}

impl GatewayObject for Upstream {
    const COLLECTION: &'static str = "upstreams";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Load balancing algorithm and, for consistent hashing, its hash source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_on: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self {
            type_: LB_ROUND_ROBIN.to_string(),
            hash_on: None,
            key: None,
        }
    }
}

/// One backend address
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamNode {
    #[serde(rename = "host")]
    pub ip: String,
    pub port: i32,
    pub weight: i32,
}

/// Timeouts in seconds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamTimeout {
    pub connect: u64,
    pub send: u64,
    pub read: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamHealthCheck {
    pub active: UpstreamActiveHealthCheck,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passive: Option<UpstreamPassiveHealthCheck>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamActiveHealthCheck {
    #[serde(rename = "type")]
    pub type_: String,

    /// Probe timeout in seconds
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub timeout: f64,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub concurrency: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub port: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http_path: String,

    #[serde(default)]
    pub https_verify_certificate: bool,

    #[serde(rename = "req_headers", default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers: Vec<String>,

    #[serde(default)]
    pub healthy: ActiveHealthy,

    #[serde(default)]
    pub unhealthy: ActiveUnhealthy,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHealthy {
    /// Seconds between probes
    #[serde(default, skip_serializing_if = "is_zero")]
    pub interval: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_statuses: Vec<i32>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub successes: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveUnhealthy {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub interval: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_statuses: Vec<i32>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub http_failures: i32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub tcp_failures: i32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub timeouts: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamPassiveHealthCheck {
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default)]
    pub healthy: PassiveHealthy,

    #[serde(default)]
    pub unhealthy: PassiveUnhealthy,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassiveHealthy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_statuses: Vec<i32>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub successes: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassiveUnhealthy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_statuses: Vec<i32>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub http_failures: i32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub tcp_failures: i32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub timeouts: i32,
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_upstream() {
        let ups = Upstream::default();
        assert_eq!(ups.load_balancer.type_, "roundrobin");
        assert_eq!(ups.scheme, "http");
        assert!(ups.nodes.is_empty());
        assert!(ups.health_check.is_none());
    }

    #[test]
    fn test_upstream_wire_format() {
        let ups = Upstream {
            id: "default_httpbin_80".to_string(),
            name: "default_httpbin_80".to_string(),
            load_balancer: LoadBalancer {
                type_: LB_CONSISTENT_HASH.to_string(),
                hash_on: Some(HASH_ON_HEADER.to_string()),
                key: Some("X-User".to_string()),
            },
            nodes: vec![UpstreamNode {
                ip: "10.0.0.5".to_string(),
                port: 80,
                weight: DEFAULT_WEIGHT,
            }],
            ..Default::default()
        };

        let value = serde_json::to_value(&ups).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "default_httpbin_80",
                "name": "default_httpbin_80",
                "type": "chash",
                "hash_on": "header",
                "key": "X-User",
                "nodes": [{"host": "10.0.0.5", "port": 80, "weight": 100}],
                "scheme": "http"
            })
        );

        let back: Upstream = serde_json::from_value(value).unwrap();
        assert_eq!(back, ups);
    }
}
