use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ApisixUpstream decorates the Service of the same name with upstream
/// policy: scheme, load balancing, health checks, retries and timeouts
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "apisix.apache.org",
    version = "v1",
    kind = "ApisixUpstream",
    plural = "apisixupstreams",
    shortname = "au",
    namespaced,
    derive = "Default",
    derive = "PartialEq",
)]
#[serde(rename_all = "camelCase")]
pub struct ApisixUpstreamSpec {
    /// Policy applied to every port of the Service
    #[serde(flatten)]
    pub config: ApisixUpstreamConfig,

    /// Per-port overrides, matched by Service port number
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_level_settings: Vec<PortLevelSettings>,
}

/// Upstream policy shared by the top level and the port level settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApisixUpstreamConfig {
    /// Load balancing algorithm
    #[serde(rename = "loadbalancer", skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancer>,

    /// Protocol used to talk to the backends: "http" or "grpc"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scheme: String,

    /// Number of retries on a failed request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<i32>,

    /// Connect/send/read timeouts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<UpstreamTimeout>,

    /// Active and passive health checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

/// Port level override of the upstream policy
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PortLevelSettings {
    /// Service port the override applies to
    pub port: i32,

    #[serde(flatten)]
    pub config: ApisixUpstreamConfig,
}

/// Load balancing configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    /// One of "roundrobin", "chash", "ewma", "least_conn"
    #[serde(rename = "type", default)]
    pub type_: String,

    /// Hash source for "chash": "vars", "header", "cookie", "consumer", "vars_combinations"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash_on: String,

    /// Hash key for "chash"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
}

/// Upstream timeouts as Kubernetes duration strings (e.g. "5s")
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UpstreamTimeout {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<String>,
}

/// Health check configuration; passive checks require active checks
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HealthCheck {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<ActiveHealthCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passive: Option<PassiveHealthCheck>,
}

/// Active health check: the gateway probes backends on its own
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveHealthCheck {
    /// "http", "https" or "tcp"
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub type_: String,

    /// Probe timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Number of backends probed concurrently
    #[serde(default)]
    pub concurrency: i32,

    /// Host header used by HTTP probes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,

    /// Probe port, 0 means the backend port
    #[serde(default)]
    pub port: i32,

    /// Path requested by HTTP probes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http_path: String,

    /// Verify backend certificates for HTTPS probes (defaults to true)
    #[serde(rename = "strictTLS", skip_serializing_if = "Option::is_none")]
    pub strict_tls: Option<bool>,

    /// Extra request headers, "Name: value"
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthy: Option<ActiveHealthCheckHealthy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unhealthy: Option<ActiveHealthCheckUnhealthy>,
}

/// Passive health check: the gateway watches live traffic
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PassiveHealthCheck {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub type_: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthy: Option<PassiveHealthCheckHealthy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unhealthy: Option<PassiveHealthCheckUnhealthy>,
}

/// Conditions under which an unhealthy backend becomes healthy again
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PassiveHealthCheckHealthy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_codes: Option<Vec<i32>>,
    #[serde(default)]
    pub successes: i32,
}

/// Conditions under which a healthy backend is marked unhealthy
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PassiveHealthCheckUnhealthy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_codes: Option<Vec<i32>>,
    #[serde(default)]
    pub http_failures: i32,
    #[serde(default)]
    pub tcp_failures: i32,
    #[serde(default)]
    pub timeouts: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveHealthCheckHealthy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_codes: Option<Vec<i32>>,
    #[serde(default)]
    pub successes: i32,
    /// Probe interval for healthy backends, at least one second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveHealthCheckUnhealthy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_codes: Option<Vec<i32>>,
    #[serde(default)]
    pub http_failures: i32,
    #[serde(default)]
    pub tcp_failures: i32,
    #[serde(default)]
    pub timeouts: i32,
    /// Probe interval for unhealthy backends, at least one second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

impl ApisixUpstreamSpec {
    /// Policy for the given Service port: the matching port level
    /// setting when declared, the top level policy otherwise
    pub fn config_for_port(&self, port: i32) -> &ApisixUpstreamConfig {
        self.port_level_settings
            .iter()
            .find(|pls| pls.port == port)
            .map(|pls| &pls.config)
            .unwrap_or(&self.config)
    }
}
