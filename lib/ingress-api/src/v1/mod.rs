/// API version v1 for APISIX ingress CRDs

pub mod apisix_tls;
pub mod apisix_upstream;

pub use apisix_tls::{ApisixSecret, ApisixTls, ApisixTlsSpec};
pub use apisix_upstream::{
    ActiveHealthCheck, ActiveHealthCheckHealthy, ActiveHealthCheckUnhealthy, ApisixUpstream,
    ApisixUpstreamConfig, ApisixUpstreamSpec, HealthCheck, LoadBalancer, PassiveHealthCheck,
    PassiveHealthCheckHealthy, PassiveHealthCheckUnhealthy, PortLevelSettings, UpstreamTimeout,
};

/// API group for APISIX ingress resources
pub const API_GROUP: &str = "apisix.apache.org";
/// API version for APISIX ingress resources
pub const API_VERSION: &str = "v1";
