//! Declared resources watched by the APISIX ingress controller
//!
//! This library defines:
//! - ApisixTls: binds a TLS secret to a set of hosts
//! - ApisixUpstream: upstream policy (scheme, load balancing, health checks,
//!   retries, timeouts) for the Service of the same name
//! - networking_v1beta1: the legacy Ingress shape still served by older clusters
//! - duration: Kubernetes duration strings as used by the CRDs

pub mod duration;
pub mod networking_v1beta1;
pub mod v1;

pub use v1::{ApisixTls, ApisixUpstream};
