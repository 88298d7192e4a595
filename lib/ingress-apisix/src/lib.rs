//! APISIX admin API client
//!
//! Implements the gateway sync traits of `ingress-core` over HTTP. Every
//! collection (`/ssl`, `/upstreams`, `/routes`) is addressed by the
//! deterministic object id, so creates and updates are both `PUT`s.

pub mod client;
pub mod cluster;
pub mod error;
pub mod resource;

pub use client::{AdminClient, AdminConfig};
pub use cluster::Apisix;
pub use error::AdminError;
pub use resource::ResourceApi;
