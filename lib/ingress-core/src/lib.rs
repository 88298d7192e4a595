//! Reconciliation engine for the APISIX ingress controller
//!
//! This library provides:
//! - Gateway objects (Ssl, Upstream, Route) as understood by the APISIX admin API
//! - Translator mapping declared resources plus cached cluster state to gateway objects
//! - Secret cross-reference index used to cascade certificate rotation
//! - Rate limited work queue and the generic per-kind reconciliation controller
//! - Informer dispatch turning watch streams into add/update/delete notifications

pub mod apisix;
pub mod cache;
pub mod controller;
pub mod error;
pub mod event;
pub mod gateway;
pub mod informer;
pub mod recorder;
pub mod secret_index;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod translation;
pub mod workqueue;

pub use cache::{CacheSync, EndpointSliceLister, Lister};
pub use controller::{Controller, ControllerConfig, Outcome, Reconciler};
pub use error::{CoreError, LookupError, ReconcileError, Result, SyncError, TranslateError};
pub use event::{Event, EventKind};
pub use gateway::{Gateway, ResourceClient};
pub use informer::{Informer, ResourceEventHandler};
pub use recorder::EventRecorder;
pub use secret_index::SecretIndex;
pub use translation::{EndpointMode, Translator, TranslatorOptions};
pub use workqueue::{FastSlowRateLimiter, WorkQueue};
