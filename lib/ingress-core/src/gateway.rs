//! Gateway sync collaborators

use crate::apisix::{GatewayObject, Route, Ssl, Upstream};
use crate::error::SyncError;
use crate::event::EventKind;
use async_trait::async_trait;

/// CRUD over one admin API collection
#[async_trait]
pub trait ResourceClient<T: GatewayObject>: Send + Sync {
    async fn list(&self) -> Result<Vec<T>, SyncError>;

    /// `None` when no object exists under `id`
    async fn get(&self, id: &str) -> Result<Option<T>, SyncError>;

    async fn create(&self, obj: &T) -> Result<T, SyncError>;

    async fn update(&self, id: &str, obj: &T) -> Result<(), SyncError>;

    async fn delete(&self, id: &str) -> Result<(), SyncError>;
}

/// Apply the gateway call matching an event kind
pub async fn sync_object<T, C>(client: &C, kind: EventKind, obj: &T) -> Result<(), SyncError>
where
    T: GatewayObject,
    C: ResourceClient<T> + ?Sized,
{
    match kind {
        EventKind::Add => client.create(obj).await.map(|_| ()),
        EventKind::Update => client.update(obj.id(), obj).await,
        EventKind::Delete => client.delete(obj.id()).await,
    }
}

/// The admin API of one gateway cluster
pub trait Gateway: Send + Sync {
    fn ssl(&self) -> &dyn ResourceClient<Ssl>;
    fn upstream(&self) -> &dyn ResourceClient<Upstream>;
    fn route(&self) -> &dyn ResourceClient<Route>;
}
