//! Typed access to one admin API collection
//!
//! Two response envelopes are understood:
//! - `{"node": {"value": {..}}}` and `{"node": {"nodes": [{"value": {..}}]}}`
//! - `{"value": {..}}` and `{"list": [{"value": {..}}], "total": n}`

use crate::client::AdminClient;
use crate::error::AdminError;
use async_trait::async_trait;
use ingress_core::apisix::GatewayObject;
use ingress_core::{ResourceClient, SyncError};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

pub struct ResourceApi<T> {
    client: Arc<AdminClient>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: GatewayObject> ResourceApi<T> {
    pub fn new(client: Arc<AdminClient>) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn url(&self, id: Option<&str>) -> String {
        self.client.url(T::COLLECTION, id)
    }

    pub async fn list_objects(&self) -> Result<Vec<T>, AdminError> {
        let url = self.url(None);
        match self.client.get_json(&url).await? {
            Some(body) => decode_list(&url, body),
            None => Ok(Vec::new()),
        }
    }

    pub async fn get_object(&self, id: &str) -> Result<Option<T>, AdminError> {
        let url = self.url(Some(id));
        match self.client.get_json(&url).await? {
            Some(body) => decode_item(&url, body),
            None => Ok(None),
        }
    }

    /// Store `obj` under its id; returns the object as stored by the gateway
    pub async fn put_object(&self, id: &str, obj: &T) -> Result<T, AdminError> {
        let url = self.url(Some(id));
        debug!(collection = T::COLLECTION, id = %id, "put");
        let body = self.client.put_json(&url, obj).await?;
        Ok(decode_item(&url, body)?.unwrap_or_else(|| obj.clone()))
    }

    pub async fn delete_object(&self, id: &str) -> Result<(), AdminError> {
        debug!(collection = T::COLLECTION, id = %id, "delete");
        self.client.delete(&self.url(Some(id))).await
    }
}

#[async_trait]
impl<T: GatewayObject> ResourceClient<T> for ResourceApi<T> {
    async fn list(&self) -> Result<Vec<T>, SyncError> {
        Ok(self.list_objects().await?)
    }

    async fn get(&self, id: &str) -> Result<Option<T>, SyncError> {
        Ok(self.get_object(id).await?)
    }

    async fn create(&self, obj: &T) -> Result<T, SyncError> {
        Ok(self.put_object(obj.id(), obj).await?)
    }

    async fn update(&self, id: &str, obj: &T) -> Result<(), SyncError> {
        self.put_object(id, obj).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SyncError> {
        Ok(self.delete_object(id).await?)
    }
}

fn decode_list<T: GatewayObject>(url: &str, mut body: Value) -> Result<Vec<T>, AdminError> {
    let items = match body.get_mut("list").map(Value::take) {
        Some(list) => list,
        None => body
            .pointer_mut("/node/nodes")
            .map(Value::take)
            .unwrap_or(Value::Null),
    };

    match items {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| decode_value(url, item).transpose())
            .collect(),
        // Empty collections are rendered as `{}` or omitted entirely
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        Value::Null => Ok(Vec::new()),
        other => Err(AdminError::Decode {
            url: url.to_string(),
            reason: format!("unexpected list payload {}", other),
        }),
    }
}

fn decode_item<T: GatewayObject>(url: &str, mut body: Value) -> Result<Option<T>, AdminError> {
    if let Some(node) = body.get_mut("node").map(Value::take) {
        return decode_value(url, node);
    }
    decode_value(url, body)
}

/// Decodes the `value` of one stored entry; entries without a value are
/// skipped
fn decode_value<T: GatewayObject>(url: &str, mut entry: Value) -> Result<Option<T>, AdminError> {
    let Some(value) = entry.get_mut("value").map(Value::take) else {
        return Ok(None);
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|err| AdminError::Decode {
            url: url.to_string(),
            reason: err.to_string(),
        })
}
