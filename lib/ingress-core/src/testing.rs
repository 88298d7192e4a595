//! In-memory collaborators for controller tests

use crate::apisix::{GatewayObject, Route, Ssl, Upstream};
use crate::error::SyncError;
use crate::gateway::{Gateway, ResourceClient};
use crate::recorder::EventRecorder;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Records every call and keeps objects by id
pub struct MemoryClient<T> {
    pub objects: Mutex<BTreeMap<String, T>>,
    pub calls: Mutex<Vec<String>>,
    pub fail_with: Mutex<Option<SyncError>>,
}

impl<T> Default for MemoryClient<T> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
        }
    }
}

impl<T> MemoryClient<T> {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail(&self, err: SyncError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    fn call(&self, what: String) -> Result<(), SyncError> {
        self.calls.lock().unwrap().push(what);
        match self.fail_with.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<T: GatewayObject> ResourceClient<T> for MemoryClient<T> {
    async fn list(&self) -> Result<Vec<T>, SyncError> {
        self.call("list".to_string())?;
        Ok(self.objects.lock().unwrap().values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<T>, SyncError> {
        self.call(format!("get {}", id))?;
        Ok(self.objects.lock().unwrap().get(id).cloned())
    }

    async fn create(&self, obj: &T) -> Result<T, SyncError> {
        self.call(format!("create {}", obj.id()))?;
        self.objects
            .lock()
            .unwrap()
            .insert(obj.id().to_string(), obj.clone());
        Ok(obj.clone())
    }

    async fn update(&self, id: &str, obj: &T) -> Result<(), SyncError> {
        self.call(format!("update {}", id))?;
        self.objects.lock().unwrap().insert(id.to_string(), obj.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SyncError> {
        self.call(format!("delete {}", id))?;
        self.objects.lock().unwrap().remove(id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryGateway {
    pub ssls: MemoryClient<Ssl>,
    pub upstreams: MemoryClient<Upstream>,
    pub routes: MemoryClient<Route>,
}

impl Gateway for MemoryGateway {
    fn ssl(&self) -> &dyn ResourceClient<Ssl> {
        &self.ssls
    }

    fn upstream(&self) -> &dyn ResourceClient<Upstream> {
        &self.upstreams
    }

    fn route(&self) -> &dyn ResourceClient<Route> {
        &self.routes
    }
}

/// One event captured by `MemoryRecorder`
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    pub object: Option<String>,
    pub warning: bool,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
pub struct MemoryRecorder {
    pub events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryRecorder {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventRecorder for MemoryRecorder {
    async fn record(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        message: &str,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            object: object.name.clone(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
