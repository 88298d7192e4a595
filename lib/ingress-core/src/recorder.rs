//! Observability events attached to declared resources

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

pub const REASON_SYNCED: &str = "ResourcesSynced";
pub const REASON_SYNC_ABORTED: &str = "ResourceSyncAborted";

pub fn synced_message(kind: &str) -> String {
    format!("{} synced successfully", kind)
}

pub fn sync_failed_message(kind: &str, err: &dyn std::fmt::Display) -> String {
    format!("{} synced failed, with error: {}", kind, err)
}

/// Sink for events about a declared resource
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        message: &str,
    );
}

/// Publishes events through the Kubernetes events API
pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    pub fn new(client: Client, controller: &str) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        message: &str,
    ) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), object.clone());
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Sync".to_string(),
            secondary: None,
        };
        // Event delivery is best effort
        if let Err(err) = recorder.publish(event).await {
            warn!(
                object = ?object.name,
                reason = %reason,
                error = %err,
                "failed to publish event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(synced_message("ApisixTls"), "ApisixTls synced successfully");
        assert_eq!(
            sync_failed_message("ApisixTls", &"secret: not found"),
            "ApisixTls synced failed, with error: secret: not found"
        );
    }
}
