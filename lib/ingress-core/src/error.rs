use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Bootstrap and configuration failures. These surface at startup and are
/// never produced from inside a reconcile loop.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Kubernetes error: {0}")]
    KubernetesError(#[from] kube::error::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure to read an object from the cluster cache
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

impl LookupError {
    pub fn not_found(kind: impl Into<String>, namespace: &str, name: &str) -> Self {
        LookupError::NotFound {
            kind: kind.into(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LookupError::NotFound { .. })
    }
}

/// Translation failure naming the field whose resolution failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct TranslateError {
    pub field: String,
    pub reason: String,
}

impl TranslateError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(field: impl Into<String>) -> Self {
        Self::new(field, "invalid value")
    }
}

/// Failure talking to the gateway admin API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("unexpected status {status} from {url}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// Retryable failure of a single reconcile attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("failed to read cache: {0}")]
    Lookup(#[from] LookupError),

    #[error("failed to translate: {0}")]
    Translate(#[from] TranslateError),

    #[error("failed to sync to gateway: {0}")]
    Sync(#[from] SyncError),

    #[error("invalid queue key: {0}")]
    InvalidKey(String),

    #[error("delete event for {0} carries no tombstone")]
    MissingTombstone(String),
}

impl ReconcileError {
    /// Failures that retrying cannot fix
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ReconcileError::InvalidKey(_) | ReconcileError::MissingTombstone(_)
        )
    }
}
