use ingress_core::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("invalid admin client configuration: {0}")]
    Config(String),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status {status} from {url}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl From<AdminError> for SyncError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::Config(reason) => SyncError::Request {
                url: String::new(),
                reason,
            },
            AdminError::Request { url, source } => SyncError::Request {
                url,
                reason: source.to_string(),
            },
            AdminError::Status { url, status, body } => SyncError::Status { url, status, body },
            AdminError::Decode { url, reason } => SyncError::Decode { url, reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_maps_to_sync_error() {
        let err: SyncError = AdminError::Status {
            url: "http://apisix/ssl/a".to_string(),
            status: 500,
            body: "boom".to_string(),
        }
        .into();
        assert_eq!(
            err,
            SyncError::Status {
                url: "http://apisix/ssl/a".to_string(),
                status: 500,
                body: "boom".to_string(),
            }
        );
    }
}
