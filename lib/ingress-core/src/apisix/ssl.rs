use super::GatewayObject;
use serde::{Deserialize, Serialize};
use std::fmt;

/// TLS certificate bound to a set of server names
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ssl {
    pub id: String,

    #[serde(rename = "snis", default)]
    pub server_names: Vec<String>,

    #[serde(rename = "cert")]
    pub certificate: String,

    #[serde(rename = "key")]
    pub private_key: String,

    #[serde(default = "default_status")]
    pub status: i32,
}

fn default_status() -> i32 {
    1
}

impl Ssl {
    /// Same server names and identity, new certificate material
    pub fn with_material(&self, certificate: String, private_key: String) -> Self {
        Self {
            certificate,
            private_key,
            ..self.clone()
        }
    }
}

impl GatewayObject for Ssl {
    const COLLECTION: &'static str = "ssl";

    fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for Ssl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ssl")
            .field("id", &self.id)
            .field("server_names", &self.server_names)
            .field("certificate_len", &self.certificate.len())
            .field("private_key", &"<redacted>")
            .field("status", &self.status)
            .finish()
    }
}
