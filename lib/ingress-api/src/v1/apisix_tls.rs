use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ApisixTls binds the certificate stored in a Kubernetes Secret
/// to the hosts the gateway should serve over TLS
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "apisix.apache.org",
    version = "v1",
    kind = "ApisixTls",
    plural = "apisixtlses",
    shortname = "atls",
    namespaced,
    derive = "Default",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Secret","type":"string","jsonPath":".spec.secret.name"}"#,
)]
pub struct ApisixTlsSpec {
    /// Server names (SNI) served with this certificate
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Secret holding the certificate and private key
    pub secret: ApisixSecret,
}

/// Reference to the Secret carrying TLS material
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ApisixSecret {
    /// Name of the Secret
    pub name: String,
    /// Namespace of the Secret
    pub namespace: String,
}
