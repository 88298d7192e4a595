use super::GatewayObject;
use serde::{Deserialize, Serialize};

/// HTTP route matching a host and a set of URIs to an upstream
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,

    #[serde(default)]
    pub uris: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub upstream_id: String,
}

impl GatewayObject for Route {
    const COLLECTION: &'static str = "routes";

    fn id(&self) -> &str {
        &self.id
    }
}
