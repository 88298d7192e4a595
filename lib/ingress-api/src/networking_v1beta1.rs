//! Legacy `networking.k8s.io/v1beta1` Ingress
//!
//! k8s-openapi only ships `networking.k8s.io/v1`. Clusters that still serve
//! the beta version are watched through this minimal shape, which carries
//! exactly the fields the translator reads.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Ingress {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<IngressSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<IngressBackend>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<IngressRule>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IngressRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HTTPIngressRuleValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HTTPIngressRuleValue {
    #[serde(default)]
    pub paths: Vec<HTTPIngressPath>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HTTPIngressPath {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_type: Option<String>,

    pub backend: IngressBackend,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressBackend {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_port: Option<IntOrString>,
}

impl k8s_openapi::Resource for Ingress {
    const API_VERSION: &'static str = "networking.k8s.io/v1beta1";
    const GROUP: &'static str = "networking.k8s.io";
    const KIND: &'static str = "Ingress";
    const VERSION: &'static str = "v1beta1";
    const URL_PATH_SEGMENT: &'static str = "ingresses";
    type Scope = k8s_openapi::NamespaceResourceScope;
}

impl k8s_openapi::Metadata for Ingress {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_beta_ingress() {
        let ing: Ingress = serde_json::from_str(
            r#"{
                "apiVersion": "networking.k8s.io/v1beta1",
                "kind": "Ingress",
                "metadata": {"name": "web", "namespace": "default"},
                "spec": {
                    "rules": [{
                        "host": "example.com",
                        "http": {"paths": [{
                            "path": "/api",
                            "backend": {"serviceName": "api", "servicePort": 80}
                        }]}
                    }]
                }
            }"#,
        )
        .unwrap();

        let rules = ing.spec.unwrap().rules.unwrap();
        assert_eq!(rules[0].host.as_deref(), Some("example.com"));
        let path = &rules[0].http.as_ref().unwrap().paths[0];
        assert_eq!(path.backend.service_name.as_deref(), Some("api"));
        assert_eq!(path.backend.service_port, Some(IntOrString::Int(80)));
    }
}
