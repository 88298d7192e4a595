use super::Translator;
use crate::apisix::{compose_id, Ssl};
use crate::error::TranslateError;
use ingress_api::ApisixTls;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

/// Secret data keys holding the certificate, most specific first
const CERT_KEYS: [&str; 2] = ["cert", "tls.crt"];
const KEY_KEYS: [&str; 2] = ["key", "tls.key"];

impl Translator {
    /// Ssl for a TLS binding, with material read from the referenced secret.
    /// No partial object is returned when the secret is missing or malformed.
    pub fn translate_ssl(&self, tls: &ApisixTls) -> Result<Ssl, TranslateError> {
        let secret_ref = &tls.spec.secret;
        let secret = self
            .secrets
            .get(&secret_ref.namespace, &secret_ref.name)
            .map_err(|err| TranslateError::new("secret", err.to_string()))?;
        let (certificate, private_key) = ssl_material(&secret)?;

        Ok(Ssl {
            id: compose_id(&tls.namespace().unwrap_or_default(), &tls.name_any()),
            server_names: tls.spec.hosts.clone(),
            certificate,
            private_key,
            status: 1,
        })
    }
}

/// Certificate and private key stored in a secret
pub fn ssl_material(secret: &Secret) -> Result<(String, String), TranslateError> {
    let certificate = secret_value(secret, &CERT_KEYS)?;
    let private_key = secret_value(secret, &KEY_KEYS)?;
    Ok((certificate, private_key))
}

fn secret_value(secret: &Secret, keys: &[&str]) -> Result<String, TranslateError> {
    let data = secret.data.as_ref();
    let value = keys
        .iter()
        .find_map(|key| data.and_then(|data| data.get(*key)))
        .ok_or_else(|| TranslateError::new("secret", format!("missing data key {:?}", keys[0])))?;
    String::from_utf8(value.0.clone())
        .map_err(|_| TranslateError::new("secret", format!("data key {:?} is not UTF-8", keys[0])))
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{object, secret, Cluster};
    use super::super::EndpointMode;
    use super::*;
    use serde_json::json;

    fn tls(ns: &str, name: &str, secret_ns: &str, secret_name: &str) -> ApisixTls {
        object(json!({
            "apiVersion": "apisix.apache.org/v1",
            "kind": "ApisixTls",
            "metadata": {"namespace": ns, "name": name},
            "spec": {
                "hosts": ["api6.com"],
                "secret": {"namespace": secret_ns, "name": secret_name}
            }
        }))
    }

    #[test]
    fn test_translate_ssl() {
        let mut cluster = Cluster::default();
        Cluster::apply(
            &mut cluster.secrets.1,
            secret("helm", "test-atls", json!({"cert": "cm9vdA==", "key": "MTIzNDU2"})),
        );
        let t = cluster.translator(EndpointMode::Endpoints);

        let ssl = t.translate_ssl(&tls("helm", "foo", "helm", "test-atls")).unwrap();
        assert_eq!(
            ssl,
            Ssl {
                id: "helm_foo".to_string(),
                server_names: vec!["api6.com".to_string()],
                certificate: "root".to_string(),
                private_key: "123456".to_string(),
                status: 1,
            }
        );
    }

    #[test]
    fn test_missing_secret() {
        let cluster = Cluster::default();
        let t = cluster.translator(EndpointMode::Endpoints);

        let err = t.translate_ssl(&tls("helm", "foo", "helm", "test-atls")).unwrap_err();
        assert_eq!(err.field, "secret");
    }

    #[test]
    fn test_kubernetes_tls_secret_keys() {
        let mut cluster = Cluster::default();
        Cluster::apply(
            &mut cluster.secrets.1,
            secret("ns", "kube-tls", json!({"tls.crt": "cm9vdA==", "tls.key": "MTIzNDU2"})),
        );
        let t = cluster.translator(EndpointMode::Endpoints);

        let ssl = t.translate_ssl(&tls("ns", "foo", "ns", "kube-tls")).unwrap();
        assert_eq!(ssl.certificate, "root");
        assert_eq!(ssl.private_key, "123456");
    }

    #[test]
    fn test_secret_without_key_material() {
        let mut cluster = Cluster::default();
        Cluster::apply(
            &mut cluster.secrets.1,
            secret("ns", "half", json!({"cert": "cm9vdA=="})),
        );
        let t = cluster.translator(EndpointMode::Endpoints);

        let err = t.translate_ssl(&tls("ns", "foo", "ns", "half")).unwrap_err();
        assert_eq!(err.field, "secret");
        assert!(err.reason.contains("key"));
    }
}
