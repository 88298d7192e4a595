use super::Translator;
use crate::apisix::{compose_upstream_name, stable_id, Route, Upstream};
use crate::error::{CoreError, TranslateError};
use ingress_api::networking_v1beta1 as v1beta1;
use k8s_openapi::api::networking::v1 as networking;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Annotation selecting the controller responsible for an Ingress
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// Ingress class value accepting every Ingress
pub const ANY_INGRESS_CLASS: &str = "*";

/// Ingress API version watched by the controller
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IngressVersion {
    #[default]
    V1,
    V1beta1,
}

impl FromStr for IngressVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "networking/v1" => Ok(IngressVersion::V1),
            "networking/v1beta1" => Ok(IngressVersion::V1beta1),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown ingress version {:?}, expected \"networking/v1\" or \"networking/v1beta1\"",
                other
            ))),
        }
    }
}

impl fmt::Display for IngressVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngressVersion::V1 => write!(f, "networking/v1"),
            IngressVersion::V1beta1 => write!(f, "networking/v1beta1"),
        }
    }
}

/// An Ingress of either served version
#[derive(Clone, Debug)]
pub enum KubeIngress {
    V1(Arc<networking::Ingress>),
    V1beta1(Arc<v1beta1::Ingress>),
}

impl KubeIngress {
    pub fn version(&self) -> IngressVersion {
        match self {
            KubeIngress::V1(_) => IngressVersion::V1,
            KubeIngress::V1beta1(_) => IngressVersion::V1beta1,
        }
    }

    pub fn namespace(&self) -> String {
        match self {
            KubeIngress::V1(ing) => ing.namespace(),
            KubeIngress::V1beta1(ing) => ing.namespace(),
        }
        .unwrap_or_default()
    }

    pub fn name(&self) -> String {
        match self {
            KubeIngress::V1(ing) => ing.name_any(),
            KubeIngress::V1beta1(ing) => ing.name_any(),
        }
    }

    fn class_annotation(&self) -> Option<&str> {
        let annotations = match self {
            KubeIngress::V1(ing) => ing.annotations(),
            KubeIngress::V1beta1(ing) => ing.annotations(),
        };
        annotations
            .get(INGRESS_CLASS_ANNOTATION)
            .map(String::as_str)
            .filter(|class| !class.is_empty())
    }

    fn class_name(&self) -> Option<&str> {
        match self {
            KubeIngress::V1(ing) => ing.spec.as_ref()?.ingress_class_name.as_deref(),
            KubeIngress::V1beta1(ing) => ing.spec.as_ref()?.ingress_class_name.as_deref(),
        }
    }

    /// Whether the Ingress is meant for a controller of class `wanted`.
    /// The annotation takes precedence over `spec.ingressClassName`; an
    /// Ingress naming no class is only accepted by the `*` class.
    pub fn is_effective(&self, wanted: &str) -> bool {
        if wanted == ANY_INGRESS_CLASS {
            return true;
        }
        match self.class_annotation().or_else(|| self.class_name()) {
            Some(class) => class == wanted,
            None => false,
        }
    }
}

/// Routes and the upstreams they point at; upstreams are deduplicated
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TranslatedIngress {
    pub routes: Vec<Route>,
    pub upstreams: Vec<Upstream>,
}

impl TranslatedIngress {
    fn push(&mut self, route: Route, upstream: Option<Upstream>) {
        if let Some(upstream) = upstream {
            if !self.upstreams.iter().any(|u| u.id == upstream.id) {
                self.upstreams.push(upstream);
            }
        }
        self.routes.push(route);
    }
}

/// One backend reference as declared by either Ingress version
enum BackendPort<'a> {
    Number(i32),
    Name(&'a str),
}

impl Translator {
    pub fn translate_ingress(&self, ing: &KubeIngress) -> Result<TranslatedIngress, TranslateError> {
        match ing {
            KubeIngress::V1(ing) => self.translate_ingress_v1(ing),
            KubeIngress::V1beta1(ing) => self.translate_ingress_v1beta1(ing),
        }
    }

    fn translate_ingress_v1(
        &self,
        ing: &networking::Ingress,
    ) -> Result<TranslatedIngress, TranslateError> {
        let namespace = ing.namespace().unwrap_or_default();
        let name = ing.name_any();
        let mut out = TranslatedIngress::default();

        let rules = ing.spec.iter().flat_map(|spec| spec.rules.iter().flatten());
        for rule in rules {
            let host = rule.host.as_deref().unwrap_or_default();
            for path in rule.http.iter().flat_map(|http| http.paths.iter()) {
                let upstream = match path.backend.service.as_ref() {
                    Some(service) => {
                        let port = match service.port.as_ref() {
                            Some(port) => match (port.name.as_deref(), port.number) {
                                (Some(name), _) if !name.is_empty() => BackendPort::Name(name),
                                (_, Some(number)) => BackendPort::Number(number),
                                _ => return Err(TranslateError::new("backend.service.port", "not defined")),
                            },
                            None => return Err(TranslateError::new("backend.service.port", "not defined")),
                        };
                        Some(self.translate_ingress_upstream(&namespace, &service.name, port)?)
                    }
                    None => None,
                };

                let uri = path.path.as_deref().unwrap_or("/");
                let prefix = path.path_type == "Prefix";
                out.push(ingress_route(&namespace, &name, host, uri, prefix, upstream.as_ref()), upstream);
            }
        }
        Ok(out)
    }

    fn translate_ingress_v1beta1(
        &self,
        ing: &v1beta1::Ingress,
    ) -> Result<TranslatedIngress, TranslateError> {
        let namespace = ing.namespace().unwrap_or_default();
        let name = ing.name_any();
        let mut out = TranslatedIngress::default();

        let rules = ing.spec.iter().flat_map(|spec| spec.rules.iter().flatten());
        for rule in rules {
            let host = rule.host.as_deref().unwrap_or_default();
            for path in rule.http.iter().flat_map(|http| http.paths.iter()) {
                let upstream = match path.backend.service_name.as_deref() {
                    Some(service) if !service.is_empty() => {
                        let port = match path.backend.service_port.as_ref() {
                            Some(IntOrString::Int(number)) => BackendPort::Number(*number),
                            Some(IntOrString::String(name)) => BackendPort::Name(name.as_str()),
                            None => {
                                return Err(TranslateError::new("backend.servicePort", "not defined"))
                            }
                        };
                        Some(self.translate_ingress_upstream(&namespace, service, port)?)
                    }
                    _ => None,
                };

                let uri = path.path.as_deref().unwrap_or("/");
                // Paths without a type keep the legacy prefix semantics
                let prefix = path.path_type.as_deref() != Some("Exact");
                out.push(ingress_route(&namespace, &name, host, uri, prefix, upstream.as_ref()), upstream);
            }
        }
        Ok(out)
    }

    fn translate_ingress_upstream(
        &self,
        namespace: &str,
        service: &str,
        port: BackendPort<'_>,
    ) -> Result<Upstream, TranslateError> {
        let port = match port {
            BackendPort::Number(number) => number,
            BackendPort::Name(port_name) => {
                let svc = self
                    .services
                    .get(namespace, service)
                    .map_err(|err| TranslateError::new("service", err.to_string()))?;
                svc.spec
                    .as_ref()
                    .and_then(|spec| spec.ports.as_ref())
                    .and_then(|ports| {
                        ports
                            .iter()
                            .find(|p| p.name.as_deref() == Some(port_name))
                    })
                    .map(|p| p.port)
                    .ok_or_else(|| TranslateError::new("service", "port not found"))?
            }
        };

        let mut ups = self.translate_upstream(namespace, service, port)?;
        ups.name = compose_upstream_name(namespace, service, port);
        ups.id = ups.name.clone();
        Ok(ups)
    }
}

/// Exact match on the path, plus `path/*` when matching by prefix so that
/// `/foo` matches `/foo/bar` but not `/foobar`
fn ingress_route(
    namespace: &str,
    ingress: &str,
    host: &str,
    path: &str,
    prefix: bool,
    upstream: Option<&Upstream>,
) -> Route {
    let mut uris = vec![path.to_string()];
    if prefix {
        let wildcard = format!("{}/*", path.trim_end_matches('/'));
        if wildcard != path {
            uris.push(wildcard);
        }
    }
    let name = format!("{}_{}_{}_{}", namespace, ingress, host, path);
    Route {
        id: stable_id(&name),
        name,
        host: host.to_string(),
        uris,
        upstream_id: upstream.map(|u| u.id.clone()).unwrap_or_default(),
    }
}
