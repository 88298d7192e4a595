use crate::client::{AdminClient, AdminConfig};
use crate::error::AdminError;
use crate::resource::ResourceApi;
use ingress_core::apisix::{Route, Ssl, Upstream};
use ingress_core::{Gateway, ResourceClient};
use std::sync::Arc;
use tracing::info;

/// One APISIX cluster reached through its admin API
pub struct Apisix {
    client: Arc<AdminClient>,
    ssl: ResourceApi<Ssl>,
    upstream: ResourceApi<Upstream>,
    route: ResourceApi<Route>,
}

impl Apisix {
    pub fn new(config: &AdminConfig) -> Result<Self, AdminError> {
        let client = Arc::new(AdminClient::new(config)?);
        Ok(Self {
            ssl: ResourceApi::new(Arc::clone(&client)),
            upstream: ResourceApi::new(Arc::clone(&client)),
            route: ResourceApi::new(Arc::clone(&client)),
            client,
        })
    }

    /// Probe the admin API by listing a collection
    pub async fn ping(&self) -> Result<(), AdminError> {
        let routes = self.route.list_objects().await?;
        info!(base_url = %self.client.base_url(), routes = routes.len(), "admin api reachable");
        Ok(())
    }
}

impl Gateway for Apisix {
    fn ssl(&self) -> &dyn ResourceClient<Ssl> {
        &self.ssl
    }

    fn upstream(&self) -> &dyn ResourceClient<Upstream> {
        &self.upstream
    }

    fn route(&self) -> &dyn ResourceClient<Route> {
        &self.route
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingress_core::gateway::sync_object;
    use ingress_core::EventKind;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn apisix(server: &MockServer) -> Apisix {
        Apisix::new(&AdminConfig {
            base_url: format!("{}/apisix/admin", server.uri()),
            admin_key: Some("secret".to_string()),
            timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_collections_are_routed_by_kind() {
        let server = MockServer::start().await;
        for collection in ["ssl", "upstreams", "routes"] {
            Mock::given(method("DELETE"))
                .and(path(format!("/apisix/admin/{}/x", collection)))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;
        }

        let gateway = apisix(&server);
        gateway.ssl().delete("x").await.unwrap();
        gateway.upstream().delete("x").await.unwrap();
        gateway.route().delete("x").await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_upstream_update() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/apisix/admin/upstreams/default_httpbin_80"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "node": {"value": {"id": "default_httpbin_80", "type": "roundrobin", "nodes": []}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let upstream = Upstream {
            id: "default_httpbin_80".to_string(),
            name: "default_httpbin_80".to_string(),
            ..Default::default()
        };
        let gateway = apisix(&server);
        sync_object(gateway.upstream(), EventKind::Update, &upstream)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apisix/admin/routes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total": 0, "list": []})))
            .expect(1)
            .mount(&server)
            .await;

        apisix(&server).ping().await.unwrap();
    }
}
