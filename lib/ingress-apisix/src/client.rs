use crate::error::AdminError;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Clone, Debug)]
pub struct AdminConfig {
    /// e.g. `http://127.0.0.1:9180/apisix/admin`
    pub base_url: String,
    pub admin_key: Option<String>,
    pub timeout: Duration,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9180/apisix/admin".to_string(),
            admin_key: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Low level JSON transport to the admin API
#[derive(Clone, Debug)]
pub struct AdminClient {
    http: reqwest::Client,
    base_url: String,
}

impl AdminClient {
    pub fn new(config: &AdminConfig) -> Result<Self, AdminError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.admin_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| AdminError::Config("admin key is not a valid header value".to_string()))?;
            headers.insert(API_KEY_HEADER, value);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| AdminError::Config(err.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of a collection, or of one object in it
    pub fn url(&self, collection: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/{}/{}", self.base_url, collection, id),
            None => format!("{}/{}", self.base_url, collection),
        }
    }

    /// `None` when the admin API answers 404
    pub async fn get_json(&self, url: &str) -> Result<Option<Value>, AdminError> {
        let response = self.send(self.http.get(url), url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, url).await?;
        decode(response, url).await.map(Some)
    }

    pub async fn put_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Value, AdminError> {
        let response = self
            .send(self.http.request(Method::PUT, url).json(body), url)
            .await?;
        let response = check_status(response, url).await?;
        decode(response, url).await
    }

    /// Deleting an object that is already gone succeeds
    pub async fn delete(&self, url: &str) -> Result<(), AdminError> {
        let response = self.send(self.http.delete(url), url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(url = %url, "object already absent");
            return Ok(());
        }
        check_status(response, url).await.map(|_| ())
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<reqwest::Response, AdminError> {
        let response = request.send().await.map_err(|source| AdminError::Request {
            url: url.to_string(),
            source,
        })?;
        debug!(url = %url, status = %response.status(), "admin api response");
        Ok(response)
    }
}

async fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response, AdminError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AdminError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

async fn decode(response: reqwest::Response, url: &str) -> Result<Value, AdminError> {
    let bytes = response.bytes().await.map_err(|source| AdminError::Request {
        url: url.to_string(),
        source,
    })?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|err| AdminError::Decode {
        url: url.to_string(),
        reason: err.to_string(),
    })
}
