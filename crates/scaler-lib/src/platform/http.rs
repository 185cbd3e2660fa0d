//! Easypanel tRPC client

use super::PlatformApi;
use crate::catalog::fields;
use crate::error::PlatformError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

const LIST_PROJECTS: &str = "projects.listProjectsAndServices";
const SERVICE_STATS: &str = "monitor.getServiceStats";
const INSPECT_SERVICE: &str = "services.app.inspectService";
const EXPOSED_PORTS: &str = "services.app.getExposedPorts";
const UPDATE_DEPLOY: &str = "services.app.updateDeploy";

/// Client for the Easypanel tRPC API
pub struct EasypanelClient {
    client: Client,
    base_url: Url,
    token: String,
}

impl EasypanelClient {
    /// Create a new client. Every request carries the token as a bearer
    /// credential and is bounded by `timeout`.
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let mut base_url = Url::parse(base_url).context("Invalid API URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn procedure_url(&self, procedure: &str) -> Result<Url, PlatformError> {
        self.base_url
            .join(&format!("api/trpc/{}", procedure))
            .map_err(|e| PlatformError::InvalidRequest(e.to_string()))
    }

    /// tRPC query (GET with a JSON `input` parameter)
    async fn query(&self, procedure: &str, input: Option<Value>) -> Result<Value, PlatformError> {
        let mut url = self.procedure_url(procedure)?;
        if let Some(input) = input {
            url.query_pairs_mut()
                .append_pair("input", &input.to_string());
        }
        debug!(procedure = procedure, "tRPC query");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_error)?;

        let body = checked_body(response).await?;
        serde_json::from_str(&body).map_err(|e| PlatformError::Decode(e.to_string()))
    }

    /// tRPC mutation (POST with a JSON body). The response body is not
    /// interpreted beyond its status.
    async fn mutate(&self, procedure: &str, body: Value) -> Result<(), PlatformError> {
        let url = self.procedure_url(procedure)?;
        debug!(procedure = procedure, "tRPC mutation");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        checked_body(response).await.map(|_| ())
    }
}

fn service_input(project: &str, service: &str) -> Value {
    json!({"json": {"projectName": project, "serviceName": service}})
}

async fn checked_body(response: Response) -> Result<String, PlatformError> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        return Err(PlatformError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

fn transport_error(e: reqwest::Error) -> PlatformError {
    if e.is_timeout() {
        PlatformError::Timeout
    } else if e.is_decode() {
        PlatformError::Decode(e.to_string())
    } else if e.is_builder() {
        PlatformError::InvalidRequest(e.to_string())
    } else {
        PlatformError::Connect(e.to_string())
    }
}

#[async_trait]
impl PlatformApi for EasypanelClient {
    async fn fetch_catalog(&self) -> Result<Value, PlatformError> {
        self.query(LIST_PROJECTS, None).await
    }

    async fn cpu_percent(&self, project: &str, service: &str) -> Result<Option<f64>, PlatformError> {
        let response = self
            .query(SERVICE_STATS, Some(service_input(project, service)))
            .await?;
        Ok(fields::cpu_percent(fields::unwrap_envelope(&response)))
    }

    async fn current_replicas(
        &self,
        project: &str,
        service: &str,
    ) -> Result<Option<u32>, PlatformError> {
        let response = self
            .query(INSPECT_SERVICE, Some(service_input(project, service)))
            .await?;
        Ok(fields::replica_count(fields::unwrap_envelope(&response)))
    }

    async fn exposed_ports(&self, project: &str, service: &str) -> Result<bool, PlatformError> {
        let response = self
            .query(EXPOSED_PORTS, Some(service_input(project, service)))
            .await?;

        match fields::unwrap_envelope(&response) {
            Value::Array(ports) => Ok(!ports.is_empty()),
            Value::Null => Ok(false),
            other @ Value::Object(_) => Ok(fields::exposed_ports(other).unwrap_or(false)),
            other => Err(PlatformError::Decode(format!(
                "expected port list, got {}",
                fields::json_type(other)
            ))),
        }
    }

    async fn scale(&self, project: &str, service: &str, replicas: u32) -> Result<(), PlatformError> {
        let body = json!({
            "json": {
                "projectName": project,
                "serviceName": service,
                "deploy": {"replicas": replicas}
            }
        });
        self.mutate(UPDATE_DEPLOY, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    const INPUT: &str = r#"{"json":{"projectName":"shop","serviceName":"web"}}"#;

    fn client(url: &str) -> EasypanelClient {
        EasypanelClient::new(url, "secret-token", Duration::from_secs(5)).unwrap()
    }

    fn envelope(json: Value) -> String {
        json!({"result": {"data": {"json": json}}}).to_string()
    }

    #[tokio::test]
    async fn test_fetch_catalog_sends_bearer_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/trpc/projects.listProjectsAndServices")
            .match_header("authorization", "Bearer secret-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(envelope(json!([{"name": "shop", "services": []}])))
            .create_async()
            .await;

        let payload = client(&server.url()).fetch_catalog().await.unwrap();
        assert_eq!(payload["result"]["data"]["json"][0]["name"], "shop");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_base_url_path_prefix_is_kept() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/panel/api/trpc/projects.listProjectsAndServices")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let url = format!("{}/panel", server.url());
        client(&url).fetch_catalog().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cpu_percent_from_stats() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/trpc/monitor.getServiceStats")
            .match_query(Matcher::UrlEncoded("input".into(), INPUT.into()))
            .with_status(200)
            .with_body(envelope(json!({"cpu": {"percent": 42.5}, "memory": {"usage": 100}})))
            .create_async()
            .await;

        let cpu = client(&server.url()).cpu_percent("shop", "web").await.unwrap();
        assert_eq!(cpu, Some(42.5));
    }

    #[tokio::test]
    async fn test_current_replicas_from_inspect() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/trpc/services.app.inspectService")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(envelope(json!({"name": "web", "deploy": {"replicas": 3}})))
            .create_async()
            .await;

        let replicas = client(&server.url())
            .current_replicas("shop", "web")
            .await
            .unwrap();
        assert_eq!(replicas, Some(3));
    }

    #[tokio::test]
    async fn test_exposed_ports_list() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/trpc/services.app.getExposedPorts")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(envelope(json!([{"published": 80, "target": 8080}])))
            .create_async()
            .await;

        assert!(client(&server.url()).exposed_ports("shop", "web").await.unwrap());
    }

    #[tokio::test]
    async fn test_exposed_ports_empty_list() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/trpc/services.app.getExposedPorts")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(envelope(json!([])))
            .create_async()
            .await;

        assert!(!client(&server.url()).exposed_ports("shop", "web").await.unwrap());
    }

    #[tokio::test]
    async fn test_scale_posts_update_deploy() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/trpc/services.app.updateDeploy")
            .match_header("authorization", "Bearer secret-token")
            .match_body(Matcher::Json(json!({
                "json": {
                    "projectName": "shop",
                    "serviceName": "web",
                    "deploy": {"replicas": 4}
                }
            })))
            .with_status(200)
            .with_body(envelope(Value::Null))
            .create_async()
            .await;

        client(&server.url()).scale("shop", "web", 4).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/trpc/services.app.updateDeploy")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let err = client(&server.url()).scale("shop", "web", 2).await.unwrap_err();
        assert!(matches!(err, PlatformError::Status { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unauthorized_is_permanent() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/trpc/projects.listProjectsAndServices")
            .with_status(401)
            .with_body("{\"error\":\"UNAUTHORIZED\"}")
            .create_async()
            .await;

        let err = client(&server.url()).fetch_catalog().await.unwrap_err();
        assert!(matches!(err, PlatformError::Status { status: 401, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_invalid_json_is_decode_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/trpc/projects.listProjectsAndServices")
            .with_status(200)
            .with_body("<html>login</html>")
            .create_async()
            .await;

        let err = client(&server.url()).fetch_catalog().await.unwrap_err();
        assert!(matches!(err, PlatformError::Decode(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connect_error() {
        let err = client("http://127.0.0.1:1").fetch_catalog().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(EasypanelClient::new("not a url", "t", Duration::from_secs(1)).is_err());
    }
}
