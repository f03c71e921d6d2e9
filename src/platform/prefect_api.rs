//! Prefect backend using the REST API directly.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{parse_uuid, DeploymentId, DeploymentRef, DeploymentRequest, FlowRunId, OrchestrationPlatform};
use crate::error::PlatformError;

const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

/// Client for a Prefect server or Prefect Cloud workspace API.
pub struct PrefectApi {
    api_url: String,
    api_key: Option<String>,
    http_client: Client,
}

impl std::fmt::Debug for PrefectApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefectApi")
            .field("api_url", &self.api_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl PrefectApi {
    /// Creates a client for `api_url` (e.g. `http://127.0.0.1:4200/api`).
    pub fn new(api_url: impl Into<String>, api_key: Option<String>) -> Result<Self, PlatformError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PlatformError::Unreachable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key,
            http_client,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, PlatformError> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| PlatformError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("detail").map(|d| d.to_string()))
                .unwrap_or(body);
            return Err(PlatformError::Api {
                code: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn post_for_id(&self, path: &str, body: &Value) -> Result<String, PlatformError> {
        debug!(url = %self.url(path), "POST");
        let response = self
            .send(self.http_client.post(self.url(path)).json(body))
            .await?;
        read_id(response).await
    }

    async fn get_for_id(&self, path: &str) -> Result<String, PlatformError> {
        debug!(url = %self.url(path), "GET");
        let response = self.send(self.http_client.get(self.url(path))).await?;
        read_id(response).await
    }
}

async fn read_id(response: Response) -> Result<String, PlatformError> {
    let parsed: IdResponse = response
        .json()
        .await
        .map_err(|e| PlatformError::UnexpectedResponse(e.to_string()))?;
    parse_uuid(&parsed.id)
        .ok_or_else(|| PlatformError::UnexpectedResponse(format!("invalid id '{}'", parsed.id)))
}

/// Body for `POST /deployments/`.
pub fn deployment_body(request: &DeploymentRequest, flow_id: &str) -> Value {
    let schedules: Vec<Value> = request
        .schedule
        .iter()
        .map(|schedule| {
            json!({
                "schedule": {
                    "cron": schedule.cron,
                    "timezone": schedule.timezone,
                },
                "active": true,
            })
        })
        .collect();

    json!({
        "name": request.name,
        "flow_id": flow_id,
        "description": request.description,
        "entrypoint": request.entrypoint.to_string(),
        "path": ".",
        "work_pool_name": request.work_pool,
        "work_queue_name": request.work_queue,
        "parameters": request.parameters,
        "schedules": schedules,
    })
}

#[async_trait]
impl OrchestrationPlatform for PrefectApi {
    fn name(&self) -> &'static str {
        "prefect-api"
    }

    async fn register(&self, request: &DeploymentRequest) -> Result<DeploymentId, PlatformError> {
        let flow_id = self
            .post_for_id("flows/", &json!({ "name": request.flow_name }))
            .await?;
        let id = self
            .post_for_id("deployments/", &deployment_body(request, &flow_id))
            .await?;

        info!(deployment = %request.deployment_ref(), id = %id, "Registered deployment");
        Ok(DeploymentId(id))
    }

    async fn trigger(&self, deployment: &DeploymentRef) -> Result<FlowRunId, PlatformError> {
        let path = format!(
            "deployments/name/{}/{}",
            urlencoding::encode(&deployment.flow_name),
            urlencoding::encode(&deployment.deployment_name)
        );
        let deployment_id = self.get_for_id(&path).await?;

        let run_id = self
            .post_for_id(
                &format!("deployments/{}/create_flow_run", deployment_id),
                &json!({}),
            )
            .await?;

        info!(deployment = %deployment, run_id = %run_id, "Triggered flow run");
        Ok(FlowRunId(run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;
    use crate::schedule::CronSchedule;
    use std::path::Path;

    fn request(schedule: Option<CronSchedule>) -> DeploymentRequest {
        let mut artifact = Artifact::new("eth-price", "Prints the ETH price.", "def eth_price():\n    pass\n");
        artifact.schedule = schedule;
        DeploymentRequest::for_artifact(&artifact, artifact.entrypoint(Path::new("flows")), "pool-a")
    }

    #[test]
    fn test_url_joining() {
        let api = PrefectApi::new("http://127.0.0.1:4200/api/", None).expect("client");
        assert_eq!(api.api_url(), "http://127.0.0.1:4200/api");
        assert_eq!(api.url("/flows/"), "http://127.0.0.1:4200/api/flows/");
    }

    #[test]
    fn test_deployment_body() {
        let schedule = CronSchedule::new("0 * * * *").expect("cron");
        let body = deployment_body(&request(Some(schedule)), "flow-1");
        assert_eq!(body["name"], "eth-price");
        assert_eq!(body["flow_id"], "flow-1");
        assert_eq!(body["entrypoint"], "flows/eth-price.py:eth_price");
        assert_eq!(body["work_pool_name"], "pool-a");
        assert_eq!(body["schedules"][0]["schedule"]["cron"], "0 * * * *");
        assert_eq!(body["schedules"][0]["schedule"]["timezone"], Value::Null);

        let body = deployment_body(&request(None), "flow-1");
        assert_eq!(body["schedules"], json!([]));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let api = PrefectApi::new("http://127.0.0.1:9/api", Some("key".to_string())).expect("client");
        let err = api.register(&request(None)).await.unwrap_err();
        assert!(matches!(err, PlatformError::Unreachable(_)));
    }
}
