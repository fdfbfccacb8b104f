//! Azure Resource Manager and Resource Graph client
//!
//! Direct REST implementation with bearer-token authentication.

use crate::config::AzureConfig;
use crate::credential::{AccessToken, AzureCredential};
use crate::error::{AzureError, Result};
use crate::resource::{AzureResource, AzureResourceKind, resource_graph_query};
use async_trait::async_trait;
use ciflow_cloud::{TagFilter, wait_until};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const RESOURCE_GRAPH_API_VERSION: &str = "2021-03-01";

/// Azure operations used by the platform
#[async_trait]
pub trait AzureApi: Send + Sync {
    /// Resources in the subscription carrying every tag in `filters`
    async fn query_resources(&self, filters: &[TagFilter]) -> Result<Vec<AzureResource>>;

    /// Request a VM power-off without waiting for it to finish
    async fn power_off(&self, vm_id: &str) -> Result<()>;

    /// Start deleting a resource
    ///
    /// Returns the URL to poll when ARM accepted the request asynchronously.
    async fn begin_delete(&self, id: &str, kind: AzureResourceKind) -> Result<Option<String>>;

    /// Block until a long-running operation completes
    async fn wait_for_operation(&self, operation_url: &str) -> Result<()>;
}

/// REST client for ARM and Resource Graph
pub struct ArmClient {
    http: reqwest::Client,
    config: AzureConfig,
    credential: AzureCredential,
    token: Mutex<Option<AccessToken>>,
}

impl ArmClient {
    pub fn new(config: AzureConfig, credential: AzureCredential) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            credential,
            token: Mutex::new(None),
        }
    }

    /// Current bearer token, acquiring or refreshing it when needed
    async fn bearer(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.token.clone());
        }

        let token = self.credential.get_token(&self.http).await?;
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        format!(
            "{}{}?api-version={}",
            self.config.arm_endpoint, path, api_version
        )
    }
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    subscriptions: Vec<&'a str>,
    query: &'a str,
    options: QueryOptions,
}

#[derive(Debug, Serialize)]
struct QueryOptions {
    #[serde(rename = "resultFormat")]
    result_format: &'static str,
    #[serde(rename = "$skipToken", skip_serializing_if = "Option::is_none")]
    skip_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    data: Vec<AzureResource>,
    #[serde(rename = "$skipToken", default)]
    skip_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct OperationStatus {
    status: String,
    #[serde(default)]
    error: Option<ApiErrorDetail>,
}

/// Turn a non-success response into an error carrying ARM's message
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| format!("{}: {}", b.error.code, b.error.message))
        .unwrap_or(body);
    Err(AzureError::ApiError {
        status: status.as_u16(),
        message,
    })
}

/// Where ARM says to poll an accepted operation
fn operation_url(response: &reqwest::Response) -> Option<String> {
    ["Azure-AsyncOperation", "Location"]
        .iter()
        .find_map(|h| response.headers().get(*h))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Interpret one poll of a long-running operation
///
/// `Ok(true)` means finished, `Ok(false)` still running.
fn operation_finished(status: StatusCode, body: &str) -> Result<bool> {
    if status == StatusCode::ACCEPTED {
        return Ok(false);
    }
    if body.trim().is_empty() {
        return Ok(true);
    }

    match serde_json::from_str::<OperationStatus>(body) {
        Ok(op) => match op.status.as_str() {
            "Succeeded" => Ok(true),
            "Failed" | "Canceled" => Err(AzureError::OperationFailed(
                op.error
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .unwrap_or(op.status),
            )),
            _ => Ok(false),
        },
        // Location polling returns the final resource body, not a status document
        Err(_) => Ok(true),
    }
}

#[async_trait]
impl AzureApi for ArmClient {
    async fn query_resources(&self, filters: &[TagFilter]) -> Result<Vec<AzureResource>> {
        let query = resource_graph_query(filters);
        let url = self.url(
            "/providers/Microsoft.ResourceGraph/resources",
            RESOURCE_GRAPH_API_VERSION,
        );
        tracing::debug!("Resource Graph query: {}", query);

        let mut resources = Vec::new();
        let mut skip_token = None;
        loop {
            let request = QueryRequest {
                subscriptions: vec![self.config.subscription_id.as_str()],
                query: &query,
                options: QueryOptions {
                    result_format: "objectArray",
                    skip_token: skip_token.take(),
                },
            };

            let response = self
                .http
                .post(&url)
                .bearer_auth(self.bearer().await?)
                .json(&request)
                .send()
                .await?;
            let page: QueryResponse = check_status(response).await?.json().await?;

            resources.extend(page.data);
            match page.skip_token {
                Some(token) if !token.is_empty() => skip_token = Some(token),
                _ => break,
            }
        }

        Ok(resources)
    }

    async fn power_off(&self, vm_id: &str) -> Result<()> {
        let url = self.url(
            &format!("{}/powerOff", vm_id),
            AzureResourceKind::VirtualMachine.api_version(),
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.bearer().await?)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn begin_delete(&self, id: &str, kind: AzureResourceKind) -> Result<Option<String>> {
        let url = self.url(id, kind.api_version());
        let response = self
            .http
            .delete(&url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        let response = check_status(response).await?;

        if response.status() == StatusCode::ACCEPTED {
            return Ok(operation_url(&response));
        }
        Ok(None)
    }

    async fn wait_for_operation(&self, operation_url: &str) -> Result<()> {
        wait_until(&self.config.wait, operation_url, || async move {
            let response = self
                .http
                .get(operation_url)
                .bearer_auth(self.bearer().await?)
                .send()
                .await
                .map_err(AzureError::from)?;
            let response = check_status(response).await?;
            let status = response.status();
            let body = response.text().await.map_err(AzureError::from)?;
            Ok(operation_finished(status, &body)?.then_some(()))
        })
        .await?;
        Ok(())
    }
}
