//! GitHub Actions REST client
//!
//! Used for deregistering self-hosted runners before their instances go away
//! and for polling the state of a workflow run.

use async_trait::async_trait;
use ciflow_cloud::{CloudError, RunnerDeregistration};
use serde::Deserialize;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const RUNNERS_PER_PAGE: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct Runner {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct RunnerPage {
    #[serde(default)]
    runners: Vec<Runner>,
}

/// State of a workflow run
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkflowRun {
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
}

/// Thin client over the repository endpoints of the Actions API
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    repo: Option<String>,
}

impl GitHubClient {
    pub fn new(api_url: &str, repo: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ciflow/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            repo: repo.filter(|r| !r.trim().is_empty()),
        })
    }

    pub fn repo(&self) -> Option<&str> {
        self.repo.as_deref()
    }

    fn repo_url(&self, repo: &str, path: &str) -> String {
        format!("{}/repos/{}/{}", self.api_url, repo, path)
    }

    fn repo_or_err(&self) -> anyhow::Result<&str> {
        self.repo()
            .ok_or_else(|| anyhow::anyhow!("GITHUB_REPOSITORY is not set"))
    }

    fn request(&self, method: reqwest::Method, url: &str, token: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .bearer_auth(token.trim())
    }

    /// Fetch a workflow run; any non-2xx response is an error
    pub async fn workflow_run(&self, token: &str, run_id: &str) -> anyhow::Result<WorkflowRun> {
        let url = self.repo_url(self.repo_or_err()?, &format!("actions/runs/{}", run_id));

        let response = self.request(reqwest::Method::GET, &url, token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("HTTP GET error {}: {}", status, body.trim());
        }
        Ok(response.json().await?)
    }
}

/// Self-hosted runner endpoints of a repository
#[async_trait]
pub trait RunnersApi: Send + Sync {
    /// One page (1-based) of at most `RUNNERS_PER_PAGE` runners
    async fn runner_page(&self, token: &str, page: usize) -> anyhow::Result<Vec<Runner>>;

    async fn delete_runner(&self, token: &str, runner: &Runner) -> anyhow::Result<()>;
}

#[async_trait]
impl RunnersApi for GitHubClient {
    async fn runner_page(&self, token: &str, page: usize) -> anyhow::Result<Vec<Runner>> {
        let url = self.repo_url(self.repo_or_err()?, "actions/runners");
        let response = self
            .request(reqwest::Method::GET, &url, token)
            .query(&[("per_page", RUNNERS_PER_PAGE), ("page", page)])
            .send()
            .await?
            .error_for_status()?;
        let batch: RunnerPage = response.json().await?;
        Ok(batch.runners)
    }

    async fn delete_runner(&self, token: &str, runner: &Runner) -> anyhow::Result<()> {
        let url = self.repo_url(
            self.repo_or_err()?,
            &format!("actions/runners/{}", runner.id),
        );
        self.request(reqwest::Method::DELETE, &url, token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Every runner registered to the repository, across all pages
///
/// A short page is the last one.
pub async fn list_runners(api: &dyn RunnersApi, token: &str) -> anyhow::Result<Vec<Runner>> {
    let mut runners = Vec::new();
    for page in 1.. {
        let batch = api.runner_page(token, page).await?;
        let last = batch.len() < RUNNERS_PER_PAGE;
        runners.extend(batch);
        if last {
            break;
        }
    }
    Ok(runners)
}

/// Delete every runner registered under `workflow_id`, returning how many
pub async fn delete_workflow_runners(
    api: &dyn RunnersApi,
    token: &str,
    workflow_id: &str,
) -> anyhow::Result<usize> {
    let runners = list_runners(api, token).await?;
    let matching = runners_for(&runners, workflow_id);

    for runner in &matching {
        tracing::info!("Deregistering runner {} ({})", runner.name, runner.id);
        api.delete_runner(token, runner).await?;
    }
    Ok(matching.len())
}

/// Runners registered under `workflow_id`
pub fn runners_for<'a>(runners: &'a [Runner], workflow_id: &str) -> Vec<&'a Runner> {
    runners
        .iter()
        .filter(|r| r.name.contains(workflow_id))
        .collect()
}

#[async_trait]
impl RunnerDeregistration for GitHubClient {
    async fn deregister_runners(&self, token: &str, workflow_id: &str) -> ciflow_cloud::Result<()> {
        if token.trim().is_empty() {
            tracing::warn!(
                "No GitHub token, not deregistering runners for {}",
                workflow_id
            );
            return Ok(());
        }
        if self.repo.is_none() {
            tracing::warn!(
                "GITHUB_REPOSITORY is not set, not deregistering runners for {}",
                workflow_id
            );
            return Ok(());
        }

        delete_workflow_runners(self, token, workflow_id)
            .await
            .map_err(|e| CloudError::ApiError(format!("{:#}", e)))?;
        Ok(())
    }
}
