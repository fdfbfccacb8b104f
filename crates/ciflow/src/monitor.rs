//! Workflow monitor
//!
//! Runs in the background on a manager and tears the workflow's instances
//! down once the GitHub Actions run that launched them has finished.

use crate::github::{GitHubClient, WorkflowRun};
use crate::platforms::Platforms;
use async_trait::async_trait;
use ciflow_cloud::StateTransition;
use std::time::Duration;

pub const POLLING_INTERVAL_SECS: u64 = 60;

/// Consecutive failed queries before giving up and stopping the instances
pub const QUERY_FAILURE_THRESHOLD: u32 = 10;

const TERMINATE_CONCLUSIONS: [&str; 6] = [
    "cancelled",
    "success",
    "skipped",
    "stale",
    "failure",
    "timed_out",
];
const WAIT_CONCLUSIONS: [&str; 1] = ["action_required"];
const PENDING_STATUSES: [&str; 4] = ["in_progress", "queued", "waiting", "requested"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    KeepPolling,
    Terminate,
}

/// How the monitor ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The run finished and the instances were terminated
    Terminated,
    /// GitHub could not be queried; the instances were stopped
    Stopped,
}

/// Decide what to do with a run in its current state
pub fn classify(run: &WorkflowRun) -> anyhow::Result<Decision> {
    if run.status == "completed" {
        let conclusion = run.conclusion.as_deref().unwrap_or_default();
        if TERMINATE_CONCLUSIONS.contains(&conclusion) {
            return Ok(Decision::Terminate);
        }
        if WAIT_CONCLUSIONS.contains(&conclusion) {
            return Ok(Decision::KeepPolling);
        }
        anyhow::bail!("Unexpected workflow state on completed: {}", conclusion);
    }

    if PENDING_STATUSES.contains(&run.status.as_str()) {
        return Ok(Decision::KeepPolling);
    }
    anyhow::bail!("Unexpected workflow state: {}", run.status)
}

/// Where workflow run states come from
#[async_trait]
pub trait RunSource: Send + Sync {
    async fn workflow_run(&self, token: &str, run_id: &str) -> anyhow::Result<WorkflowRun>;
}

#[async_trait]
impl RunSource for GitHubClient {
    async fn workflow_run(&self, token: &str, run_id: &str) -> anyhow::Result<WorkflowRun> {
        GitHubClient::workflow_run(self, token, run_id).await
    }
}

/// Poll `run_id` until it finishes, then act on the workflow's instances
pub async fn watch(
    platforms: &Platforms,
    runs: &dyn RunSource,
    token: &str,
    workflow_tag: &str,
    run_id: &str,
    interval: Duration,
) -> anyhow::Result<Outcome> {
    let mut consecutive_failures = 0;

    loop {
        tokio::time::sleep(interval).await;

        match runs.workflow_run(token, run_id).await {
            Ok(run) => {
                consecutive_failures = 0;
                tracing::info!(
                    "Workflow {} status: {} {}",
                    run_id,
                    run.status,
                    run.conclusion.as_deref().unwrap_or("-")
                );

                if classify(&run)? == Decision::Terminate {
                    platforms
                        .apply_transition(token, workflow_tag, StateTransition::Terminate, false)
                        .await?;
                    return Ok(Outcome::Terminated);
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!("{:#}. Retrying.", e);

                if consecutive_failures >= QUERY_FAILURE_THRESHOLD {
                    platforms
                        .apply_transition(token, workflow_tag, StateTransition::Stop, false)
                        .await?;
                    return Ok(Outcome::Stopped);
                }
            }
        }
    }
}
