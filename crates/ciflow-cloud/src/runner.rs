//! Runner deregistration hook

use crate::error::Result;
use async_trait::async_trait;

/// Removes CI runner registrations belonging to a workflow
///
/// Platforms call this before stopping or terminating instances so the CI
/// service does not keep scheduling jobs onto runners that are going away.
/// Failures are reported but never abort the transition.
#[async_trait]
pub trait RunnerDeregistration: Send + Sync {
    /// Deregister every runner whose name belongs to `workflow_id`
    async fn deregister_runners(&self, token: &str, workflow_id: &str) -> Result<()>;
}

/// Deregistration that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDeregistration;

#[async_trait]
impl RunnerDeregistration for NoopDeregistration {
    async fn deregister_runners(&self, _token: &str, workflow_id: &str) -> Result<()> {
        tracing::debug!("Skipping runner deregistration for {}", workflow_id);
        Ok(())
    }
}

/// Run `hook` for `workflow_id`, logging instead of failing
///
/// In dry-run mode nothing is deregistered.
pub async fn deregister_best_effort(
    hook: &dyn RunnerDeregistration,
    token: &str,
    workflow_id: &str,
    dry_run: bool,
) {
    if dry_run {
        tracing::info!("[dry-run] Would deregister runners for {}", workflow_id);
        return;
    }

    if let Err(e) = hook.deregister_runners(token, workflow_id).await {
        tracing::warn!("Failed to deregister runners for {}: {}", workflow_id, e);
    }
}
