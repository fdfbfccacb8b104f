//! Cloud platform trait definition

use crate::error::{CloudError, Result};
use crate::instance::{Instance, TagFilter};
use crate::transition::StateTransition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// SSH user on manager images
pub const DEFAULT_MANAGER_USER: &str = "centos";

/// Cloud platform abstraction trait
///
/// Every supported provider (AWS, Azure) implements this trait so CI jobs can
/// locate, inspect and tear down the instances of a workflow without knowing
/// which cloud they run on.
///
/// "Managers" are the primary machine of a workflow run and carry an extra
/// empty `ci_manager` tag. "Instances" is the general term covering the
/// manager and every run/build farm machine the workflow launched.
#[async_trait]
pub trait CloudPlatform: Send + Sync {
    /// Which platform this is
    fn platform_kind(&self) -> PlatformKind;

    /// Tag filter selecting every instance associated with a workflow
    fn filter_for(&self, workflow_tag: &str) -> TagFilter;

    /// Tags to apply when launching the manager of a workflow
    fn manager_tags(&self, sha: &str, workflow_tag: &str) -> BTreeMap<String, String>;

    /// Whether the workflow manager already exists
    async fn manager_exists(&self, workflow_tag: &str) -> Result<bool>;

    /// All instances of a workflow, manager included
    async fn all_instances(&self, workflow_tag: &str) -> Result<Vec<Instance>>;

    /// All instances across every CI workflow
    async fn all_ci_instances(&self) -> Result<Vec<Instance>>;

    /// Public IP of the workflow manager
    async fn manager_ip(&self, workflow_tag: &str) -> Result<String>;

    /// Identifier the workflow's runners are registered under
    fn manager_workflow_id(&self, workflow_tag: &str) -> String;

    /// Apply `transition` to every instance of the workflow
    ///
    /// Non-manager instances are handled before the manager. Destructive
    /// transitions deregister the workflow's runners first.
    async fn apply_transition(
        &self,
        token: &str,
        workflow_tag: &str,
        transition: StateTransition,
        dry_run: bool,
    ) -> Result<()>;

    /// Human-readable description of the workflow manager
    async fn manager_metadata(&self, workflow_tag: &str) -> Result<String>;

    /// Parse `transition` and apply it
    async fn change_state(
        &self,
        token: &str,
        workflow_tag: &str,
        transition: &str,
        dry_run: bool,
    ) -> Result<()> {
        let transition: StateTransition = transition.parse()?;
        self.apply_transition(token, workflow_tag, transition, dry_run)
            .await
    }

    /// Stop every instance of the workflow
    async fn stop_instances(&self, token: &str, workflow_tag: &str) -> Result<()> {
        self.apply_transition(token, workflow_tag, StateTransition::Stop, false)
            .await
    }

    /// Terminate every instance of the workflow
    async fn terminate_instances(&self, token: &str, workflow_tag: &str) -> Result<()> {
        self.apply_transition(token, workflow_tag, StateTransition::Terminate, false)
            .await
    }

    /// SSH destination of the manager (`user@ip`)
    async fn manager_hostname(&self, workflow_tag: &str, user: &str) -> Result<String> {
        let ip = self.manager_ip(workflow_tag).await?;
        Ok(format!("{}@{}", user, ip))
    }
}

/// Platform selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    /// Every supported platform
    All,
    Aws,
    Azure,
}

impl PlatformKind {
    /// Concrete platforms this selector covers
    pub fn expand(&self) -> Vec<PlatformKind> {
        match self {
            PlatformKind::All => vec![PlatformKind::Aws, PlatformKind::Azure],
            other => vec![*other],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::All => "all",
            PlatformKind::Aws => "aws",
            PlatformKind::Azure => "azure",
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Self::All),
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            other => Err(CloudError::InvalidArgument(format!(
                "Invalid platform string: '{}'",
                other
            ))),
        }
    }
}
