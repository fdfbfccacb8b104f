//! Platform selection and fan-out over `all`

use anyhow::Context;
use ciflow_cloud::{CloudError, CloudPlatform, Instance, PlatformKind, RunnerDeregistration, StateTransition};
use ciflow_cloud_aws::{AwsConfig, AwsPlatform};
use ciflow_cloud_azure::{AzureConfig, AzureCredential, AzurePlatform};
use std::sync::Arc;

/// The concrete platforms a command runs against
pub struct Platforms {
    inner: Vec<Box<dyn CloudPlatform>>,
}

impl Platforms {
    /// Build the platforms selected by `kind`
    ///
    /// For a single platform configuration errors are fatal. Under `all`, a
    /// platform that cannot be configured is skipped with a warning.
    pub fn build(kind: PlatformKind, hook: Arc<dyn RunnerDeregistration>) -> anyhow::Result<Self> {
        let fan_out = kind == PlatformKind::All;
        let mut inner: Vec<Box<dyn CloudPlatform>> = Vec::new();

        for platform in kind.expand() {
            match build_one(platform, hook.clone()) {
                Ok(p) => inner.push(p),
                Err(e) if fan_out => {
                    tracing::warn!("Skipping {}: {:#}", platform, e);
                }
                Err(e) => return Err(e),
            }
        }

        if inner.is_empty() {
            anyhow::bail!("No platform could be configured");
        }
        Ok(Self { inner })
    }

    pub fn from_platforms(inner: Vec<Box<dyn CloudPlatform>>) -> Self {
        Self { inner }
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn CloudPlatform> {
        self.inner.iter().map(|p| p.as_ref())
    }

    pub fn is_fan_out(&self) -> bool {
        self.inner.len() > 1
    }

    /// Render one line per platform, prefixed by its name when fanning out
    pub fn lines(&self, render: impl Fn(&dyn CloudPlatform) -> String) -> Vec<String> {
        self.iter()
            .map(|p| {
                if self.is_fan_out() {
                    format!("{}\t{}", p.platform_kind(), render(p))
                } else {
                    render(p)
                }
            })
            .collect()
    }

    pub async fn manager_exists(&self, workflow_tag: &str) -> anyhow::Result<bool> {
        for platform in self.iter() {
            if platform.manager_exists(workflow_tag).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn all_instances(&self, workflow_tag: &str) -> anyhow::Result<Vec<Instance>> {
        let mut instances = Vec::new();
        for platform in self.iter() {
            instances.extend(platform.all_instances(workflow_tag).await?);
        }
        Ok(instances)
    }

    pub async fn all_ci_instances(&self) -> anyhow::Result<Vec<Instance>> {
        let mut instances = Vec::new();
        for platform in self.iter() {
            instances.extend(platform.all_ci_instances().await?);
        }
        Ok(instances)
    }

    pub async fn manager_ip(&self, workflow_tag: &str) -> anyhow::Result<String> {
        let mut last_error = None;
        for platform in self.iter() {
            match platform.manager_ip(workflow_tag).await {
                Ok(ip) => return Ok(ip),
                Err(e @ CloudError::ManagerNotFound(_)) => last_error = Some(e),
                Err(e) => return Err(e.into()),
            }
        }
        Err(first_hit_error(last_error, workflow_tag))
    }

    pub async fn manager_hostname(&self, workflow_tag: &str, user: &str) -> anyhow::Result<String> {
        let mut last_error = None;
        for platform in self.iter() {
            match platform.manager_hostname(workflow_tag, user).await {
                Ok(host) => return Ok(host),
                Err(e @ CloudError::ManagerNotFound(_)) => last_error = Some(e),
                Err(e) => return Err(e.into()),
            }
        }
        Err(first_hit_error(last_error, workflow_tag))
    }

    pub async fn manager_metadata(&self, workflow_tag: &str) -> anyhow::Result<String> {
        let mut last_error = None;
        for platform in self.iter() {
            match platform.manager_metadata(workflow_tag).await {
                Ok(metadata) => return Ok(metadata),
                Err(e @ CloudError::ManagerNotFound(_)) => last_error = Some(e),
                Err(e) => return Err(e.into()),
            }
        }
        Err(first_hit_error(last_error, workflow_tag))
    }

    /// Apply `transition` on every platform
    ///
    /// When fanning out, a platform without instances for the tag is skipped;
    /// it is an error only if no platform had any.
    pub async fn apply_transition(
        &self,
        token: &str,
        workflow_tag: &str,
        transition: StateTransition,
        dry_run: bool,
    ) -> anyhow::Result<()> {
        let mut applied = 0;
        let mut last_missing = None;

        for platform in self.iter() {
            match platform
                .apply_transition(token, workflow_tag, transition, dry_run)
                .await
            {
                Ok(()) => applied += 1,
                Err(e @ CloudError::NoInstances(_)) if self.is_fan_out() => {
                    tracing::info!("{}: {}", platform.platform_kind(), e);
                    last_missing = Some(e);
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("{} failed on {}", transition, platform.platform_kind())
                    });
                }
            }
        }

        match (applied, last_missing) {
            (0, Some(e)) => Err(e.into()),
            _ => Ok(()),
        }
    }
}

fn build_one(
    kind: PlatformKind,
    hook: Arc<dyn RunnerDeregistration>,
) -> anyhow::Result<Box<dyn CloudPlatform>> {
    match kind {
        PlatformKind::Aws => {
            let config = AwsConfig::from_env().context("Invalid AWS configuration")?;
            Ok(Box::new(AwsPlatform::new(config).with_deregistration(hook)))
        }
        PlatformKind::Azure => {
            let config = AzureConfig::from_env().context("Invalid Azure configuration")?;
            Ok(Box::new(
                AzurePlatform::new(config, AzureCredential::from_env()).with_deregistration(hook),
            ))
        }
        PlatformKind::All => anyhow::bail!("'all' is not a concrete platform"),
    }
}

fn first_hit_error(last_error: Option<CloudError>, workflow_tag: &str) -> anyhow::Error {
    match last_error {
        Some(e) => e.into(),
        None => anyhow::anyhow!("No platform has a manager for {}", workflow_tag),
    }
}
