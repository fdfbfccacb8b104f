//! AWS platform configuration

use crate::error::{AwsError, Result};
use ciflow_cloud::WaitConfig;

/// Configuration for the AWS platform
#[derive(Debug, Clone)]
pub struct AwsConfig {
    /// Region override; the aws-config default chain is used when unset
    pub region: Option<String>,

    /// Named profile override
    pub profile: Option<String>,

    /// Wait for the manager to come back up after `start`
    pub wait_for_manager: bool,

    /// Backoff used while waiting for the manager
    pub wait: WaitConfig,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            wait_for_manager: true,
            wait: WaitConfig::default(),
        }
    }
}

impl AwsConfig {
    /// Create AwsConfig from environment variables
    ///
    /// Reads `AWS_REGION`, `AWS_PROFILE` and `CIFLOW_WAIT_FOR_MANAGER`.
    pub fn from_env() -> Result<Self> {
        let region = non_empty_var("AWS_REGION");
        let profile = non_empty_var("AWS_PROFILE");
        let wait_for_manager = match non_empty_var("CIFLOW_WAIT_FOR_MANAGER") {
            Some(v) => parse_bool("CIFLOW_WAIT_FOR_MANAGER", &v)?,
            None => true,
        };

        Ok(Self {
            region,
            profile,
            wait_for_manager,
            ..Default::default()
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(AwsError::InvalidConfig(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}
