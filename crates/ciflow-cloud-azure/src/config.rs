//! Azure platform configuration

use crate::error::{AzureError, Result};
use ciflow_cloud::WaitConfig;

pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";

/// Configuration for the Azure platform
#[derive(Debug, Clone)]
pub struct AzureConfig {
    /// Subscription every query and operation is scoped to
    pub subscription_id: String,

    /// Resource Manager endpoint
    pub arm_endpoint: String,

    /// After terminating VMs, also delete the workflow's NICs, public IPs,
    /// disks, NSGs and VNets
    pub purge_attached_resources: bool,

    /// Backoff used while polling long-running operations
    pub wait: WaitConfig,
}

impl AzureConfig {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            arm_endpoint: DEFAULT_ARM_ENDPOINT.to_string(),
            purge_attached_resources: false,
            wait: WaitConfig::default(),
        }
    }

    /// Create AzureConfig from environment variables
    pub fn from_env() -> Result<Self> {
        let subscription_id = std::env::var("AZURE_SUBSCRIPTION_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AzureError::MissingEnvVar("AZURE_SUBSCRIPTION_ID".to_string()))?;

        let mut config = Self::new(subscription_id);

        if let Ok(endpoint) = std::env::var("AZURE_ARM_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                config.arm_endpoint = endpoint.trim_end_matches('/').to_string();
            }
        }

        if let Ok(purge) = std::env::var("AZURE_PURGE_ATTACHED_RESOURCES") {
            config.purge_attached_resources = match purge.trim().to_ascii_lowercase().as_str() {
                "" | "0" | "false" | "no" => false,
                "1" | "true" | "yes" => true,
                other => {
                    return Err(AzureError::InvalidConfig(format!(
                        "AZURE_PURGE_ATTACHED_RESOURCES must be a boolean, got '{}'",
                        other
                    )));
                }
            };
        }

        Ok(config)
    }
}
