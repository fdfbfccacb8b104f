//! Azure platform for ciflow
//!
//! This crate implements the CloudPlatform trait for Azure. Workflow
//! resources are located with Azure Resource Graph (KQL over tags) and
//! mutated through the Resource Manager REST API.
//!
//! # Requirements
//!
//! - `AZURE_SUBSCRIPTION_ID` set
//! - A credential: `AZURE_ACCESS_TOKEN`, a service principal secret, a
//!   managed identity, or a logged-in az CLI
//!
//! # Example
//!
//! ```ignore
//! use ciflow_cloud::CloudPlatform;
//! use ciflow_cloud_azure::{AzureConfig, AzureCredential, AzurePlatform};
//!
//! let platform = AzurePlatform::new(AzureConfig::from_env()?, AzureCredential::from_env());
//! platform.terminate_instances(&token, "run-1234").await?;
//! ```

pub mod arm;
pub mod config;
pub mod credential;
pub mod error;
pub mod platform;
pub mod resource;

pub use arm::{ArmClient, AzureApi};
pub use config::AzureConfig;
pub use credential::{AccessToken, AzureCredential, CredentialSource};
pub use error::{AzureError, Result};
pub use platform::{AzurePlatform, CI_MARKER_TAG_KEY};
pub use resource::{AzureResource, AzureResourceKind, resource_graph_query};
