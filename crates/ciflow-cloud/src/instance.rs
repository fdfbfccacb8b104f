//! Instance records and workflow tags

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag key shared by every resource launched for one workflow run
pub const WORKFLOW_TAG_KEY: &str = "ci_workflow_id";

/// Tag key present (with an empty value) only on the workflow manager
pub const MANAGER_TAG_KEY: &str = "ci_manager";

/// Tag key carrying the commit the manager was launched for
pub const COMMIT_TAG_KEY: &str = "ci_commit_sha1";

/// Provider-neutral tag predicate
///
/// Tag keys use underscores instead of hyphens: Azure Resource Graph queries
/// are written in KQL, where `-` parses as subtraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

impl TagFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Filter matching every resource of one workflow
    pub fn workflow(workflow_tag: impl Into<String>) -> Self {
        Self::new(WORKFLOW_TAG_KEY, workflow_tag)
    }

    /// Filter matching the manager tag
    pub fn manager() -> Self {
        Self::new(MANAGER_TAG_KEY, "")
    }
}

impl std::fmt::Display for TagFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// A compute resource observed on a cloud platform
///
/// Instances are never owned by this crate; they are queried and referenced by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider-specific identifier (EC2 instance id, Azure resource id)
    pub id: String,

    /// Human-readable name (Name tag, VM name)
    pub name: String,

    /// Last observed state
    pub state: InstanceState,

    /// Public IP address, if one is assigned
    pub public_ip: Option<String>,

    /// Azure resource group
    pub resource_group: Option<String>,

    /// All tags on the resource
    pub tags: BTreeMap<String, String>,

    /// Launch time reported by the provider
    pub launched_at: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn new(id: impl Into<String>, state: InstanceState) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            state,
            public_ip: None,
            resource_group: None,
            tags: BTreeMap::new(),
            launched_at: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_public_ip(mut self, ip: impl Into<String>) -> Self {
        self.public_ip = Some(ip.into());
        self
    }

    pub fn with_resource_group(mut self, resource_group: impl Into<String>) -> Self {
        self.resource_group = Some(resource_group.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Whether this instance carries the manager tag
    pub fn is_manager(&self) -> bool {
        self.tags.contains_key(MANAGER_TAG_KEY)
    }

    /// Workflow tag value, if present
    pub fn workflow_tag(&self) -> Option<&str> {
        self.tags.get(WORKFLOW_TAG_KEY).map(String::as_str)
    }

    pub fn matches(&self, filter: &TagFilter) -> bool {
        self.tags.get(&filter.key) == Some(&filter.value)
    }
}

/// Lifecycle state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Stopping,
    Stopped,
    Deallocating,
    Deallocated,
    Terminated,
    Unknown,
}

impl InstanceState {
    /// Parse an EC2 state name (`pending`, `running`, `shutting-down`, ...)
    pub fn from_ec2(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" => Self::ShuttingDown,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "terminated" => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    /// Parse an Azure power state code (`PowerState/running`, ...)
    pub fn from_azure_power_state(code: &str) -> Self {
        let state = code.strip_prefix("PowerState/").unwrap_or(code);
        match state.to_ascii_lowercase().as_str() {
            "starting" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "deallocating" => Self::Deallocating,
            "deallocated" => Self::Deallocated,
            _ => Self::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Pending => write!(f, "pending"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::ShuttingDown => write!(f, "shutting-down"),
            InstanceState::Stopping => write!(f, "stopping"),
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Deallocating => write!(f, "deallocating"),
            InstanceState::Deallocated => write!(f, "deallocated"),
            InstanceState::Terminated => write!(f, "terminated"),
            InstanceState::Unknown => write!(f, "unknown"),
        }
    }
}
