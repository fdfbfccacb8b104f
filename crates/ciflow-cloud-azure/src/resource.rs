//! Azure Resource Graph records

use chrono::{DateTime, Utc};
use ciflow_cloud::{Instance, InstanceState, MANAGER_TAG_KEY, TagFilter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource types the platform queries and deletes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AzureResourceKind {
    VirtualMachine,
    PublicIpAddress,
    NetworkSecurityGroup,
    NetworkInterface,
    Disk,
    VirtualNetwork,
}

impl AzureResourceKind {
    /// Resources left behind by a deleted VM, in safe deletion order
    pub const ATTACHED: [AzureResourceKind; 5] = [
        AzureResourceKind::NetworkInterface,
        AzureResourceKind::PublicIpAddress,
        AzureResourceKind::Disk,
        AzureResourceKind::NetworkSecurityGroup,
        AzureResourceKind::VirtualNetwork,
    ];

    /// ARM resource type
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::VirtualMachine => "Microsoft.Compute/virtualMachines",
            Self::PublicIpAddress => "Microsoft.Network/publicIPAddresses",
            Self::NetworkSecurityGroup => "Microsoft.Network/networkSecurityGroups",
            Self::NetworkInterface => "Microsoft.Network/networkInterfaces",
            Self::Disk => "Microsoft.Compute/disks",
            Self::VirtualNetwork => "Microsoft.Network/virtualNetworks",
        }
    }

    /// ARM API version used for operations on this type
    pub fn api_version(&self) -> &'static str {
        match self {
            Self::VirtualMachine => "2024-03-01",
            Self::Disk => "2023-10-02",
            Self::PublicIpAddress
            | Self::NetworkSecurityGroup
            | Self::NetworkInterface
            | Self::VirtualNetwork => "2023-11-01",
        }
    }

    pub fn from_type(resource_type: &str) -> Option<Self> {
        [
            Self::VirtualMachine,
            Self::PublicIpAddress,
            Self::NetworkSecurityGroup,
            Self::NetworkInterface,
            Self::Disk,
            Self::VirtualNetwork,
        ]
        .into_iter()
        .find(|k| k.type_name().eq_ignore_ascii_case(resource_type))
    }
}

/// One row of a Resource Graph query (`objectArray` result format)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureResource {
    pub id: String,

    pub name: String,

    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default)]
    pub resource_group: Option<String>,

    #[serde(default)]
    pub location: Option<String>,

    /// Resource Graph returns `null` for untagged resources
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub properties: serde_json::Value,
}

impl AzureResource {
    pub fn kind(&self) -> Option<AzureResourceKind> {
        AzureResourceKind::from_type(&self.resource_type)
    }

    pub fn is_kind(&self, kind: AzureResourceKind) -> bool {
        self.kind() == Some(kind)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.as_ref()?.get(key).map(String::as_str)
    }

    pub fn is_manager(&self) -> bool {
        self.tag(MANAGER_TAG_KEY).is_some()
    }

    /// VM power state from the extended instance view
    pub fn power_state(&self) -> InstanceState {
        self.properties
            .pointer("/extended/instanceView/powerState/code")
            .and_then(|v| v.as_str())
            .map(InstanceState::from_azure_power_state)
            .unwrap_or(InstanceState::Unknown)
    }

    /// Address of a public IP resource
    pub fn ip_address(&self) -> Option<&str> {
        self.properties.get("ipAddress").and_then(|v| v.as_str())
    }

    pub fn to_instance(&self) -> Instance {
        let mut instance = Instance::new(&self.id, self.power_state()).with_name(&self.name);
        instance.resource_group = self.resource_group.clone();
        instance.tags = self.tags.clone().unwrap_or_default();
        instance.launched_at = self
            .properties
            .get("timeCreated")
            .and_then(|v| v.as_str())
            .or_else(|| self.tag("LaunchTime"))
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));
        instance
    }
}

/// Quote a KQL string literal
fn kql_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Build a Resource Graph query selecting resources that carry every tag
///
/// Values are compared case-insensitively (`=~`).
pub fn resource_graph_query(filters: &[TagFilter]) -> String {
    let clauses: Vec<String> = filters
        .iter()
        .map(|f| format!("tags.{}=~{}", f.key, kql_string(&f.value)))
        .collect();

    if clauses.is_empty() {
        "Resources".to_string()
    } else {
        format!("Resources | where {}", clauses.join(" and "))
    }
}
