//! State transitions for workflow instances

use crate::error::{CloudError, Result};
use crate::instance::Instance;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Requested lifecycle change for every instance of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateTransition {
    /// Stop instances, keeping their disks
    Stop,
    /// Start stopped instances
    Start,
    /// Destroy instances
    Terminate,
}

impl StateTransition {
    /// Stop and terminate take runners offline, so their registrations are removed first
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Stop | Self::Terminate)
    }
}

impl std::fmt::Display for StateTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateTransition::Stop => write!(f, "stop"),
            StateTransition::Start => write!(f, "start"),
            StateTransition::Terminate => write!(f, "terminate"),
        }
    }
}

impl FromStr for StateTransition {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stop" => Ok(Self::Stop),
            "start" => Ok(Self::Start),
            "terminate" => Ok(Self::Terminate),
            other => Err(CloudError::InvalidArgument(format!(
                "Unrecognized transition type: {}",
                other
            ))),
        }
    }
}

/// Locate the single manager among a workflow's instances
///
/// Returns `Ok(None)` when no instance carries the manager tag and
/// `MultipleManagers` when more than one does.
pub fn find_manager<'a>(workflow_tag: &str, instances: &'a [Instance]) -> Result<Option<&'a Instance>> {
    let mut managers = instances.iter().filter(|i| i.is_manager());
    let first = managers.next();
    let rest = managers.count();
    if rest > 0 {
        return Err(CloudError::MultipleManagers {
            tag: workflow_tag.to_string(),
            count: rest + 1,
        });
    }
    Ok(first)
}

/// Order instances so the manager comes last
///
/// The transition may be issued from the manager itself, so every dependent
/// instance has to be handled before it. Relative order of the others is kept.
pub fn manager_last(instances: Vec<Instance>) -> Vec<Instance> {
    let (mut managers, mut ordered): (Vec<_>, Vec<_>) =
        instances.into_iter().partition(|i| i.is_manager());
    ordered.append(&mut managers);
    ordered
}
