//! EC2 API access
//!
//! [`Ec2Api`] is the narrow slice of EC2 the platform needs. [`SdkEc2Client`]
//! implements it with `aws-sdk-ec2`; tests substitute an in-memory fake.

use crate::config::AwsConfig;
use crate::error::{AwsError, Result};
use async_trait::async_trait;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use chrono::{DateTime, Utc};
use ciflow_cloud::{Instance, InstanceState, TagFilter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::OnceCell;

/// Error code EC2 returns when a dry-run request would have succeeded
const DRY_RUN_OPERATION: &str = "DryRunOperation";

/// EC2 `DescribeInstances` filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ec2Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Ec2Filter {
    pub fn new(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Filter on the instance lifecycle state
    pub fn states(states: &[&str]) -> Self {
        Self::new("instance-state-name", states)
    }
}

impl From<&TagFilter> for Ec2Filter {
    fn from(filter: &TagFilter) -> Self {
        Self {
            name: format!("tag:{}", filter.key),
            values: vec![filter.value.clone()],
        }
    }
}

/// EC2 operations used by the platform
#[async_trait]
pub trait Ec2Api: Send + Sync {
    /// Instances matching every filter
    async fn describe_instances(&self, filters: &[Ec2Filter]) -> Result<Vec<Instance>>;

    async fn start_instances(&self, ids: &[String], dry_run: bool) -> Result<()>;

    async fn stop_instances(&self, ids: &[String], dry_run: bool) -> Result<()>;

    async fn terminate_instances(&self, ids: &[String], dry_run: bool) -> Result<()>;
}

/// `aws-sdk-ec2` backed client
///
/// The SDK client is built on first use, so constructing the platform never
/// touches credentials.
pub struct SdkEc2Client {
    config: AwsConfig,
    client: OnceCell<aws_sdk_ec2::Client>,
}

impl SdkEc2Client {
    pub fn new(config: AwsConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> &aws_sdk_ec2::Client {
        self.client
            .get_or_init(|| async {
                let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
                if let Some(region) = &self.config.region {
                    loader = loader.region(aws_config::Region::new(region.clone()));
                }
                if let Some(profile) = &self.config.profile {
                    loader = loader.profile_name(profile);
                }
                let sdk_config = loader.load().await;
                tracing::debug!("Initialized EC2 client (region: {:?})", sdk_config.region());
                aws_sdk_ec2::Client::new(&sdk_config)
            })
            .await
    }
}

#[async_trait]
impl Ec2Api for SdkEc2Client {
    async fn describe_instances(&self, filters: &[Ec2Filter]) -> Result<Vec<Instance>> {
        let client = self.client().await;
        let sdk_filters: Vec<aws_sdk_ec2::types::Filter> = filters
            .iter()
            .map(|f| {
                aws_sdk_ec2::types::Filter::builder()
                    .name(&f.name)
                    .set_values(Some(f.values.clone()))
                    .build()
            })
            .collect();

        tracing::debug!("DescribeInstances filters: {:?}", filters);

        let mut instances = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = client
                .describe_instances()
                .set_filters(Some(sdk_filters.clone()))
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| sdk_error("DescribeInstances", e))?;

            for reservation in output.reservations() {
                instances.extend(reservation.instances().iter().filter_map(convert_instance));
            }

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(instances)
    }

    async fn start_instances(&self, ids: &[String], dry_run: bool) -> Result<()> {
        let result = self
            .client()
            .await
            .start_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .dry_run(dry_run)
            .send()
            .await;
        accept_dry_run("StartInstances", result)
    }

    async fn stop_instances(&self, ids: &[String], dry_run: bool) -> Result<()> {
        let result = self
            .client()
            .await
            .stop_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .dry_run(dry_run)
            .send()
            .await;
        accept_dry_run("StopInstances", result)
    }

    async fn terminate_instances(&self, ids: &[String], dry_run: bool) -> Result<()> {
        let result = self
            .client()
            .await
            .terminate_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .dry_run(dry_run)
            .send()
            .await;
        accept_dry_run("TerminateInstances", result)
    }
}

fn sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> AwsError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    AwsError::Sdk {
        operation: operation.to_string(),
        message: DisplayErrorContext(&err).to_string(),
    }
}

/// Treat `DryRunOperation` as success
fn accept_dry_run<T, E, R>(operation: &str, result: std::result::Result<T, SdkError<E, R>>) -> Result<()>
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.code() == Some(DRY_RUN_OPERATION) => {
            tracing::info!("[dry-run] {} would have succeeded", operation);
            Ok(())
        }
        Err(err) => Err(sdk_error(operation, err)),
    }
}

fn convert_instance(inst: &aws_sdk_ec2::types::Instance) -> Option<Instance> {
    let id = inst.instance_id()?;

    let tags: BTreeMap<String, String> = inst
        .tags()
        .iter()
        .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string())))
        .collect();

    let state = inst
        .state()
        .and_then(|s| s.name())
        .map(|n| InstanceState::from_ec2(n.as_str()))
        .unwrap_or(InstanceState::Unknown);

    let mut instance = Instance::new(id, state);
    if let Some(name) = tags.get("Name") {
        instance.name = name.clone();
    }
    instance.public_ip = inst.public_ip_address().map(str::to_string);
    instance.launched_at = inst
        .launch_time()
        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()));
    instance.tags = tags;

    Some(instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::error::ErrorMetadata;
    use aws_sdk_ec2::operation::stop_instances::StopInstancesError;

    #[test]
    fn test_tag_filter_conversion() {
        let filter = Ec2Filter::from(&TagFilter::workflow("run-42"));
        assert_eq!(filter.name, "tag:ci_workflow_id");
        assert_eq!(filter.values, vec!["run-42".to_string()]);

        let manager = Ec2Filter::from(&TagFilter::manager());
        assert_eq!(manager.name, "tag:ci_manager");
        assert_eq!(manager.values, vec![String::new()]);
    }

    #[test]
    fn test_convert_instance() {
        let sdk = aws_sdk_ec2::types::Instance::builder()
            .instance_id("i-0abc")
            .public_ip_address("198.51.100.4")
            .state(
                aws_sdk_ec2::types::InstanceState::builder()
                    .name(aws_sdk_ec2::types::InstanceStateName::Stopped)
                    .build(),
            )
            .tags(
                aws_sdk_ec2::types::Tag::builder()
                    .key("Name")
                    .value("ci-manager")
                    .build(),
            )
            .tags(aws_sdk_ec2::types::Tag::builder().key("ci_manager").build())
            .build();

        let instance = convert_instance(&sdk).unwrap();
        assert_eq!(instance.id, "i-0abc");
        assert_eq!(instance.name, "ci-manager");
        assert_eq!(instance.state, InstanceState::Stopped);
        assert_eq!(instance.public_ip.as_deref(), Some("198.51.100.4"));
        assert!(instance.is_manager());
    }

    fn stop_error(code: &str) -> SdkError<StopInstancesError, ()> {
        let meta = ErrorMetadata::builder()
            .code(code)
            .message("Request would have succeeded, but DryRun flag is set.")
            .build();
        SdkError::service_error(StopInstancesError::generic(meta), ())
    }

    #[test]
    fn test_dry_run_operation_counts_as_success() {
        let result: std::result::Result<(), _> = Err(stop_error("DryRunOperation"));
        assert!(accept_dry_run("StopInstances", result).is_ok());
    }

    #[test]
    fn test_other_service_errors_are_reported() {
        let result: std::result::Result<(), _> = Err(stop_error("UnauthorizedOperation"));
        match accept_dry_run("StopInstances", result) {
            Err(AwsError::Sdk { operation, .. }) => assert_eq!(operation, "StopInstances"),
            other => panic!("expected an SDK error, got {:?}", other),
        }
    }

    #[test]
    fn test_convert_instance_without_id() {
        let sdk = aws_sdk_ec2::types::Instance::builder().build();
        assert!(convert_instance(&sdk).is_none());
    }
}
