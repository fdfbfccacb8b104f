//! Azure platform implementation

use crate::arm::{ArmClient, AzureApi};
use crate::config::AzureConfig;
use crate::credential::AzureCredential;
use crate::resource::{AzureResource, AzureResourceKind};
use async_trait::async_trait;
use chrono::Utc;
use ciflow_cloud::{
    COMMIT_TAG_KEY, CloudError, CloudPlatform, Instance, MANAGER_TAG_KEY, NoopDeregistration,
    PlatformKind, RunnerDeregistration, StateTransition, TagFilter, WORKFLOW_TAG_KEY,
    deregister_best_effort, find_manager,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tag marking every Azure resource launched by CI
pub const CI_MARKER_TAG_KEY: &str = "ci_fleet";

/// Azure virtual machine platform
pub struct AzurePlatform<A = ArmClient> {
    api: A,
    config: AzureConfig,
    deregistration: Arc<dyn RunnerDeregistration>,
}

impl AzurePlatform<ArmClient> {
    pub fn new(config: AzureConfig, credential: AzureCredential) -> Self {
        Self::with_api(ArmClient::new(config.clone(), credential), config)
    }
}

impl<A: AzureApi> AzurePlatform<A> {
    pub fn with_api(api: A, config: AzureConfig) -> Self {
        Self {
            api,
            config,
            deregistration: Arc::new(NoopDeregistration),
        }
    }

    /// Set the hook used to deregister runners before stop/terminate
    pub fn with_deregistration(mut self, hook: Arc<dyn RunnerDeregistration>) -> Self {
        self.deregistration = hook;
        self
    }

    /// Every tagged resource of the workflow, of any type
    async fn workflow_resources(&self, workflow_tag: &str) -> ciflow_cloud::Result<Vec<AzureResource>> {
        Ok(self
            .api
            .query_resources(&[self.filter_for(workflow_tag)])
            .await?)
    }

    async fn workflow_vms(&self, workflow_tag: &str) -> ciflow_cloud::Result<Vec<AzureResource>> {
        Ok(of_kind(
            self.workflow_resources(workflow_tag).await?,
            AzureResourceKind::VirtualMachine,
        ))
    }

    /// The single manager VM of a workflow, if any
    async fn find_manager(&self, workflow_tag: &str) -> ciflow_cloud::Result<Option<AzureResource>> {
        let mut managers: Vec<_> = self
            .workflow_vms(workflow_tag)
            .await?
            .into_iter()
            .filter(AzureResource::is_manager)
            .collect();

        if managers.len() > 1 {
            return Err(CloudError::MultipleManagers {
                tag: workflow_tag.to_string(),
                count: managers.len(),
            });
        }
        Ok(managers.pop())
    }

    /// Begin deleting every resource, then wait on all of them
    async fn delete_all(&self, resources: &[&AzureResource], dry_run: bool) -> ciflow_cloud::Result<()> {
        let mut pending = Vec::new();
        for resource in resources {
            let Some(kind) = resource.kind() else {
                continue;
            };
            if dry_run {
                tracing::info!("[dry-run] Would delete {} {}", kind.type_name(), resource.name);
                continue;
            }
            let operation = self.api.begin_delete(&resource.id, kind).await?;
            tracing::info!("{} flagged for deletion", resource.name);
            pending.push((resource, operation));
        }

        for (resource, operation) in pending {
            if let Some(url) = operation {
                self.api.wait_for_operation(&url).await?;
            }
            tracing::info!("Succeeded in deleting {}", resource.name);
        }
        Ok(())
    }
}

fn of_kind(resources: Vec<AzureResource>, kind: AzureResourceKind) -> Vec<AzureResource> {
    resources.into_iter().filter(|r| r.is_kind(kind)).collect()
}

/// Non-manager VMs first, manager last
fn manager_last(vms: &[AzureResource]) -> Vec<&AzureResource> {
    let (managers, mut ordered): (Vec<_>, Vec<_>) = vms.iter().partition(|r| r.is_manager());
    ordered.extend(managers);
    ordered
}

#[async_trait]
impl<A: AzureApi> CloudPlatform for AzurePlatform<A> {
    fn platform_kind(&self) -> PlatformKind {
        PlatformKind::Azure
    }

    fn filter_for(&self, workflow_tag: &str) -> TagFilter {
        TagFilter::workflow(workflow_tag)
    }

    fn manager_tags(&self, sha: &str, workflow_tag: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (COMMIT_TAG_KEY.to_string(), sha.to_string()),
            (MANAGER_TAG_KEY.to_string(), String::new()),
            (WORKFLOW_TAG_KEY.to_string(), workflow_tag.to_string()),
            (CI_MARKER_TAG_KEY.to_string(), "True".to_string()),
            ("LaunchTime".to_string(), Utc::now().to_rfc3339()),
        ])
    }

    async fn manager_exists(&self, workflow_tag: &str) -> ciflow_cloud::Result<bool> {
        Ok(self.find_manager(workflow_tag).await?.is_some())
    }

    async fn all_instances(&self, workflow_tag: &str) -> ciflow_cloud::Result<Vec<Instance>> {
        Ok(self
            .workflow_vms(workflow_tag)
            .await?
            .iter()
            .map(AzureResource::to_instance)
            .collect())
    }

    async fn all_ci_instances(&self) -> ciflow_cloud::Result<Vec<Instance>> {
        let marker = TagFilter::new(CI_MARKER_TAG_KEY, "True");
        let resources = self.api.query_resources(&[marker]).await?;
        Ok(of_kind(resources, AzureResourceKind::VirtualMachine)
            .iter()
            .map(AzureResource::to_instance)
            .collect())
    }

    async fn manager_ip(&self, workflow_tag: &str) -> ciflow_cloud::Result<String> {
        // The public IP is a separate resource carrying the same workflow tag
        let ips = of_kind(
            self.workflow_resources(workflow_tag).await?,
            AzureResourceKind::PublicIpAddress,
        );

        ips.iter()
            .find_map(|ip| ip.ip_address())
            .map(str::to_string)
            .ok_or_else(|| {
                CloudError::ManagerNotFound(format!(
                    "No Azure IP found associated with tag matching workflow id {}",
                    workflow_tag
                ))
            })
    }

    fn manager_workflow_id(&self, workflow_tag: &str) -> String {
        format!("azure-{}", workflow_tag)
    }

    async fn apply_transition(
        &self,
        token: &str,
        workflow_tag: &str,
        transition: StateTransition,
        dry_run: bool,
    ) -> ciflow_cloud::Result<()> {
        let terminate = match transition {
            StateTransition::Start => {
                return Err(CloudError::Unsupported(
                    "starting instances is not implemented on Azure".to_string(),
                ));
            }
            StateTransition::Stop => false,
            StateTransition::Terminate => true,
        };

        let resources = self.workflow_resources(workflow_tag).await?;
        let vms: Vec<AzureResource> = resources
            .iter()
            .filter(|r| r.is_kind(AzureResourceKind::VirtualMachine))
            .cloned()
            .collect();
        if vms.is_empty() {
            return Err(CloudError::NoInstances(format!(
                "Couldn't find an active vm associated with tag {}",
                self.filter_for(workflow_tag)
            )));
        }

        let instances: Vec<Instance> = vms.iter().map(AzureResource::to_instance).collect();
        find_manager(workflow_tag, &instances)?;

        deregister_best_effort(
            self.deregistration.as_ref(),
            token,
            &self.manager_workflow_id(workflow_tag),
            dry_run,
        )
        .await;

        let ordered = manager_last(&vms);
        if terminate {
            self.delete_all(&ordered, dry_run).await?;

            if self.config.purge_attached_resources {
                for kind in AzureResourceKind::ATTACHED {
                    let attached: Vec<&AzureResource> =
                        resources.iter().filter(|r| r.is_kind(kind)).collect();
                    self.delete_all(&attached, dry_run).await?;
                }
            }
        } else {
            for vm in ordered {
                if dry_run {
                    tracing::info!("[dry-run] Would power off VM {}", vm.name);
                    continue;
                }
                tracing::info!("Flagged VM {} for shutdown", vm.name);
                self.api.power_off(&vm.id).await?;
            }
        }

        Ok(())
    }

    async fn manager_metadata(&self, workflow_tag: &str) -> ciflow_cloud::Result<String> {
        let manager = self.find_manager(workflow_tag).await?.ok_or_else(|| {
            CloudError::ManagerNotFound(format!("no Azure manager for workflow {}", workflow_tag))
        })?;
        Ok(serde_json::to_string_pretty(&manager)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use std::sync::Mutex;

    /// In-memory ARM recording every mutating call in order
    #[derive(Default)]
    struct FakeArm {
        resources: Vec<AzureResource>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeArm {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AzureApi for FakeArm {
        async fn query_resources(&self, filters: &[TagFilter]) -> Result<Vec<AzureResource>> {
            Ok(self
                .resources
                .iter()
                .filter(|r| {
                    filters.iter().all(|f| {
                        r.tag(&f.key)
                            .is_some_and(|v| v.eq_ignore_ascii_case(&f.value))
                    })
                })
                .cloned()
                .collect())
        }

        async fn power_off(&self, vm_id: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("power_off:{}", vm_id));
            Ok(())
        }

        async fn begin_delete(&self, id: &str, _kind: AzureResourceKind) -> Result<Option<String>> {
            self.calls.lock().unwrap().push(format!("delete:{}", id));
            Ok(Some(format!("https://op/{}", id)))
        }

        async fn wait_for_operation(&self, operation_url: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("wait:{}", operation_url));
            Ok(())
        }
    }

    struct LoggingDeregistration {
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl RunnerDeregistration for LoggingDeregistration {
        async fn deregister_runners(&self, token: &str, workflow_id: &str) -> ciflow_cloud::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("deregister:{}:{}", token, workflow_id));
            Ok(())
        }
    }

    fn resource(name: &str, kind: AzureResourceKind, tags: &[(&str, &str)]) -> AzureResource {
        AzureResource {
            id: format!("/rg/ci/{}", name),
            name: name.to_string(),
            resource_type: kind.type_name().to_lowercase(),
            resource_group: Some("ci".to_string()),
            location: Some("westus2".to_string()),
            tags: Some(
                tags.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            properties: serde_json::json!({
                "extended": {"instanceView": {"powerState": {"code": "PowerState/running"}}}
            }),
        }
    }

    fn vm(name: &str, tag: &str, manager: bool) -> AzureResource {
        let mut tags = vec![(WORKFLOW_TAG_KEY, tag), (CI_MARKER_TAG_KEY, "True")];
        if manager {
            tags.push((MANAGER_TAG_KEY, ""));
        }
        resource(name, AzureResourceKind::VirtualMachine, &tags)
    }

    fn public_ip(name: &str, tag: &str, address: &str) -> AzureResource {
        let mut ip = resource(name, AzureResourceKind::PublicIpAddress, &[(WORKFLOW_TAG_KEY, tag)]);
        ip.properties = serde_json::json!({ "ipAddress": address });
        ip
    }

    fn platform(resources: Vec<AzureResource>, purge: bool) -> AzurePlatform<FakeArm> {
        let arm = FakeArm {
            resources,
            ..Default::default()
        };
        let hook = Arc::new(LoggingDeregistration {
            calls: arm.calls.clone(),
        });
        let mut config = AzureConfig::new("sub");
        config.purge_attached_resources = purge;
        AzurePlatform::with_api(arm, config).with_deregistration(hook)
    }

    #[test]
    fn test_manager_tags() {
        let p = platform(vec![], false);
        let tags = p.manager_tags("cafe01", "run-3");
        assert_eq!(tags["ci_commit_sha1"], "cafe01");
        assert_eq!(tags["ci_manager"], "");
        assert_eq!(tags["ci_workflow_id"], "run-3");
        assert_eq!(tags["ci_fleet"], "True");
        assert!(chrono::DateTime::parse_from_rfc3339(&tags["LaunchTime"]).is_ok());
        assert_eq!(p.manager_workflow_id("run-3"), "azure-run-3");
    }

    #[tokio::test]
    async fn test_manager_exists_and_ip() {
        let p = platform(
            vec![
                vm("mgr", "run-1", true),
                public_ip("mgr-ip", "run-1", "20.0.0.5"),
                vm("other", "run-2", true),
            ],
            false,
        );

        assert!(p.manager_exists("run-1").await.unwrap());
        assert_eq!(p.manager_ip("run-1").await.unwrap(), "20.0.0.5");
        assert_eq!(p.all_instances("run-1").await.unwrap().len(), 1);
        assert_eq!(p.all_ci_instances().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tag() {
        let p = platform(vec![vm("mgr", "run-1", true)], false);

        assert!(!p.manager_exists("missing").await.unwrap());
        assert!(matches!(
            p.manager_ip("missing").await,
            Err(CloudError::ManagerNotFound(_))
        ));
        assert!(matches!(
            p.stop_instances("tok", "missing").await,
            Err(CloudError::NoInstances(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_powers_off_manager_last() {
        let p = platform(
            vec![
                vm("mgr", "run-1", true),
                vm("worker-a", "run-1", false),
                vm("worker-b", "run-1", false),
            ],
            false,
        );

        p.change_state("tok", "run-1", "stop", false).await.unwrap();

        assert_eq!(
            p.api.calls(),
            vec![
                "deregister:tok:azure-run-1",
                "power_off:/rg/ci/worker-a",
                "power_off:/rg/ci/worker-b",
                "power_off:/rg/ci/mgr",
            ]
        );
    }

    #[tokio::test]
    async fn test_terminate_waits_for_every_delete() {
        let p = platform(
            vec![vm("mgr", "run-1", true), vm("worker", "run-1", false)],
            false,
        );

        p.terminate_instances("tok", "run-1").await.unwrap();

        assert_eq!(
            p.api.calls(),
            vec![
                "deregister:tok:azure-run-1",
                "delete:/rg/ci/worker",
                "delete:/rg/ci/mgr",
                "wait:https://op//rg/ci/worker",
                "wait:https://op//rg/ci/mgr",
            ]
        );
    }

    #[tokio::test]
    async fn test_terminate_purges_attached_resources_in_order() {
        let tag = [(WORKFLOW_TAG_KEY, "run-1")];
        let p = platform(
            vec![
                resource("vnet", AzureResourceKind::VirtualNetwork, &tag),
                resource("disk", AzureResourceKind::Disk, &tag),
                vm("mgr", "run-1", true),
                resource("nic", AzureResourceKind::NetworkInterface, &tag),
                public_ip("ip", "run-1", "20.0.0.5"),
                resource("nsg", AzureResourceKind::NetworkSecurityGroup, &tag),
            ],
            true,
        );

        p.terminate_instances("tok", "run-1").await.unwrap();

        let deletes: Vec<String> = p
            .api
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("delete:"))
            .collect();
        assert_eq!(
            deletes,
            vec![
                "delete:/rg/ci/mgr",
                "delete:/rg/ci/nic",
                "delete:/rg/ci/ip",
                "delete:/rg/ci/disk",
                "delete:/rg/ci/nsg",
                "delete:/rg/ci/vnet",
            ]
        );
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_calls() {
        let p = platform(vec![vm("mgr", "run-1", true)], true);

        p.change_state("tok", "run-1", "terminate", true).await.unwrap();
        p.change_state("tok", "run-1", "stop", true).await.unwrap();

        assert!(p.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_is_unsupported() {
        let p = platform(vec![vm("mgr", "run-1", true)], false);
        assert!(matches!(
            p.change_state("tok", "run-1", "start", false).await,
            Err(CloudError::Unsupported(_))
        ));
        assert!(p.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_transition() {
        let p = platform(vec![vm("mgr", "run-1", true)], false);
        assert!(matches!(
            p.change_state("tok", "run-1", "suspend", false).await,
            Err(CloudError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_manager_metadata_is_resource_json() {
        let p = platform(vec![vm("mgr", "run-1", true), vm("w", "run-1", false)], false);

        let md = p.manager_metadata("run-1").await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&md).unwrap();
        assert_eq!(parsed["name"], "mgr");
        assert_eq!(parsed["resourceGroup"], "ci");
    }

    #[tokio::test]
    async fn test_stop_with_two_managers_makes_no_calls() {
        let p = platform(
            vec![
                vm("m1", "run-1", true),
                vm("m2", "run-1", true),
                vm("worker", "run-1", false),
            ],
            false,
        );

        assert!(matches!(
            p.stop_instances("tok", "run-1").await,
            Err(CloudError::MultipleManagers { count: 2, .. })
        ));
        assert!(p.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_two_managers_violate_invariant() {
        let p = platform(vec![vm("m1", "run-1", true), vm("m2", "run-1", true)], false);
        assert!(matches!(
            p.manager_exists("run-1").await,
            Err(CloudError::MultipleManagers { count: 2, .. })
        ));
    }
}
