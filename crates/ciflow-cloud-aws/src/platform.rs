//! AWS platform implementation

use crate::config::AwsConfig;
use crate::ec2::{Ec2Api, Ec2Filter, SdkEc2Client};
use async_trait::async_trait;
use ciflow_cloud::{
    COMMIT_TAG_KEY, CloudError, CloudPlatform, Instance, MANAGER_TAG_KEY, NoopDeregistration,
    PlatformKind, RunnerDeregistration, StateTransition, TagFilter, WORKFLOW_TAG_KEY,
    deregister_best_effort, find_manager, manager_last, wait_until,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// States a workflow instance can be in while it still counts as alive
const LIVE_STATES: &[&str] = &["pending", "running", "shutting-down", "stopping", "stopped"];

/// AWS EC2 platform
pub struct AwsPlatform<C = SdkEc2Client> {
    ec2: C,
    config: AwsConfig,
    deregistration: Arc<dyn RunnerDeregistration>,
}

impl AwsPlatform<SdkEc2Client> {
    pub fn new(config: AwsConfig) -> Self {
        Self::with_client(SdkEc2Client::new(config.clone()), config)
    }
}

impl<C: Ec2Api> AwsPlatform<C> {
    pub fn with_client(ec2: C, config: AwsConfig) -> Self {
        Self {
            ec2,
            config,
            deregistration: Arc::new(NoopDeregistration),
        }
    }

    /// Set the hook used to deregister runners before stop/terminate
    pub fn with_deregistration(mut self, hook: Arc<dyn RunnerDeregistration>) -> Self {
        self.deregistration = hook;
        self
    }

    fn workflow_filters(&self, workflow_tag: &str) -> Vec<Ec2Filter> {
        vec![
            Ec2Filter::from(&self.filter_for(workflow_tag)),
            Ec2Filter::states(LIVE_STATES),
        ]
    }

    /// The single live manager of a workflow, if any
    pub async fn find_manager(&self, workflow_tag: &str) -> ciflow_cloud::Result<Option<Instance>> {
        let mut filters = self.workflow_filters(workflow_tag);
        filters.push(Ec2Filter::from(&TagFilter::manager()));

        let managers = self.ec2.describe_instances(&filters).await?;
        Ok(find_manager(workflow_tag, &managers)?.cloned())
    }

    async fn wait_for_manager(&self, workflow_tag: &str) -> ciflow_cloud::Result<Instance> {
        tracing::info!("Waiting on manager instance");
        wait_until(&self.config.wait, "AWS manager", || async move {
            let manager = self.find_manager(workflow_tag).await?;
            Ok(manager.filter(|m| m.state.is_running() && m.public_ip.is_some()))
        })
        .await
    }
}

/// Pretty-print instance ID, state and public IP
pub fn instance_metadata(instance: &Instance) -> String {
    let mut md = format!(
        "    Instance ID: {}\n    Instance State: {}",
        instance.id, instance.state
    );
    if let Some(ip) = &instance.public_ip {
        md.push_str(&format!("\n    Instance IP: {}", ip));
    }
    md
}

#[async_trait]
impl<C: Ec2Api> CloudPlatform for AwsPlatform<C> {
    fn platform_kind(&self) -> PlatformKind {
        PlatformKind::Aws
    }

    fn filter_for(&self, workflow_tag: &str) -> TagFilter {
        TagFilter::workflow(workflow_tag)
    }

    fn manager_tags(&self, sha: &str, workflow_tag: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (COMMIT_TAG_KEY.to_string(), sha.to_string()),
            (MANAGER_TAG_KEY.to_string(), String::new()),
            (WORKFLOW_TAG_KEY.to_string(), workflow_tag.to_string()),
        ])
    }

    async fn manager_exists(&self, workflow_tag: &str) -> ciflow_cloud::Result<bool> {
        Ok(self.find_manager(workflow_tag).await?.is_some())
    }

    async fn all_instances(&self, workflow_tag: &str) -> ciflow_cloud::Result<Vec<Instance>> {
        Ok(self
            .ec2
            .describe_instances(&self.workflow_filters(workflow_tag))
            .await?)
    }

    async fn all_ci_instances(&self) -> ciflow_cloud::Result<Vec<Instance>> {
        // Any workflow tag value, any state
        let filters = [Ec2Filter::from(&self.filter_for("*"))];
        Ok(self.ec2.describe_instances(&filters).await?)
    }

    async fn manager_ip(&self, workflow_tag: &str) -> ciflow_cloud::Result<String> {
        let manager = self.find_manager(workflow_tag).await?.ok_or_else(|| {
            CloudError::ManagerNotFound(format!(
                "No AWS manager instance running with tag matching workflow id {}",
                workflow_tag
            ))
        })?;

        manager.public_ip.ok_or_else(|| {
            CloudError::ManagerNotFound(format!(
                "AWS manager {} has no public IP address",
                manager.id
            ))
        })
    }

    fn manager_workflow_id(&self, workflow_tag: &str) -> String {
        format!("aws-{}", workflow_tag)
    }

    async fn apply_transition(
        &self,
        token: &str,
        workflow_tag: &str,
        transition: StateTransition,
        dry_run: bool,
    ) -> ciflow_cloud::Result<()> {
        let instances = self.all_instances(workflow_tag).await?;
        if instances.is_empty() {
            return Err(CloudError::NoInstances(format!(
                "no AWS instances match {}",
                self.filter_for(workflow_tag)
            )));
        }

        let has_manager = find_manager(workflow_tag, &instances)?.is_some();
        let ids: Vec<String> = manager_last(instances).into_iter().map(|i| i.id).collect();

        if transition.is_destructive() {
            deregister_best_effort(
                self.deregistration.as_ref(),
                token,
                &self.manager_workflow_id(workflow_tag),
                dry_run,
            )
            .await;
        }

        match transition {
            StateTransition::Stop => {
                tracing::info!("Stopping instances: {}", ids.join(", "));
                self.ec2.stop_instances(&ids, dry_run).await?;
            }
            StateTransition::Start => {
                tracing::info!("Starting instances: {}", ids.join(", "));
                self.ec2.start_instances(&ids, dry_run).await?;

                if has_manager && self.config.wait_for_manager && !dry_run {
                    let manager = self.wait_for_manager(workflow_tag).await?;
                    tracing::info!("Manager ready.\n{}", instance_metadata(&manager));
                }
            }
            StateTransition::Terminate => {
                tracing::info!("Terminating instances: {}", ids.join(", "));
                self.ec2.terminate_instances(&ids, dry_run).await?;
            }
        }

        Ok(())
    }

    async fn manager_metadata(&self, workflow_tag: &str) -> ciflow_cloud::Result<String> {
        let manager = self.find_manager(workflow_tag).await?.ok_or_else(|| {
            CloudError::ManagerNotFound(format!("no AWS manager for workflow {}", workflow_tag))
        })?;
        Ok(instance_metadata(&manager))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use ciflow_cloud::{InstanceState, WaitConfig};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Start(Vec<String>, bool),
        Stop(Vec<String>, bool),
        Terminate(Vec<String>, bool),
    }

    /// In-memory EC2 that evaluates filters against its instance list
    #[derive(Default)]
    struct FakeEc2 {
        instances: Mutex<Vec<Instance>>,
        calls: Arc<Mutex<Vec<String>>>,
        transitions: Mutex<Vec<Call>>,
        describes: Mutex<Vec<Vec<Ec2Filter>>>,
    }

    impl FakeEc2 {
        fn with(instances: Vec<Instance>) -> Self {
            Self {
                instances: Mutex::new(instances),
                ..Default::default()
            }
        }

        fn matches(instance: &Instance, filter: &Ec2Filter) -> bool {
            if filter.name == "instance-state-name" {
                return filter.values.contains(&instance.state.to_string());
            }
            let key = filter.name.trim_start_matches("tag:");
            match instance.tags.get(key) {
                Some(value) => filter.values.iter().any(|v| v == "*" || v == value),
                None => false,
            }
        }

        fn transitions(&self) -> Vec<Call> {
            self.transitions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Ec2Api for FakeEc2 {
        async fn describe_instances(&self, filters: &[Ec2Filter]) -> Result<Vec<Instance>> {
            self.describes.lock().unwrap().push(filters.to_vec());
            self.calls.lock().unwrap().push("describe".into());
            Ok(self
                .instances
                .lock()
                .unwrap()
                .iter()
                .filter(|i| filters.iter().all(|f| Self::matches(i, f)))
                .cloned()
                .collect())
        }

        async fn start_instances(&self, ids: &[String], dry_run: bool) -> Result<()> {
            self.calls.lock().unwrap().push("start".into());
            self.transitions
                .lock()
                .unwrap()
                .push(Call::Start(ids.to_vec(), dry_run));
            // instances come up with an address
            for inst in self.instances.lock().unwrap().iter_mut() {
                if ids.contains(&inst.id) {
                    inst.state = InstanceState::Running;
                    inst.public_ip.get_or_insert_with(|| "203.0.113.10".into());
                }
            }
            Ok(())
        }

        async fn stop_instances(&self, ids: &[String], dry_run: bool) -> Result<()> {
            self.calls.lock().unwrap().push("stop".into());
            self.transitions
                .lock()
                .unwrap()
                .push(Call::Stop(ids.to_vec(), dry_run));
            Ok(())
        }

        async fn terminate_instances(&self, ids: &[String], dry_run: bool) -> Result<()> {
            self.calls.lock().unwrap().push("terminate".into());
            self.transitions
                .lock()
                .unwrap()
                .push(Call::Terminate(ids.to_vec(), dry_run));
            Ok(())
        }
    }

    /// Records deregistration into the same call log as the fake EC2
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

    fn instance(id: &str, tag: &str, state: InstanceState) -> Instance {
        Instance::new(id, state).with_tag(WORKFLOW_TAG_KEY, tag)
    }

    fn manager(id: &str, tag: &str, ip: Option<&str>) -> Instance {
        let mut m = instance(id, tag, InstanceState::Running).with_tag(MANAGER_TAG_KEY, "");
        m.public_ip = ip.map(str::to_string);
        m
    }

    fn platform(instances: Vec<Instance>) -> AwsPlatform<FakeEc2> {
        let ec2 = FakeEc2::with(instances);
        let hook = Arc::new(LoggingDeregistration {
            calls: ec2.calls.clone(),
        });
        let config = AwsConfig {
            wait: WaitConfig {
                max_retries: 3,
                initial_delay_ms: 10,
                max_delay_ms: 10,
                multiplier: 1.0,
            },
            ..Default::default()
        };
        AwsPlatform::with_client(ec2, config).with_deregistration(hook)
    }

    #[test]
    fn test_manager_tags() {
        let p = platform(vec![]);
        let tags = p.manager_tags("deadbeef", "run-9");
        assert_eq!(tags.get("ci_commit_sha1").map(String::as_str), Some("deadbeef"));
        assert_eq!(tags.get("ci_manager").map(String::as_str), Some(""));
        assert_eq!(tags.get("ci_workflow_id").map(String::as_str), Some("run-9"));
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn test_filter_and_workflow_id() {
        let p = platform(vec![]);
        assert_eq!(p.filter_for("run-9"), TagFilter::new("ci_workflow_id", "run-9"));
        assert_eq!(p.manager_workflow_id("run-9"), "aws-run-9");
        assert_eq!(p.platform_kind(), PlatformKind::Aws);
    }

    #[tokio::test]
    async fn test_manager_exists_and_ip() {
        let p = platform(vec![
            instance("i-w1", "run-1", InstanceState::Running),
            manager("i-m", "run-1", Some("198.51.100.1")),
            manager("i-other", "run-2", Some("198.51.100.2")),
        ]);

        assert!(p.manager_exists("run-1").await.unwrap());
        assert_eq!(p.manager_ip("run-1").await.unwrap(), "198.51.100.1");
        assert_eq!(
            p.manager_hostname("run-1", "centos").await.unwrap(),
            "centos@198.51.100.1"
        );
    }

    #[tokio::test]
    async fn test_unknown_tag_has_no_manager() {
        let p = platform(vec![manager("i-m", "run-1", Some("198.51.100.1"))]);

        assert!(!p.manager_exists("nope").await.unwrap());
        assert!(matches!(
            p.manager_ip("nope").await,
            Err(CloudError::ManagerNotFound(_))
        ));
        assert!(matches!(
            p.manager_metadata("nope").await,
            Err(CloudError::ManagerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_terminated_manager_is_ignored() {
        let mut old = manager("i-old", "run-1", None);
        old.state = InstanceState::Terminated;
        let p = platform(vec![old]);

        assert!(!p.manager_exists("run-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_two_managers_violate_invariant() {
        let p = platform(vec![
            manager("i-m1", "run-1", Some("198.51.100.1")),
            manager("i-m2", "run-1", Some("198.51.100.2")),
        ]);
        assert!(matches!(
            p.manager_exists("run-1").await,
            Err(CloudError::MultipleManagers { count: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_all_ci_instances_matches_any_workflow_in_any_state() {
        let p = platform(vec![
            instance("i-1", "run-1", InstanceState::Running),
            instance("i-2", "run-2", InstanceState::Terminated),
            Instance::new("i-untagged", InstanceState::Running),
        ]);

        let ids: Vec<_> = p
            .all_ci_instances()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["i-1", "i-2"]);

        let describes = p.ec2.describes.lock().unwrap();
        assert_eq!(describes[0], vec![Ec2Filter::new("tag:ci_workflow_id", &["*"])]);
    }

    #[tokio::test]
    async fn test_stop_orders_manager_last_after_deregistration() {
        let p = platform(vec![
            manager("i-m", "run-1", Some("198.51.100.1")),
            instance("i-a", "run-1", InstanceState::Running),
            instance("i-b", "run-1", InstanceState::Running),
            instance("i-c", "run-1", InstanceState::Stopped),
        ]);

        p.change_state("tok", "run-1", "stop", false).await.unwrap();

        let ids: Vec<String> = ["i-a", "i-b", "i-c", "i-m"].iter().map(|s| s.to_string()).collect();
        assert_eq!(p.ec2.transitions(), vec![Call::Stop(ids, false)]);

        let calls = p.ec2.calls.lock().unwrap().clone();
        let dereg = calls.iter().position(|c| c == "deregister:tok:aws-run-1").unwrap();
        let stop = calls.iter().position(|c| c == "stop").unwrap();
        assert!(dereg < stop);
    }

    #[tokio::test]
    async fn test_terminate_dry_run_skips_deregistration() {
        let p = platform(vec![
            manager("i-m", "run-1", Some("198.51.100.1")),
            instance("i-a", "run-1", InstanceState::Running),
        ]);

        p.change_state("tok", "run-1", "terminate", true).await.unwrap();

        assert_eq!(
            p.ec2.transitions(),
            vec![Call::Terminate(vec!["i-a".into(), "i-m".into()], true)]
        );
        assert!(!p.ec2.calls.lock().unwrap().iter().any(|c| c.starts_with("deregister")));
    }

    #[tokio::test]
    async fn test_start_waits_for_manager_without_deregistering() {
        let mut m = manager("i-m", "run-1", None);
        m.state = InstanceState::Stopped;
        let p = platform(vec![m, instance("i-a", "run-1", InstanceState::Stopped)]);

        p.change_state("tok", "run-1", "start", false).await.unwrap();

        assert_eq!(
            p.ec2.transitions(),
            vec![Call::Start(vec!["i-a".into(), "i-m".into()], false)]
        );
        assert!(!p.ec2.calls.lock().unwrap().iter().any(|c| c.starts_with("deregister")));
        assert!(p.manager_metadata("run-1").await.unwrap().contains("Instance IP: 203.0.113.10"));
    }

    #[tokio::test]
    async fn test_invalid_transition() {
        let p = platform(vec![instance("i-a", "run-1", InstanceState::Running)]);
        let err = p.change_state("tok", "run-1", "pause", false).await.unwrap_err();

        assert!(matches!(err, CloudError::InvalidArgument(_)));
        assert!(p.ec2.transitions().is_empty());
    }

    #[tokio::test]
    async fn test_no_instances() {
        let p = platform(vec![]);
        assert!(matches!(
            p.terminate_instances("tok", "run-1").await,
            Err(CloudError::NoInstances(_))
        ));
    }

    #[test]
    fn test_instance_metadata() {
        let md = instance_metadata(&manager("i-m", "run-1", Some("198.51.100.1")));
        assert_eq!(
            md,
            "    Instance ID: i-m\n    Instance State: running\n    Instance IP: 198.51.100.1"
        );

        let no_ip = instance_metadata(&instance("i-a", "run-1", InstanceState::Stopped));
        assert!(!no_ip.contains("Instance IP"));
    }
}
