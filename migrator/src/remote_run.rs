//! Running shell commands on a specific master node.
//!
//! A batch is written into a ConfigMap as a script and executed by a
//! privileged, host-PID Job pinned to the node. Every script line is wrapped
//! in `nsenter` so it acts on the host's own systemd and filesystem rather
//! than on the container.
//!
//! The ConfigMap and Job names are fixed, so only one migration may run
//! against a cluster at a time. The target node appears only in the node
//! selector and an annotation; hostnames may exceed the 63 character limit
//! of names used as label values.

use crate::error::{MigrationError, MigrationResult};
use crate::node_directory::NodeIdentity;
use crate::project;
use crate::retry::{retry, Attempt, RetryPolicy, Sleeper};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, PodSpec, PodTemplateSpec, ResourceRequirements,
    SecurityContext, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Api, DeleteParams, PostParams},
    client::Client,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Enter the mount, UTS, network and IPC namespaces of the host's PID 1
pub const NSENTER_PREFIX: &str = "nsenter -t 1 -m -u -n -i ";

/// Key of the script inside the ConfigMap
pub const SCRIPT_KEY: &str = "command.sh";

/// Annotation on the Job naming the node it runs on
pub const NODE_ANNOTATION: &str = "etcd-cluster-migrator.giantswarm.io/node";

/// Kubernetes limit for label values, which the Job name is used as
const MAX_LABEL_VALUE_LEN: usize = 63;

const SCRIPT_MOUNT_PATH: &str = "/data/";
const SCRIPT_VOLUME: &str = "command-volume";

/// Ordered shell commands for one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    commands: Vec<String>,
}

impl CommandBatch {
    pub fn new(commands: Vec<String>) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Shell script running every command in the host namespaces, stopping
    /// at the first failure
    pub fn script(&self) -> String {
        let mut script = String::from("#!/bin/sh\nset -e\n");
        for command in &self.commands {
            script.push_str(NSENTER_PREFIX);
            script.push_str(command);
            script.push('\n');
        }
        script
    }
}

/// Runs a command batch on a node and waits for it to finish
#[async_trait]
pub trait HostCommandRunner: Send + Sync {
    async fn run_on_host(&self, node: &NodeIdentity, batch: CommandBatch) -> MigrationResult<()>;
}

/// How the command Job is scheduled and observed
#[derive(Debug, Clone)]
pub struct RemoteRunConfig {
    pub namespace: String,
    pub docker_registry: String,
    pub image: String,
    pub config_map_name: String,
    pub job_name: String,
    pub service_account: String,
    pub priority_class: String,
    /// Wall-clock limit for the whole Job, restarts included
    pub active_deadline_secs: i64,
    /// Restarts allowed after the script exits non-zero
    pub backoff_limit: i32,
    pub cpu: String,
    pub memory: String,
    pub poll_policy: RetryPolicy,
}

impl Default for RemoteRunConfig {
    fn default() -> Self {
        Self {
            namespace: "kube-system".to_string(),
            docker_registry: "quay.io".to_string(),
            image: "giantswarm/alpine:3.11.6".to_string(),
            config_map_name: format!("{}-cm", project::NAME),
            job_name: format!("{}-command", project::NAME),
            service_account: format!("{}-job", project::NAME),
            priority_class: "system-cluster-critical".to_string(),
            active_deadline_secs: 60,
            backoff_limit: 1,
            cpu: "50m".to_string(),
            memory: "50Mi".to_string(),
            poll_policy: RetryPolicy::new(36, Duration::from_secs(5)),
        }
    }
}

impl RemoteRunConfig {
    pub fn validate(&self) -> MigrationResult<()> {
        if self.docker_registry.trim().is_empty() {
            return Err(MigrationError::configuration("docker registry must not be empty"));
        }
        if self.namespace.trim().is_empty() {
            return Err(MigrationError::configuration("run namespace must not be empty"));
        }
        for (kind, name) in [("ConfigMap", &self.config_map_name), ("Job", &self.job_name)] {
            if name.is_empty() || name.len() > MAX_LABEL_VALUE_LEN {
                return Err(MigrationError::configuration(format!(
                    "{} name {:?} must be 1 to {} characters",
                    kind, name, MAX_LABEL_VALUE_LEN
                )));
            }
        }
        if self.active_deadline_secs <= 0 {
            return Err(MigrationError::configuration("job deadline must be greater than 0"));
        }
        if self.backoff_limit < 0 {
            return Err(MigrationError::configuration("job backoff limit must not be negative"));
        }
        self.poll_policy.validate("job poll")
    }

    pub fn job_image(&self) -> String {
        format!("{}/{}", self.docker_registry, self.image)
    }
}

fn run_labels(app: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), app.to_string());
    labels.insert("created-by".to_string(), project::NAME.to_string());
    labels
}

/// ConfigMap carrying the batch as an executable script
pub fn build_script_config_map(config: &RemoteRunConfig, batch: &CommandBatch) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert(SCRIPT_KEY.to_string(), batch.script());

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config.config_map_name.clone()),
            namespace: Some(config.namespace.clone()),
            labels: Some(run_labels(&config.config_map_name)),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Privileged host-PID Job that runs the script on `node_name`, even when the
/// node is a cordoned control-plane node
pub fn build_command_job(config: &RemoteRunConfig, node_name: &str) -> Job {
    let job_name = &config.job_name;

    let mut resources = BTreeMap::new();
    resources.insert("cpu".to_string(), Quantity(config.cpu.clone()));
    resources.insert("memory".to_string(), Quantity(config.memory.clone()));

    let mut node_selector = BTreeMap::new();
    node_selector.insert("kubernetes.io/hostname".to_string(), node_name.to_string());

    let tolerations = [
        "node.kubernetes.io/unschedulable",
        "node-role.kubernetes.io/master",
        "node-role.kubernetes.io/control-plane",
    ]
    .iter()
    .map(|key| Toleration {
        key: Some(key.to_string()),
        operator: Some("Exists".to_string()),
        effect: Some("NoSchedule".to_string()),
        ..Default::default()
    })
    .collect();

    let mut annotations = BTreeMap::new();
    annotations.insert(NODE_ANNOTATION.to_string(), node_name.to_string());

    Job {
        metadata: ObjectMeta {
            name: Some(job_name.clone()),
            namespace: Some(config.namespace.clone()),
            labels: Some(run_labels(job_name)),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(JobSpec {
            parallelism: Some(1),
            completions: Some(1),
            backoff_limit: Some(config.backoff_limit),
            active_deadline_seconds: Some(config.active_deadline_secs),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(run_labels(job_name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "run-command".to_string(),
                        image: Some(config.job_image()),
                        command: Some(vec![
                            "/bin/sh".to_string(),
                            format!("{}{}", SCRIPT_MOUNT_PATH, SCRIPT_KEY),
                        ]),
                        resources: Some(ResourceRequirements {
                            limits: Some(resources.clone()),
                            requests: Some(resources),
                            ..Default::default()
                        }),
                        security_context: Some(SecurityContext {
                            privileged: Some(true),
                            ..Default::default()
                        }),
                        volume_mounts: Some(vec![VolumeMount {
                            name: SCRIPT_VOLUME.to_string(),
                            mount_path: SCRIPT_MOUNT_PATH.to_string(),
                            read_only: Some(true),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    host_pid: Some(true),
                    node_selector: Some(node_selector),
                    restart_policy: Some("Never".to_string()),
                    priority_class_name: Some(config.priority_class.clone()),
                    service_account_name: Some(config.service_account.clone()),
                    tolerations: Some(tolerations),
                    volumes: Some(vec![Volume {
                        name: SCRIPT_VOLUME.to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: Some(config.config_map_name.clone()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Terminal state of a command Job as seen from its conditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Running,
    Complete,
    Failed(String),
}

pub fn run_outcome(job: &Job) -> RunOutcome {
    let conditions = job
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref());

    for condition in conditions.into_iter().flatten() {
        if condition.status != "True" {
            continue;
        }
        match condition.type_.as_str() {
            "Complete" => return RunOutcome::Complete,
            "Failed" => {
                let reason = condition
                    .reason
                    .clone()
                    .or_else(|| condition.message.clone())
                    .unwrap_or_else(|| "job failed".to_string());
                return RunOutcome::Failed(reason);
            }
            _ => {}
        }
    }

    RunOutcome::Running
}

/// Kubernetes objects behind a remote run
#[async_trait]
pub trait RunApi: Send + Sync {
    /// Returns false when there was nothing to delete
    async fn delete_config_map(&self, name: &str) -> MigrationResult<bool>;
    async fn create_config_map(&self, config_map: &ConfigMap) -> MigrationResult<()>;
    /// Returns false when there was nothing to delete
    async fn delete_job(&self, name: &str) -> MigrationResult<bool>;
    async fn create_job(&self, job: &Job) -> MigrationResult<()>;
    async fn get_job(&self, name: &str) -> MigrationResult<Job>;
}

/// [`RunApi`] against the Kubernetes API server
#[derive(Clone)]
pub struct KubeRunApi {
    config_maps: Api<ConfigMap>,
    jobs: Api<Job>,
}

impl KubeRunApi {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            config_maps: Api::namespaced(client.clone(), namespace),
            jobs: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl RunApi for KubeRunApi {
    async fn delete_config_map(&self, name: &str) -> MigrationResult<bool> {
        match self.config_maps.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(MigrationError::kubernetes(format!("delete ConfigMap {}", name), e)),
        }
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> MigrationResult<()> {
        self.config_maps
            .create(&PostParams::default(), config_map)
            .await
            .map(|_| ())
            .map_err(|e| MigrationError::kubernetes("create ConfigMap", e))
    }

    async fn delete_job(&self, name: &str) -> MigrationResult<bool> {
        // Background propagation also removes the Job's pods.
        match self.jobs.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(MigrationError::kubernetes(format!("delete Job {}", name), e)),
        }
    }

    async fn create_job(&self, job: &Job) -> MigrationResult<()> {
        self.jobs
            .create(&PostParams::default(), job)
            .await
            .map(|_| ())
            .map_err(|e| MigrationError::kubernetes("create Job", e))
    }

    async fn get_job(&self, name: &str) -> MigrationResult<Job> {
        self.jobs
            .get(name)
            .await
            .map_err(|e| MigrationError::kubernetes(format!("get Job {}", name), e))
    }
}

/// [`HostCommandRunner`] that executes batches through a ConfigMap + Job
pub struct JobCommandRunner {
    api: Arc<dyn RunApi>,
    sleeper: Arc<dyn Sleeper>,
    config: RemoteRunConfig,
}

impl JobCommandRunner {
    pub fn new(api: Arc<dyn RunApi>, sleeper: Arc<dyn Sleeper>, config: RemoteRunConfig) -> Self {
        Self {
            api,
            sleeper,
            config,
        }
    }

    async fn submit(&self, node: &NodeIdentity, batch: &CommandBatch) -> MigrationResult<String> {
        let config_map = build_script_config_map(&self.config, batch);
        if self.api.delete_config_map(&self.config.config_map_name).await? {
            debug!("Removed stale ConfigMap {}", self.config.config_map_name);
        }
        self.api.create_config_map(&config_map).await?;

        let job = build_command_job(&self.config, &node.hostname);
        let job_name = &self.config.job_name;
        if self.api.delete_job(job_name).await? {
            debug!("Removed stale Job {}", job_name);
        }
        self.api.create_job(&job).await?;

        Ok(job_name.clone())
    }

    async fn wait_for_completion(
        &self,
        node: &NodeIdentity,
        job_name: &str,
    ) -> MigrationResult<()> {
        let api = &self.api;
        let host = node.hostname.as_str();

        let result = retry(
            &self.config.poll_policy,
            self.sleeper.as_ref(),
            &format!("Job {}", job_name),
            move |_| async move {
                let job = api.get_job(job_name).await?;
                match run_outcome(&job) {
                    RunOutcome::Complete => Ok(Attempt::Done(())),
                    RunOutcome::Running => Ok(Attempt::Retry("not completed yet".to_string())),
                    RunOutcome::Failed(reason) => Err(MigrationError::remote_run(
                        host,
                        format!("Job {} failed: {}", job_name, reason),
                    )),
                }
            },
        )
        .await;

        match result {
            Err(MigrationError::Unavailable { attempts, .. }) => Err(MigrationError::remote_run(
                host,
                format!("Job {} did not complete after {} polls", job_name, attempts),
            )),
            other => other,
        }
    }
}

#[async_trait]
impl HostCommandRunner for JobCommandRunner {
    async fn run_on_host(&self, node: &NodeIdentity, batch: CommandBatch) -> MigrationResult<()> {
        let job_name = self.submit(node, &batch).await?;
        info!(
            "Submitted {} commands to {} as Job {}",
            batch.len(),
            node,
            job_name
        );

        if let Err(e) = self.wait_for_completion(node, &job_name).await {
            // Left in place for inspection, the next run replaces it.
            warn!("Job {} on {} did not complete", job_name, node);
            return Err(e);
        }

        self.api.delete_job(&job_name).await?;
        self.api.delete_config_map(&self.config.config_map_name).await?;
        info!("Commands completed on {}", node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockRunApi, RecordingSleeper, RunOp, Timeline};

    fn node(hostname: &str, ordinal: u32) -> NodeIdentity {
        NodeIdentity {
            ordinal,
            hostname: hostname.to_string(),
        }
    }

    fn batch() -> CommandBatch {
        CommandBatch::new(vec![
            "systemctl stop etcd3".to_string(),
            "systemctl start etcd3".to_string(),
        ])
    }

    #[test]
    fn test_script_wraps_every_command() {
        let script = batch().script();
        let lines: Vec<&str> = script.lines().collect();

        assert_eq!(lines[0], "#!/bin/sh");
        assert_eq!(lines[1], "set -e");
        assert_eq!(lines[2], "nsenter -t 1 -m -u -n -i systemctl stop etcd3");
        assert_eq!(lines[3], "nsenter -t 1 -m -u -n -i systemctl start etcd3");
    }

    #[test]
    fn test_job_is_pinned_privileged_and_bounded() {
        let config = RemoteRunConfig::default();
        let job = build_command_job(&config, "master-2");

        assert_eq!(
            job.metadata.name.as_deref(),
            Some("etcd-cluster-migrator-command")
        );
        assert_eq!(
            job.metadata.annotations.as_ref().unwrap().get(NODE_ANNOTATION),
            Some(&"master-2".to_string())
        );

        let spec = job.spec.unwrap();
        assert_eq!(spec.active_deadline_seconds, Some(60));
        assert_eq!(spec.backoff_limit, Some(1));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.host_pid, Some(true));
        assert_eq!(
            pod.node_selector.unwrap().get("kubernetes.io/hostname"),
            Some(&"master-2".to_string())
        );
        assert!(pod
            .tolerations
            .unwrap()
            .iter()
            .any(|t| t.key.as_deref() == Some("node.kubernetes.io/unschedulable")));

        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("quay.io/giantswarm/alpine:3.11.6"));
        assert_eq!(
            container.security_context.as_ref().unwrap().privileged,
            Some(true)
        );
    }

    #[test]
    fn test_long_hostname_stays_out_of_names_and_labels() {
        let hostname = "ip-10-1-5-55.eu-central-1.compute.internal";
        let job = build_command_job(&RemoteRunConfig::default(), hostname);

        let name = job.metadata.name.clone().unwrap();
        assert!(name.len() <= 63, "{}", name);

        let pod_meta = job.spec.as_ref().unwrap().template.metadata.clone().unwrap();
        for labels in [job.metadata.labels.unwrap(), pod_meta.labels.unwrap()] {
            for (key, value) in labels {
                assert!(value.len() <= 63, "{}={}", key, value);
                assert!(!value.contains(hostname));
            }
        }

        let pod = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod.node_selector.unwrap().get("kubernetes.io/hostname"),
            Some(&hostname.to_string())
        );
    }

    #[test]
    fn test_config_rejects_names_unusable_as_label_values() {
        assert!(RemoteRunConfig::default().validate().is_ok());

        let long_job = RemoteRunConfig {
            job_name: "x".repeat(64),
            ..Default::default()
        };
        assert!(matches!(
            long_job.validate(),
            Err(MigrationError::Configuration(_))
        ));

        let no_config_map = RemoteRunConfig {
            config_map_name: String::new(),
            ..Default::default()
        };
        assert!(no_config_map.validate().is_err());
    }

    #[test]
    fn test_config_map_carries_script() {
        let config = RemoteRunConfig::default();
        let cm = build_script_config_map(&config, &batch());

        assert_eq!(cm.metadata.name.as_deref(), Some("etcd-cluster-migrator-cm"));
        assert_eq!(cm.metadata.namespace.as_deref(), Some("kube-system"));
        assert!(cm.data.unwrap()[SCRIPT_KEY].contains("systemctl stop etcd3"));
    }

    #[test]
    fn test_run_outcome_from_conditions() {
        assert_eq!(run_outcome(&Job::default()), RunOutcome::Running);
        assert_eq!(
            run_outcome(&MockRunApi::job_with_condition("Complete", None)),
            RunOutcome::Complete
        );
        assert_eq!(
            run_outcome(&MockRunApi::job_with_condition(
                "Failed",
                Some("DeadlineExceeded")
            )),
            RunOutcome::Failed("DeadlineExceeded".to_string())
        );
    }

    #[tokio::test]
    async fn test_run_deletes_before_create_and_cleans_up() {
        let timeline = Timeline::new();
        let api = MockRunApi::new(timeline.clone());
        api.push_outcomes(vec![RunOutcome::Running, RunOutcome::Complete])
            .await;
        let sleeper = RecordingSleeper::new(timeline.clone());

        let runner = JobCommandRunner::new(
            Arc::new(api.clone()),
            Arc::new(sleeper.clone()),
            RemoteRunConfig::default(),
        );

        runner.run_on_host(&node("master-2", 2), batch()).await.unwrap();

        let job = "etcd-cluster-migrator-command".to_string();
        let cm = "etcd-cluster-migrator-cm".to_string();
        assert_eq!(
            api.ops().await,
            vec![
                RunOp::DeleteConfigMap(cm.clone()),
                RunOp::CreateConfigMap(cm.clone()),
                RunOp::DeleteJob(job.clone()),
                RunOp::CreateJob(job.clone()),
                RunOp::GetJob(job.clone()),
                RunOp::GetJob(job.clone()),
                RunOp::DeleteJob(job),
                RunOp::DeleteConfigMap(cm),
            ]
        );
        assert_eq!(sleeper.slept().await, vec![Duration::from_secs(5)]);
        assert!(api.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_job_is_a_remote_run_error() {
        let timeline = Timeline::new();
        let api = MockRunApi::new(timeline.clone());
        api.push_outcomes(vec![RunOutcome::Failed("BackoffLimitExceeded".to_string())])
            .await;

        let runner = JobCommandRunner::new(
            Arc::new(api.clone()),
            Arc::new(RecordingSleeper::new(timeline)),
            RemoteRunConfig::default(),
        );

        let err = runner
            .run_on_host(&node("master-3", 3), batch())
            .await
            .unwrap_err();

        match err {
            MigrationError::RemoteRun { node, reason } => {
                assert_eq!(node, "master-3");
                assert!(reason.contains("BackoffLimitExceeded"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // the failed Job stays for inspection
        assert!(api.job_exists("etcd-cluster-migrator-command").await);
    }

    #[tokio::test]
    async fn test_job_that_never_completes_times_out() {
        let timeline = Timeline::new();
        let api = MockRunApi::new(timeline.clone());
        api.push_outcomes(vec![RunOutcome::Running; 10]).await;

        let config = RemoteRunConfig {
            poll_policy: RetryPolicy::new(3, Duration::from_secs(5)),
            ..Default::default()
        };
        let runner = JobCommandRunner::new(
            Arc::new(api),
            Arc::new(RecordingSleeper::new(timeline)),
            config,
        );

        let err = runner
            .run_on_host(&node("master-2", 2), batch())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not complete after 3 polls"));
    }
}
