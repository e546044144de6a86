//! In-memory doubles of the migrator's external seams.
//!
//! Every double can share a [`Timeline`] so tests can assert on the order in
//! which the cluster, etcd and the hosts were touched.

use crate::error::{MigrationError, MigrationResult};
use crate::inventory::{NodeInventory, NodeRecord};
use crate::node_directory::NodeIdentity;
use crate::remote_run::{CommandBatch, HostCommandRunner, RunApi, RunOutcome};
use crate::retry::Sleeper;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::ConfigMap;
use migrator_etcd::{EtcdMember, EtcdResult, MembershipClient};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Ordered log of events shared between mocks
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    events: Arc<RwLock<Vec<String>>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, event: impl Into<String>) {
        self.events.write().await.push(event.into());
    }

    pub async fn events(&self) -> Vec<String> {
        self.events.read().await.clone()
    }
}

/// Sleeper that returns immediately and records the requested delays
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    timeline: Timeline,
    slept: Arc<RwLock<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            slept: Arc::default(),
        }
    }

    pub async fn slept(&self) -> Vec<Duration> {
        self.slept.read().await.clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.timeline
            .push(format!("sleep {}s", duration.as_secs()))
            .await;
        self.slept.write().await.push(duration);
    }
}

#[derive(Debug, Default)]
struct InventoryState {
    hide_last_master: u32,
    failing_probes: u32,
    selector_lists: u32,
}

/// Node inventory with a fixed set of master records.
///
/// Selector lists return the master records; unselected lists are the
/// control-plane probes and return the same records.
#[derive(Debug, Clone)]
pub struct MockNodeInventory {
    timeline: Timeline,
    records: Vec<NodeRecord>,
    state: Arc<RwLock<InventoryState>>,
}

impl MockNodeInventory {
    pub fn new(timeline: Timeline, records: Vec<NodeRecord>) -> Self {
        Self {
            timeline,
            records,
            state: Arc::default(),
        }
    }

    /// The next `lists` selector lists omit the last record
    pub async fn hide_last_master_for(&self, lists: u32) {
        self.state.write().await.hide_last_master = lists;
    }

    /// The next `probes` unselected lists fail like an API server without
    /// etcd quorum
    pub async fn fail_probes(&self, probes: u32) {
        self.state.write().await.failing_probes = probes;
    }

    pub async fn selector_lists(&self) -> u32 {
        self.state.read().await.selector_lists
    }
}

#[async_trait]
impl NodeInventory for MockNodeInventory {
    async fn list_nodes(&self, label_selector: Option<&str>) -> MigrationResult<Vec<NodeRecord>> {
        let mut state = self.state.write().await;

        match label_selector {
            Some(selector) => {
                self.timeline.push(format!("list nodes {}", selector)).await;
                state.selector_lists += 1;

                if state.hide_last_master > 0 {
                    state.hide_last_master -= 1;
                    let visible = self.records.len().saturating_sub(1);
                    return Ok(self.records[..visible].to_vec());
                }
                Ok(self.records.clone())
            }
            None => {
                self.timeline.push("list nodes").await;

                if state.failing_probes > 0 {
                    state.failing_probes -= 1;
                    return Err(MigrationError::kubernetes(
                        "list nodes",
                        kube::Error::Api(kube::core::ErrorResponse {
                            status: "Failure".to_string(),
                            message: "etcdserver: request timed out".to_string(),
                            reason: "InternalError".to_string(),
                            code: 500,
                        }),
                    ));
                }
                Ok(self.records.clone())
            }
        }
    }
}

/// A Kubernetes call observed by [`MockRunApi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOp {
    DeleteConfigMap(String),
    CreateConfigMap(String),
    DeleteJob(String),
    CreateJob(String),
    GetJob(String),
}

#[derive(Debug, Default)]
struct RunApiState {
    ops: Vec<RunOp>,
    outcomes: VecDeque<RunOutcome>,
    config_maps: BTreeSet<String>,
    jobs: BTreeSet<String>,
}

/// Run API keeping ConfigMaps and Jobs in memory.
///
/// Each `get_job` reports the next queued outcome; with the queue empty the
/// Job is complete.
#[derive(Debug, Clone)]
pub struct MockRunApi {
    timeline: Timeline,
    state: Arc<RwLock<RunApiState>>,
}

impl MockRunApi {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            state: Arc::default(),
        }
    }

    pub async fn push_outcomes(&self, outcomes: Vec<RunOutcome>) {
        self.state.write().await.outcomes.extend(outcomes);
    }

    pub async fn ops(&self) -> Vec<RunOp> {
        self.state.read().await.ops.clone()
    }

    /// No ConfigMap and no Job left behind
    pub async fn is_empty(&self) -> bool {
        let state = self.state.read().await;
        state.config_maps.is_empty() && state.jobs.is_empty()
    }

    pub async fn job_exists(&self, name: &str) -> bool {
        self.state.read().await.jobs.contains(name)
    }

    /// Job whose status carries a single true condition
    pub fn job_with_condition(type_: &str, reason: Option<&str>) -> Job {
        Job {
            status: Some(JobStatus {
                conditions: Some(vec![JobCondition {
                    type_: type_.to_string(),
                    status: "True".to_string(),
                    reason: reason.map(str::to_string),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn record(&self, op: RunOp) {
        self.timeline.push(format!("{:?}", op)).await;
        self.state.write().await.ops.push(op);
    }
}

#[async_trait]
impl RunApi for MockRunApi {
    async fn delete_config_map(&self, name: &str) -> MigrationResult<bool> {
        self.record(RunOp::DeleteConfigMap(name.to_string())).await;
        Ok(self.state.write().await.config_maps.remove(name))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> MigrationResult<()> {
        let name = config_map.metadata.name.clone().unwrap_or_default();
        self.record(RunOp::CreateConfigMap(name.clone())).await;
        self.state.write().await.config_maps.insert(name);
        Ok(())
    }

    async fn delete_job(&self, name: &str) -> MigrationResult<bool> {
        self.record(RunOp::DeleteJob(name.to_string())).await;
        Ok(self.state.write().await.jobs.remove(name))
    }

    async fn create_job(&self, job: &Job) -> MigrationResult<()> {
        let name = job.metadata.name.clone().unwrap_or_default();
        self.record(RunOp::CreateJob(name.clone())).await;
        self.state.write().await.jobs.insert(name);
        Ok(())
    }

    async fn get_job(&self, name: &str) -> MigrationResult<Job> {
        self.record(RunOp::GetJob(name.to_string())).await;

        let mut state = self.state.write().await;
        if !state.jobs.contains(name) {
            return Err(MigrationError::configuration(format!("Job {} not found", name)));
        }

        let job = match state.outcomes.pop_front().unwrap_or(RunOutcome::Complete) {
            RunOutcome::Running => Job::default(),
            RunOutcome::Complete => Self::job_with_condition("Complete", None),
            RunOutcome::Failed(reason) => Self::job_with_condition("Failed", Some(reason.as_str())),
        };
        Ok(job)
    }
}

/// Host command runner that records every batch instead of running it
#[derive(Debug, Clone, Default)]
pub struct MockCommandRunner {
    timeline: Timeline,
    runs: Arc<RwLock<Vec<(NodeIdentity, CommandBatch)>>>,
    failing_hosts: Arc<RwLock<BTreeSet<String>>>,
}

impl MockCommandRunner {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            ..Default::default()
        }
    }

    /// Make every run on `hostname` fail
    pub async fn fail_on(&self, hostname: &str) {
        self.failing_hosts.write().await.insert(hostname.to_string());
    }

    pub async fn runs(&self) -> Vec<(NodeIdentity, CommandBatch)> {
        self.runs.read().await.clone()
    }
}

#[async_trait]
impl HostCommandRunner for MockCommandRunner {
    async fn run_on_host(&self, node: &NodeIdentity, batch: CommandBatch) -> MigrationResult<()> {
        self.timeline.push(format!("run on {}", node.hostname)).await;
        self.runs.write().await.push((node.clone(), batch));

        if self.failing_hosts.read().await.contains(&node.hostname) {
            return Err(MigrationError::remote_run(&node.hostname, "injected failure"));
        }
        Ok(())
    }
}

/// Membership client decorator that logs calls onto a [`Timeline`]
#[derive(Clone)]
pub struct RecordingMembership {
    timeline: Timeline,
    inner: Arc<dyn MembershipClient>,
}

impl RecordingMembership {
    pub fn new(timeline: Timeline, inner: Arc<dyn MembershipClient>) -> Self {
        Self { timeline, inner }
    }
}

#[async_trait]
impl MembershipClient for RecordingMembership {
    async fn list_members(&self) -> EtcdResult<Vec<EtcdMember>> {
        self.timeline.push("member list").await;
        self.inner.list_members().await
    }

    async fn add_member(&self, peer_urls: Vec<String>) -> EtcdResult<EtcdMember> {
        self.timeline
            .push(format!("member add {}", peer_urls.join(",")))
            .await;
        self.inner.add_member(peer_urls).await
    }

    async fn update_member(&self, id: u64, peer_urls: Vec<String>) -> EtcdResult<EtcdMember> {
        self.timeline
            .push(format!("member update {} {}", id, peer_urls.join(",")))
            .await;
        self.inner.update_member(id, peer_urls).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeline_is_shared_between_clones() {
        let timeline = Timeline::new();
        let sleeper = RecordingSleeper::new(timeline.clone());
        let runner = MockCommandRunner::new(timeline.clone());

        sleeper.sleep(Duration::from_secs(5)).await;
        runner
            .run_on_host(
                &NodeIdentity {
                    ordinal: 2,
                    hostname: "master-2".to_string(),
                },
                CommandBatch::new(vec!["true".to_string()]),
            )
            .await
            .unwrap();

        assert_eq!(timeline.events().await, vec!["sleep 5s", "run on master-2"]);
    }

    #[tokio::test]
    async fn test_get_job_without_create_fails() {
        let api = MockRunApi::new(Timeline::new());
        assert!(api.get_job("missing").await.is_err());
    }
}
