//! Phase detection and the join procedure.
//!
//! The phase is derived from the live etcd member count on every run and
//! nothing is persisted, so an interrupted run resumes by running again.

use crate::config::MigratorConfig;
use crate::convergence::ConvergenceWaiter;
use crate::error::{MigrationError, MigrationResult, StepContext};
use crate::inventory::NodeInventory;
use crate::node_directory::{MasterNodes, NodeDirectory};
use crate::remote_run::HostCommandRunner;
use crate::retry::Sleeper;
use migrator_etcd::{initial_cluster, peer_url, EtcdMember, MembershipClient};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Migration phase implied by the etcd member count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterPhase {
    /// Three members, nothing to do
    Stable,
    /// Two members, the third master still has to join
    NeedsThird,
    /// Single member, masters two and three have to join
    NeedsFirstPair,
}

impl ClusterPhase {
    /// Any count other than 1, 2 or 3 is an inconsistency this tool cannot repair
    pub fn classify(member_count: usize) -> MigrationResult<Self> {
        match member_count {
            3 => Ok(ClusterPhase::Stable),
            2 => Ok(ClusterPhase::NeedsThird),
            1 => Ok(ClusterPhase::NeedsFirstPair),
            member_count => Err(MigrationError::InvariantViolation { member_count }),
        }
    }

    /// Remaining actions, in execution order
    pub fn actions(self) -> Vec<Action> {
        match self {
            ClusterPhase::Stable => vec![],
            ClusterPhase::NeedsThird => vec![Action::JoinNode { ordinal: 3 }],
            ClusterPhase::NeedsFirstPair => vec![
                Action::FixFirstPeerUrl,
                Action::JoinNode { ordinal: 2 },
                Action::AwaitControlPlane,
                Action::JoinNode { ordinal: 3 },
            ],
        }
    }
}

/// One step of a migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Point the sole member's peer URL at its routable name
    FixFirstPeerUrl,
    /// Reconfigure the master with this ordinal and register it as a member
    JoinNode { ordinal: u32 },
    /// Wait for the API server after a membership change
    AwaitControlPlane,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::FixFirstPeerUrl => write!(f, "fix first member peer URL"),
            Action::JoinNode { ordinal } => write!(f, "join master {}", ordinal),
            Action::AwaitControlPlane => write!(f, "await control plane"),
        }
    }
}

/// What a successful run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub phase: ClusterPhase,
    pub executed: Vec<Action>,
    pub members: Vec<EtcdMember>,
}

/// Drives the etcd cluster from one member to three
pub struct Migrator {
    config: MigratorConfig,
    directory: NodeDirectory,
    membership: Arc<dyn MembershipClient>,
    runner: Arc<dyn HostCommandRunner>,
    waiter: ConvergenceWaiter,
}

impl Migrator {
    pub fn new(
        config: MigratorConfig,
        inventory: Arc<dyn NodeInventory>,
        membership: Arc<dyn MembershipClient>,
        runner: Arc<dyn HostCommandRunner>,
        sleeper: Arc<dyn Sleeper>,
    ) -> MigrationResult<Self> {
        config.validate()?;

        let directory = NodeDirectory::new(
            inventory.clone(),
            sleeper.clone(),
            config.master_id_label.clone(),
            config.node_fetch_policy,
        );
        let waiter = ConvergenceWaiter::new(inventory, sleeper);

        Ok(Self {
            config,
            directory,
            membership,
            runner,
            waiter,
        })
    }

    /// Detect the phase and execute every remaining action, stopping at the
    /// first failure
    pub async fn run(&self) -> MigrationResult<MigrationReport> {
        let members = self
            .membership
            .list_members()
            .await
            .step_context(|| "list etcd members".to_string())?;

        let phase = ClusterPhase::classify(members.len())?;
        let actions = phase.actions();
        info!(
            "etcd cluster has {} members, phase {:?}, {} actions remaining",
            members.len(),
            phase,
            actions.len()
        );

        if actions.is_empty() {
            info!("etcd cluster already has 3 members, nothing to do");
            return Ok(MigrationReport {
                phase,
                executed: vec![],
                members,
            });
        }

        let nodes = self
            .directory
            .resolve_master_nodes(&self.config.master_node_label)
            .await
            .step_context(|| "resolve master nodes".to_string())?;

        let mut executed = Vec::with_capacity(actions.len());
        for action in actions {
            info!("Starting: {}", action);
            self.execute(action, &nodes, &members)
                .await
                .step_context(|| action.to_string())?;
            executed.push(action);
        }

        let members = self
            .membership
            .list_members()
            .await
            .step_context(|| "list etcd members".to_string())?;
        info!(
            "etcd cluster migration finished, members: {:?}",
            members
                .iter()
                .map(|m| (m.id, m.peer_urls.join(",")))
                .collect::<Vec<_>>()
        );

        Ok(MigrationReport {
            phase,
            executed,
            members,
        })
    }

    async fn execute(
        &self,
        action: Action,
        nodes: &MasterNodes,
        members: &[EtcdMember],
    ) -> MigrationResult<()> {
        match action {
            Action::FixFirstPeerUrl => self.fix_first_peer_url(members).await,
            Action::JoinNode { ordinal } => self.join_node(nodes, ordinal).await,
            Action::AwaitControlPlane => {
                self.waiter
                    .await_control_plane(&self.config.control_plane_policy)
                    .await
            }
        }
    }

    /// Single-member clusters may have been bootstrapped with a loopback peer
    /// URL; the other members could never reach it.
    async fn fix_first_peer_url(&self, members: &[EtcdMember]) -> MigrationResult<()> {
        let member = match members {
            [member] => member,
            _ => {
                return Err(MigrationError::InvariantViolation {
                    member_count: members.len(),
                })
            }
        };

        let peer_urls = vec![peer_url(
            self.config.etcd_starting_index,
            &self.config.base_domain,
        )];
        self.membership
            .update_member(member.id, peer_urls.clone())
            .await?;

        info!("Updated member {:x} peer URLs to {:?}", member.id, peer_urls);
        Ok(())
    }

    /// Host reconfiguration runs before MemberAdd; the order is kept as is.
    async fn join_node(&self, nodes: &MasterNodes, ordinal: u32) -> MigrationResult<()> {
        let node = nodes.get(ordinal).ok_or_else(|| {
            MigrationError::configuration(format!("no master node with ordinal {}", ordinal))
        })?;

        let cluster = initial_cluster(
            self.config.etcd_starting_index,
            &self.config.base_domain,
            ordinal,
        );
        let batch = self.config.host.join_batch(&cluster);

        self.runner.run_on_host(node, batch).await?;

        let peer_urls = vec![peer_url(
            self.config.etcd_index(ordinal),
            &self.config.base_domain,
        )];
        let member = self.membership.add_member(peer_urls).await?;

        info!(
            "Added member {:x} {:?} for node {}",
            member.id, member.peer_urls, node
        );
        Ok(())
    }
}
