//! # etcd cluster migrator
//!
//! Grows the single-member etcd cluster behind a Kubernetes control plane
//! into a three-member cluster, one master node at a time.
//!
//! A run reads the live member count, derives the remaining actions from it
//! and executes them in order:
//!
//! | members | actions |
//! |---------|---------|
//! | 3 | none |
//! | 2 | join master 3 |
//! | 1 | fix the first peer URL, join master 2, await the control plane, join master 3 |
//!
//! Joining a master rewrites its etcd unit and wipes its data directory
//! through a privileged Job pinned to that node, then registers the new
//! member with etcd. Nothing is persisted between runs; an interrupted
//! migration continues on the next run.

pub mod config;
pub mod convergence;
pub mod error;
pub mod host;
pub mod inventory;
#[cfg(any(test, feature = "testing"))]
pub mod mocks;
pub mod node_directory;
pub mod planner;
pub mod project;
pub mod remote_run;
pub mod retry;

pub use config::MigratorConfig;
pub use error::{MigrationError, MigrationResult};
pub use host::HostLayout;
pub use inventory::{KubeNodeInventory, NodeInventory, NodeRecord};
pub use node_directory::{MasterNodes, NodeDirectory, NodeIdentity};
pub use planner::{Action, ClusterPhase, MigrationReport, Migrator};
pub use remote_run::{
    CommandBatch, HostCommandRunner, JobCommandRunner, KubeRunApi, RemoteRunConfig,
};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
