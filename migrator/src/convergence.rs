use crate::error::MigrationResult;
use crate::inventory::NodeInventory;
use crate::retry::{retry, Attempt, RetryPolicy, Sleeper};
use std::sync::Arc;
use tracing::info;

/// Waits for the API server to serve reads again after etcd membership
/// changed underneath it
pub struct ConvergenceWaiter {
    inventory: Arc<dyn NodeInventory>,
    sleeper: Arc<dyn Sleeper>,
}

impl ConvergenceWaiter {
    pub fn new(inventory: Arc<dyn NodeInventory>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { inventory, sleeper }
    }

    /// Sleep for the policy's warm-up delay, then list nodes until a list
    /// succeeds. Every list error counts as "not yet".
    pub async fn await_control_plane(&self, policy: &RetryPolicy) -> MigrationResult<()> {
        info!("Waiting for the Kubernetes API to become available again");
        let inventory = &self.inventory;

        retry(
            policy,
            self.sleeper.as_ref(),
            "Kubernetes API",
            move |_| async move {
                match inventory.list_nodes(None).await {
                    Ok(_) => Ok(Attempt::Done(())),
                    Err(e) => Ok(Attempt::Retry(e.to_string())),
                }
            },
        )
        .await?;

        info!("Kubernetes API is available");
        Ok(())
    }
}
