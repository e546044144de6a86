use crate::error::{MigrationError, MigrationResult};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::{Api, ListParams},
    client::Client,
    ResourceExt,
};
use std::collections::BTreeMap;
use tracing::debug;

/// The parts of a cluster node the migrator cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl NodeRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Read-only view of the cluster node inventory
#[async_trait]
pub trait NodeInventory: Send + Sync {
    /// List nodes, optionally filtered by a label selector
    async fn list_nodes(&self, label_selector: Option<&str>) -> MigrationResult<Vec<NodeRecord>>;
}

/// Node inventory backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeNodeInventory {
    client: Client,
}

impl KubeNodeInventory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeInventory for KubeNodeInventory {
    async fn list_nodes(&self, label_selector: Option<&str>) -> MigrationResult<Vec<NodeRecord>> {
        let nodes: Api<Node> = Api::all(self.client.clone());

        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }

        let list = nodes
            .list(&params)
            .await
            .map_err(|e| MigrationError::kubernetes("list nodes", e))?;

        debug!(
            "Listed {} nodes (selector {:?})",
            list.items.len(),
            label_selector
        );

        Ok(list
            .items
            .iter()
            .map(|node| NodeRecord {
                name: node.name_any(),
                labels: node.labels().clone(),
            })
            .collect())
    }
}
