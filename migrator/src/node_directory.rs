use crate::error::{MigrationError, MigrationResult};
use crate::inventory::{NodeInventory, NodeRecord};
use crate::retry::{retry, Attempt, RetryPolicy, Sleeper};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Number of master nodes in the target layout
pub const MASTER_NODE_COUNT: usize = 3;

/// Label carrying the master ordinal (1, 2 or 3) on each master node
pub const DEFAULT_MASTER_ID_LABEL: &str = "giantswarm.io/master-id";

/// A master node and its fixed position in the three-node layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub ordinal: u32,
    pub hostname: String,
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (master {})", self.hostname, self.ordinal)
    }
}

/// The three master nodes, ordered by ordinal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterNodes([NodeIdentity; MASTER_NODE_COUNT]);

impl MasterNodes {
    /// Node with the given ordinal, if it is one of 1, 2 or 3
    pub fn get(&self, ordinal: u32) -> Option<&NodeIdentity> {
        let index = usize::try_from(ordinal).ok()?.checked_sub(1)?;
        self.0.get(index)
    }

    pub fn hostnames(&self) -> Vec<&str> {
        self.0.iter().map(|n| n.hostname.as_str()).collect()
    }
}

/// Order exactly three node records by their ordinal label.
///
/// Every node must carry the label with a value in {1, 2, 3} and no value may
/// repeat. Listing order is irrelevant.
pub fn order_by_ordinal(
    records: &[NodeRecord],
    ordinal_label: &str,
) -> MigrationResult<MasterNodes> {
    if records.len() != MASTER_NODE_COUNT {
        return Err(MigrationError::configuration(format!(
            "expected {} master nodes, got {}",
            MASTER_NODE_COUNT,
            records.len()
        )));
    }

    let mut slots: [Option<NodeIdentity>; MASTER_NODE_COUNT] = Default::default();

    for record in records {
        let raw = record.labels.get(ordinal_label).ok_or_else(|| {
            MigrationError::invalid_ordinal(
                &record.name,
                format!("missing label {}", ordinal_label),
            )
        })?;

        let ordinal: u32 = raw.trim().parse().map_err(|_| {
            MigrationError::invalid_ordinal(
                &record.name,
                format!("{}={:?} is not a number", ordinal_label, raw),
            )
        })?;

        if !(1..=MASTER_NODE_COUNT as u32).contains(&ordinal) {
            return Err(MigrationError::invalid_ordinal(
                &record.name,
                format!("{}={} is outside 1..={}", ordinal_label, ordinal, MASTER_NODE_COUNT),
            ));
        }

        let slot = &mut slots[(ordinal - 1) as usize];
        if let Some(existing) = slot {
            return Err(MigrationError::invalid_ordinal(
                &record.name,
                format!(
                    "{}={} is already used by {}",
                    ordinal_label, ordinal, existing.hostname
                ),
            ));
        }

        *slot = Some(NodeIdentity {
            ordinal,
            hostname: record.name.clone(),
        });
    }

    // Three distinct ordinals in 1..=3 fill every slot.
    let [first, second, third] = slots;
    match (first, second, third) {
        (Some(a), Some(b), Some(c)) => Ok(MasterNodes([a, b, c])),
        _ => Err(MigrationError::configuration(
            "master ordinals do not cover 1, 2 and 3",
        )),
    }
}

/// Resolves the master nodes from the cluster inventory
pub struct NodeDirectory {
    inventory: Arc<dyn NodeInventory>,
    sleeper: Arc<dyn Sleeper>,
    ordinal_label: String,
    policy: RetryPolicy,
}

impl NodeDirectory {
    pub fn new(
        inventory: Arc<dyn NodeInventory>,
        sleeper: Arc<dyn Sleeper>,
        ordinal_label: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            inventory,
            sleeper,
            ordinal_label: ordinal_label.into(),
            policy,
        }
    }

    /// Wait until exactly three nodes match `label_selector`, then order them
    /// by ordinal. API errors and ordinal validation failures are fatal; only
    /// a wrong node count is retried.
    pub async fn resolve_master_nodes(&self, label_selector: &str) -> MigrationResult<MasterNodes> {
        let inventory = &self.inventory;

        let records = retry(
            &self.policy,
            self.sleeper.as_ref(),
            "master node discovery",
            move |_| async move {
                let records = inventory.list_nodes(Some(label_selector)).await?;
                if records.len() == MASTER_NODE_COUNT {
                    Ok(Attempt::Done(records))
                } else {
                    Ok(Attempt::Retry(format!(
                        "found {} master nodes matching {:?}, expected {}",
                        records.len(),
                        label_selector,
                        MASTER_NODE_COUNT
                    )))
                }
            },
        )
        .await?;

        let nodes = order_by_ordinal(&records, &self.ordinal_label)?;
        info!(
            "Found {} master nodes: {}",
            MASTER_NODE_COUNT,
            nodes.hostnames().join(", ")
        );
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockNodeInventory, RecordingSleeper, Timeline};
    use std::time::Duration;

    fn master(name: &str, id: &str) -> NodeRecord {
        NodeRecord::new(name).with_label(DEFAULT_MASTER_ID_LABEL, id)
    }

    #[test]
    fn test_order_is_independent_of_listing_order() {
        let permutations = [
            ["1", "2", "3"],
            ["1", "3", "2"],
            ["2", "1", "3"],
            ["2", "3", "1"],
            ["3", "1", "2"],
            ["3", "2", "1"],
        ];

        for ids in permutations {
            let records: Vec<NodeRecord> = ids
                .iter()
                .map(|id| master(&format!("node-{}", id), id))
                .collect();

            let nodes = order_by_ordinal(&records, DEFAULT_MASTER_ID_LABEL).unwrap();
            assert_eq!(nodes.hostnames(), vec!["node-1", "node-2", "node-3"], "{:?}", ids);
            assert_eq!(nodes.get(2).unwrap().ordinal, 2);
        }
    }

    #[test]
    fn test_missing_label_is_rejected() {
        let records = vec![
            master("a", "1"),
            NodeRecord::new("b").with_label("role", "master"),
            master("c", "3"),
        ];

        let err = order_by_ordinal(&records, DEFAULT_MASTER_ID_LABEL).unwrap_err();
        match err {
            MigrationError::InvalidNodeOrdinal { node, reason } => {
                assert_eq!(node, "b");
                assert!(reason.contains("missing label"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_numeric_out_of_range_and_duplicate_ordinals() {
        let non_numeric = vec![master("a", "1"), master("b", "two"), master("c", "3")];
        let out_of_range = vec![master("a", "1"), master("b", "2"), master("c", "4")];
        let zero = vec![master("a", "0"), master("b", "2"), master("c", "3")];
        let duplicate = vec![master("a", "1"), master("b", "1"), master("c", "3")];

        for records in [non_numeric, out_of_range, zero, duplicate] {
            let err = order_by_ordinal(&records, DEFAULT_MASTER_ID_LABEL).unwrap_err();
            assert!(
                matches!(err, MigrationError::InvalidNodeOrdinal { .. }),
                "{:?}",
                records
            );
        }
    }

    #[test]
    fn test_get_rejects_ordinals_outside_layout() {
        let records = vec![master("a", "1"), master("b", "2"), master("c", "3")];
        let nodes = order_by_ordinal(&records, DEFAULT_MASTER_ID_LABEL).unwrap();

        assert!(nodes.get(0).is_none());
        assert!(nodes.get(4).is_none());
        assert_eq!(nodes.get(3).unwrap().hostname, "c");
    }

    #[tokio::test]
    async fn test_resolve_waits_for_third_master() {
        let timeline = Timeline::new();
        let inventory = MockNodeInventory::new(
            timeline.clone(),
            vec![master("m3", "3"), master("m1", "1"), master("m2", "2")],
        );
        inventory.hide_last_master_for(2).await;

        let sleeper = RecordingSleeper::new(timeline.clone());
        let directory = NodeDirectory::new(
            Arc::new(inventory.clone()),
            Arc::new(sleeper.clone()),
            DEFAULT_MASTER_ID_LABEL,
            RetryPolicy::new(5, Duration::from_secs(10)),
        );

        let nodes = directory.resolve_master_nodes("role=master").await.unwrap();

        assert_eq!(nodes.hostnames(), vec!["m1", "m2", "m3"]);
        assert_eq!(inventory.selector_lists().await, 3);
        assert_eq!(sleeper.slept().await.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_fails_fast_on_duplicate_ordinal() {
        let timeline = Timeline::new();
        let inventory = MockNodeInventory::new(
            timeline.clone(),
            vec![master("m1", "1"), master("m2", "1"), master("m3", "3")],
        );
        let sleeper = RecordingSleeper::new(timeline.clone());
        let directory = NodeDirectory::new(
            Arc::new(inventory.clone()),
            Arc::new(sleeper.clone()),
            DEFAULT_MASTER_ID_LABEL,
            RetryPolicy::new(5, Duration::from_secs(10)),
        );

        let err = directory.resolve_master_nodes("role=master").await.unwrap_err();

        match err {
            MigrationError::InvalidNodeOrdinal { node, reason } => {
                assert_eq!(node, "m2");
                assert!(reason.contains("already used by m1"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(inventory.selector_lists().await, 1);
        assert!(sleeper.slept().await.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_gives_up_after_policy() {
        let timeline = Timeline::new();
        let inventory = MockNodeInventory::new(
            timeline.clone(),
            vec![master("m1", "1"), master("m2", "2"), master("m3", "3")],
        );
        inventory.hide_last_master_for(10).await;

        let directory = NodeDirectory::new(
            Arc::new(inventory),
            Arc::new(RecordingSleeper::new(timeline)),
            DEFAULT_MASTER_ID_LABEL,
            RetryPolicy::new(3, Duration::from_secs(10)),
        );

        let err = directory.resolve_master_nodes("role=master").await.unwrap_err();
        assert!(matches!(err, MigrationError::Unavailable { attempts: 3, .. }));
    }
}
