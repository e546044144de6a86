use crate::error::{MigrationError, MigrationResult};
use crate::host::HostLayout;
use crate::node_directory::DEFAULT_MASTER_ID_LABEL;
use crate::retry::RetryPolicy;
use std::time::Duration;

/// Poll the node list every 10s for up to 10 minutes
pub const NODE_FETCH_POLICY: RetryPolicy = RetryPolicy::new(60, Duration::from_secs(10));

/// Give the API server 30s after a member joins, then poll every 5s for up
/// to 5 minutes
pub const CONTROL_PLANE_POLICY: RetryPolicy =
    RetryPolicy::new(60, Duration::from_secs(5)).with_initial_delay(Duration::from_secs(30));

/// Migration settings
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Base domain of the etcd peer names
    pub base_domain: String,
    /// Index of the first etcd member, `etcd{index}.{base_domain}`
    pub etcd_starting_index: u32,
    /// Label selector matching all master nodes
    pub master_node_label: String,
    /// Label carrying each master's ordinal
    pub master_id_label: String,
    pub host: HostLayout,
    pub node_fetch_policy: RetryPolicy,
    pub control_plane_policy: RetryPolicy,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            base_domain: String::new(),
            etcd_starting_index: 1,
            master_node_label: "role=master".to_string(),
            master_id_label: DEFAULT_MASTER_ID_LABEL.to_string(),
            host: HostLayout::default(),
            node_fetch_policy: NODE_FETCH_POLICY,
            control_plane_policy: CONTROL_PLANE_POLICY,
        }
    }
}

impl MigratorConfig {
    pub fn validate(&self) -> MigrationResult<()> {
        if self.base_domain.trim().is_empty() {
            return Err(MigrationError::configuration(
                "MigratorConfig.base_domain must not be empty",
            ));
        }
        if self.master_node_label.trim().is_empty() {
            return Err(MigrationError::configuration(
                "MigratorConfig.master_node_label must not be empty",
            ));
        }
        if self.master_id_label.trim().is_empty() {
            return Err(MigrationError::configuration(
                "MigratorConfig.master_id_label must not be empty",
            ));
        }
        self.host.validate()?;
        self.node_fetch_policy.validate("node fetch")?;
        self.control_plane_policy.validate("control plane")?;
        Ok(())
    }

    /// etcd member index of the master with `ordinal`
    pub fn etcd_index(&self, ordinal: u32) -> u32 {
        self.etcd_starting_index + ordinal - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> MigratorConfig {
        MigratorConfig {
            base_domain: "abcde.k8s.example.io".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_empty_values_are_rejected() {
        let no_domain = MigratorConfig::default();
        assert!(matches!(
            no_domain.validate(),
            Err(MigrationError::Configuration(_))
        ));

        let no_selector = MigratorConfig {
            master_node_label: String::new(),
            ..valid()
        };
        assert!(no_selector.validate().is_err());

        let no_attempts = MigratorConfig {
            control_plane_policy: RetryPolicy::new(0, Duration::from_secs(1)),
            ..valid()
        };
        assert!(no_attempts.validate().is_err());
    }

    #[test]
    fn test_etcd_index_follows_starting_index() {
        let config = valid();
        assert_eq!(config.etcd_index(1), 1);
        assert_eq!(config.etcd_index(3), 3);

        let zero_based = MigratorConfig {
            etcd_starting_index: 0,
            ..valid()
        };
        assert_eq!(zero_based.etcd_index(2), 1);
    }
}
