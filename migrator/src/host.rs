//! Host-level layout of the etcd service on a master node and the command
//! batch that turns it into a joining member.

use crate::error::{MigrationError, MigrationResult};
use crate::remote_run::CommandBatch;

/// Where and how etcd runs on a master node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLayout {
    /// systemd unit name
    pub service: String,
    /// Unit file holding the etcd command line
    pub unit_file: String,
    /// etcd data directory, wiped before the node joins
    pub data_dir: String,
}

impl Default for HostLayout {
    fn default() -> Self {
        Self {
            service: "etcd3".to_string(),
            unit_file: "/etc/systemd/system/etcd3.service".to_string(),
            data_dir: "/var/lib/etcd".to_string(),
        }
    }
}

impl HostLayout {
    pub fn validate(&self) -> MigrationResult<()> {
        if self.service.trim().is_empty() {
            return Err(MigrationError::configuration("etcd service name must not be empty"));
        }
        if !self.unit_file.starts_with('/') {
            return Err(MigrationError::configuration(format!(
                "etcd unit file must be an absolute path, got {:?}",
                self.unit_file
            )));
        }

        // The data directory is removed with rm -rf on the host.
        let data_dir = self.data_dir.trim_end_matches('/');
        if !self.data_dir.starts_with('/') || data_dir.is_empty() {
            return Err(MigrationError::configuration(format!(
                "etcd data dir must be an absolute path below /, got {:?}",
                self.data_dir
            )));
        }

        Ok(())
    }

    /// Commands that restart the local etcd as a fresh member of the cluster
    /// described by `initial_cluster`.
    ///
    /// The unit file is expected to carry `--initial-cluster <value> \` on its
    /// own continuation line.
    pub fn join_batch(&self, initial_cluster: &str) -> CommandBatch {
        CommandBatch::new(vec![
            format!("systemctl stop {}", self.service),
            format!("rm -rf {}", self.data_dir),
            format!(
                "sed -i 's/--initial-cluster-state new/--initial-cluster-state existing/g' {}",
                self.unit_file
            ),
            format!(
                "sed -i 's|--initial-cluster .*\\\\|--initial-cluster {} \\\\|g' {}",
                initial_cluster, self.unit_file
            ),
            "systemctl daemon-reload".to_string(),
            format!("systemctl start {}", self.service),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrator_etcd::initial_cluster;

    #[test]
    fn test_join_batch_shape() {
        let layout = HostLayout::default();

        for count in [2, 3] {
            let expected = initial_cluster(1, "x.io", count);
            let batch = layout.join_batch(&expected);
            let commands = batch.commands();

            assert_eq!(commands.first().unwrap(), "systemctl stop etcd3");
            assert_eq!(commands.last().unwrap(), "systemctl start etcd3");

            let rewrites: Vec<&String> = commands
                .iter()
                .filter(|c| c.contains("--initial-cluster "))
                .collect();
            assert_eq!(rewrites.len(), 1);
            assert!(rewrites[0].contains(&format!("|--initial-cluster {} \\\\|", expected)));
        }
    }

    #[test]
    fn test_join_batch_wipes_data_before_start() {
        let batch = HostLayout::default().join_batch("etcd1=https://etcd1.x.io:2380");
        let commands = batch.commands();

        let stop = commands.iter().position(|c| c.starts_with("systemctl stop")).unwrap();
        let wipe = commands.iter().position(|c| c == "rm -rf /var/lib/etcd").unwrap();
        let start = commands.iter().position(|c| c.starts_with("systemctl start")).unwrap();
        assert!(stop < wipe && wipe < start);
        assert!(commands.iter().any(|c| c.contains("--initial-cluster-state existing")));
    }

    #[test]
    fn test_layout_validation() {
        assert!(HostLayout::default().validate().is_ok());

        let root = HostLayout {
            data_dir: "/".to_string(),
            ..Default::default()
        };
        assert!(root.validate().is_err());

        let relative = HostLayout {
            data_dir: "var/lib/etcd".to_string(),
            ..Default::default()
        };
        assert!(relative.validate().is_err());

        let no_service = HostLayout {
            service: " ".to_string(),
            ..Default::default()
        };
        assert!(no_service.validate().is_err());
    }
}
