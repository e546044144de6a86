//! Naming contract shared by etcd membership, the host unit files and the
//! node ordinals.
//!
//! Member `i` is always reachable for peer traffic at
//! `https://etcd{i}.{base_domain}:2380` and is named `etcd{i}` in the
//! `--initial-cluster` list.

/// Port etcd listens on for peer traffic
pub const PEER_PORT: u16 = 2380;

/// Member name for etcd index `index`
pub fn member_name(index: u32) -> String {
    format!("etcd{}", index)
}

/// Peer URL for etcd index `index`
pub fn peer_url(index: u32, base_domain: &str) -> String {
    format!("https://etcd{}.{}:{}", index, base_domain, PEER_PORT)
}

/// `--initial-cluster` value for the first `count` members starting at
/// `start_index`.
pub fn initial_cluster(start_index: u32, base_domain: &str, count: u32) -> String {
    (start_index..start_index + count)
        .map(|i| format!("{}={}", member_name(i), peer_url(i, base_domain)))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_url() {
        assert_eq!(peer_url(1, "x.io"), "https://etcd1.x.io:2380");
        assert_eq!(
            peer_url(3, "clusterID.gigantic.io"),
            "https://etcd3.clusterID.gigantic.io:2380"
        );
    }

    #[test]
    fn test_initial_cluster_two_and_three_members() {
        assert_eq!(
            initial_cluster(1, "x.io", 2),
            "etcd1=https://etcd1.x.io:2380,etcd2=https://etcd2.x.io:2380"
        );
        assert_eq!(
            initial_cluster(1, "x.io", 3),
            "etcd1=https://etcd1.x.io:2380,etcd2=https://etcd2.x.io:2380,etcd3=https://etcd3.x.io:2380"
        );
    }

    #[test]
    fn test_initial_cluster_starting_index_zero() {
        let cases = [
            (
                2,
                "etcd0=https://etcd0.clusterID.gigantic.io:2380,etcd1=https://etcd1.clusterID.gigantic.io:2380",
            ),
            (
                3,
                "etcd0=https://etcd0.clusterID.gigantic.io:2380,etcd1=https://etcd1.clusterID.gigantic.io:2380,etcd2=https://etcd2.clusterID.gigantic.io:2380",
            ),
        ];

        for (count, expected) in cases {
            assert_eq!(initial_cluster(0, "clusterID.gigantic.io", count), expected);
        }
    }

    #[test]
    fn test_initial_cluster_single_member() {
        assert_eq!(initial_cluster(1, "x.io", 1), "etcd1=https://etcd1.x.io:2380");
    }
}
