//! # Migrator etcd
//!
//! etcd integration for the cluster migrator: a typed, mutually
//! authenticated wrapper over the etcd membership API and the naming
//! contract that ties member indexes to peer URLs.
//!
//! ## Example
//!
//! ```rust,no_run
//! use migrator_etcd::{EtcdConfigBuilder, EtcdMembershipClient, MembershipClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EtcdConfigBuilder::new()
//!         .endpoint("127.0.0.1:2379")
//!         .build()?;
//!     let client = EtcdMembershipClient::connect(&config).await?;
//!
//!     for member in client.list_members().await? {
//!         println!("{} {:?}", member.id, member.peer_urls);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod naming;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{EtcdMember, EtcdMembershipClient, MembershipClient};
pub use config::{ConnectionConfig, EtcdConfig, EtcdConfigBuilder, TlsConfig};
pub use error::{EtcdError, EtcdResult};
pub use naming::{initial_cluster, member_name, peer_url};
