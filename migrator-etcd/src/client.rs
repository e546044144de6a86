use crate::{config::EtcdConfig, EtcdError, EtcdResult};
use async_trait::async_trait;
use etcd_client::{Certificate, Client, ConnectOptions, Identity, Member, TlsOptions};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// A registered etcd cluster member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdMember {
    pub id: u64,
    /// Empty until the member has started and announced itself
    pub name: String,
    pub peer_urls: Vec<String>,
}

impl From<&Member> for EtcdMember {
    fn from(member: &Member) -> Self {
        Self {
            id: member.id(),
            name: member.name().to_string(),
            peer_urls: member.peer_urls().to_vec(),
        }
    }
}

/// Cluster membership operations.
///
/// Calls are never retried here; a blind retry of `add_member` could
/// register the same peer twice.
#[async_trait]
pub trait MembershipClient: Send + Sync {
    async fn list_members(&self) -> EtcdResult<Vec<EtcdMember>>;
    async fn add_member(&self, peer_urls: Vec<String>) -> EtcdResult<EtcdMember>;
    async fn update_member(&self, id: u64, peer_urls: Vec<String>) -> EtcdResult<EtcdMember>;
}

/// Membership client backed by a mutually authenticated etcd connection
#[derive(Clone)]
pub struct EtcdMembershipClient {
    inner: Client,
    request_timeout: Duration,
}

impl EtcdMembershipClient {
    /// Load the TLS material and connect to the configured endpoint
    pub async fn connect(config: &EtcdConfig) -> EtcdResult<Self> {
        config.validate()?;

        let ca = read_pem(&config.tls.ca_file).await?;
        let cert = read_pem(&config.tls.cert_file).await?;
        let key = read_pem(&config.tls.key_file).await?;

        let mut tls = TlsOptions::new()
            .ca_certificate(Certificate::from_pem(ca))
            .identity(Identity::from_pem(cert, key));
        if let Some(server_name) = &config.tls.server_name {
            tls = tls.domain_name(server_name.clone());
        }

        let options = ConnectOptions::new()
            .with_connect_timeout(config.connection.connect_timeout)
            .with_timeout(config.connection.request_timeout)
            .with_tls(tls);

        info!(
            "Connecting to etcd at {} (request timeout {:?})",
            config.connection.endpoint, config.connection.request_timeout
        );

        let inner = Client::connect([config.connection.endpoint.as_str()], Some(options))
            .await
            .map_err(|e| {
                EtcdError::connection(format!("{}: {}", config.connection.endpoint, e))
            })?;

        Ok(Self {
            inner,
            request_timeout: config.connection.request_timeout,
        })
    }

    async fn bounded<T, F>(&self, operation: &str, call: F) -> EtcdResult<T>
    where
        F: Future<Output = Result<T, etcd_client::Error>>,
    {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(EtcdError::membership(operation, e.to_string())),
            Err(_) => Err(EtcdError::timeout(operation)),
        }
    }
}

#[async_trait]
impl MembershipClient for EtcdMembershipClient {
    async fn list_members(&self) -> EtcdResult<Vec<EtcdMember>> {
        let mut client = self.inner.clone();
        let response = self.bounded("MemberList", client.member_list()).await?;

        let members: Vec<EtcdMember> = response.members().iter().map(EtcdMember::from).collect();
        debug!("MemberList returned {} members", members.len());
        Ok(members)
    }

    async fn add_member(&self, peer_urls: Vec<String>) -> EtcdResult<EtcdMember> {
        let mut client = self.inner.clone();
        let response = self
            .bounded("MemberAdd", client.member_add(peer_urls.clone(), None))
            .await?;

        response.member().map(EtcdMember::from).ok_or_else(|| {
            EtcdError::membership(
                "MemberAdd",
                format!("no member returned for {:?}", peer_urls),
            )
        })
    }

    async fn update_member(&self, id: u64, peer_urls: Vec<String>) -> EtcdResult<EtcdMember> {
        let mut client = self.inner.clone();
        let response = self
            .bounded("MemberUpdate", client.member_update(id, peer_urls.clone()))
            .await?;

        // The response carries the full member list, not just the updated one.
        let member = response
            .members()
            .iter()
            .find(|m| m.id() == id)
            .map(EtcdMember::from)
            .unwrap_or(EtcdMember {
                id,
                name: String::new(),
                peer_urls,
            });

        Ok(member)
    }
}

async fn read_pem(path: &Path) -> EtcdResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| EtcdError::tls(path.display().to_string(), e.to_string()))
}
