//! In-memory membership client for tests

use crate::client::{EtcdMember, MembershipClient};
use crate::{EtcdError, EtcdResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A membership call observed by [`MockMembershipClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipCall {
    List,
    Add { peer_urls: Vec<String> },
    Update { id: u64, peer_urls: Vec<String> },
}

impl MembershipCall {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, MembershipCall::List)
    }
}

/// Mock membership client that keeps members in memory and records calls
#[derive(Clone, Default)]
pub struct MockMembershipClient {
    members: Arc<RwLock<Vec<EtcdMember>>>,
    calls: Arc<RwLock<Vec<MembershipCall>>>,
    fail_add: Arc<RwLock<bool>>,
    next_id: Arc<RwLock<u64>>,
}

impl MockMembershipClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `count` members, the first one carrying `first_peer_url`
    pub fn with_members(count: usize, first_peer_url: &str) -> Self {
        let members = (0..count)
            .map(|i| EtcdMember {
                id: 100 + i as u64,
                name: format!("etcd{}", i + 1),
                peer_urls: if i == 0 {
                    vec![first_peer_url.to_string()]
                } else {
                    vec![format!("https://existing-{}:2380", i)]
                },
            })
            .collect();

        Self {
            members: Arc::new(RwLock::new(members)),
            next_id: Arc::new(RwLock::new(100 + count as u64)),
            ..Default::default()
        }
    }

    /// Make every subsequent `add_member` fail
    pub async fn fail_add_member(&self) {
        *self.fail_add.write().await = true;
    }

    pub async fn members(&self) -> Vec<EtcdMember> {
        self.members.read().await.clone()
    }

    pub async fn mutating_calls(&self) -> Vec<MembershipCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MembershipClient for MockMembershipClient {
    async fn list_members(&self) -> EtcdResult<Vec<EtcdMember>> {
        self.calls.write().await.push(MembershipCall::List);
        Ok(self.members.read().await.clone())
    }

    async fn add_member(&self, peer_urls: Vec<String>) -> EtcdResult<EtcdMember> {
        self.calls.write().await.push(MembershipCall::Add {
            peer_urls: peer_urls.clone(),
        });

        if *self.fail_add.read().await {
            return Err(EtcdError::membership("MemberAdd", "injected failure"));
        }

        let mut members = self.members.write().await;
        if members.iter().any(|m| m.peer_urls == peer_urls) {
            return Err(EtcdError::membership("MemberAdd", "peer URL exists"));
        }

        let mut next_id = self.next_id.write().await;
        let member = EtcdMember {
            id: *next_id,
            name: String::new(),
            peer_urls,
        };
        *next_id += 1;
        members.push(member.clone());
        Ok(member)
    }

    async fn update_member(&self, id: u64, peer_urls: Vec<String>) -> EtcdResult<EtcdMember> {
        self.calls.write().await.push(MembershipCall::Update {
            id,
            peer_urls: peer_urls.clone(),
        });

        let mut members = self.members.write().await;
        let member = members
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| EtcdError::membership("MemberUpdate", "member not found"))?;
        member.peer_urls = peer_urls;
        Ok(member.clone())
    }
}
