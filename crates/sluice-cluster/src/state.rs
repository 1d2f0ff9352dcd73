//! Cluster view: live membership and the topology generation.
//!
//! [`ClusterView`] is the shared, read-mostly data structure that tracks who
//! is in the cluster, which namespaces each node serves, and the current
//! [`ClusterGeneration`]. Every membership change bumps the generation and
//! publishes it on a watch channel.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use sluice_types::{ClusterGeneration, NodeId};
use tokio::sync::{RwLock, broadcast, watch};
use tracing::info;

use crate::topology::TopologyWatch;

/// Membership state of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    /// Node is responsive and serving queries.
    Alive,
    /// Node has been declared unreachable.
    Dead,
}

/// A member of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Unique identifier for this node.
    pub node_id: NodeId,
    /// Namespaces this node holds partitions for.
    pub namespaces: BTreeSet<String>,
    /// Current membership state.
    pub state: MemberState,
}

impl Member {
    /// An alive member serving the given namespaces.
    pub fn alive(node_id: NodeId, namespaces: &[&str]) -> Self {
        Self {
            node_id,
            namespaces: namespaces.iter().map(|n| n.to_string()).collect(),
            state: MemberState::Alive,
        }
    }
}

/// Membership changes broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// A node joined (or rejoined) the cluster.
    NodeJoined(NodeId),
    /// A node left gracefully.
    NodeLeft(NodeId),
    /// A node was declared dead.
    NodeDead(NodeId),
    /// Partitions started moving between nodes.
    MigrationStarted,
}

/// Shared cluster view maintained by whatever tracks membership.
pub struct ClusterView {
    /// Current cluster members, ordered by node ID.
    members: RwLock<BTreeMap<NodeId, Member>>,
    /// Publishes the generation after every topology change.
    generation_tx: watch::Sender<ClusterGeneration>,
    /// Broadcast channel for membership events.
    event_tx: broadcast::Sender<ClusterEvent>,
}

impl ClusterView {
    /// Create an empty cluster view at [`ClusterGeneration::INITIAL`].
    pub fn new() -> Arc<Self> {
        let (generation_tx, _) = watch::channel(ClusterGeneration::INITIAL);
        let (event_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            members: RwLock::new(BTreeMap::new()),
            generation_tx,
            event_tx,
        })
    }

    /// Subscribe to membership events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClusterEvent> {
        self.event_tx.subscribe()
    }

    /// Return the current generation without going through the trait.
    pub fn generation(&self) -> ClusterGeneration {
        *self.generation_tx.borrow()
    }

    /// Add or update a member and bump the generation.
    pub async fn add_member(&self, member: Member) {
        let node_id = member.node_id;
        {
            let mut members = self.members.write().await;
            members.insert(node_id, member);
        }
        let generation = self.advance();
        info!(%node_id, %generation, "member joined cluster");
        let _ = self.event_tx.send(ClusterEvent::NodeJoined(node_id));
    }

    /// Remove a member (graceful departure) and bump the generation.
    pub async fn remove_member(&self, node_id: &NodeId) {
        let removed = self.members.write().await.remove(node_id).is_some();
        if !removed {
            return;
        }
        let generation = self.advance();
        info!(%node_id, %generation, "member left cluster");
        let _ = self.event_tx.send(ClusterEvent::NodeLeft(*node_id));
    }

    /// Mark a member as dead and bump the generation.
    pub async fn mark_dead(&self, node_id: &NodeId) {
        {
            let mut members = self.members.write().await;
            match members.get_mut(node_id) {
                Some(member) if member.state != MemberState::Dead => {
                    member.state = MemberState::Dead;
                }
                _ => return,
            }
        }
        let generation = self.advance();
        info!(%node_id, %generation, "member declared dead");
        let _ = self.event_tx.send(ClusterEvent::NodeDead(*node_id));
    }

    /// Record a partition migration, which changes the topology without a
    /// membership change.
    pub fn begin_migration(&self) {
        let generation = self.advance();
        info!(%generation, "partition migration started");
        let _ = self.event_tx.send(ClusterEvent::MigrationStarted);
    }

    /// Return a snapshot of all current members.
    pub async fn members(&self) -> Vec<Member> {
        self.members.read().await.values().cloned().collect()
    }

    /// Return the number of alive members.
    pub async fn alive_count(&self) -> usize {
        self.members
            .read()
            .await
            .values()
            .filter(|m| m.state == MemberState::Alive)
            .count()
    }

    fn advance(&self) -> ClusterGeneration {
        self.generation_tx.send_modify(|g| *g = g.next());
        *self.generation_tx.borrow()
    }
}

#[async_trait::async_trait]
impl TopologyWatch for ClusterView {
    async fn current_generation(&self) -> ClusterGeneration {
        self.generation()
    }

    async fn nodes_for(&self, namespace: &str) -> Vec<NodeId> {
        self.members
            .read()
            .await
            .values()
            .filter(|m| m.state == MemberState::Alive && m.namespaces.contains(namespace))
            .map(|m| m.node_id)
            .collect()
    }

    fn subscribe(&self) -> watch::Receiver<ClusterGeneration> {
        self.generation_tx.subscribe()
    }
}

impl std::fmt::Debug for ClusterView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterView")
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}
