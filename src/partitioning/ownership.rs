//! Live key ownership tracking.
//!
//! The tracker holds the current hash ring for one node and hands out frozen
//! snapshots of it. Each installed ring bumps a generation counter so two
//! snapshots can be ordered.

use crate::partitioning::hashring::HashRing;
use crate::types::NodeId;
use parking_lot::RwLock;
use std::hash::Hash;
use std::sync::Arc;

/// A frozen ring at one topology generation.
#[derive(Debug, Clone)]
pub struct RingSnapshot {
    /// The ring.
    pub ring: Arc<HashRing>,
    /// Monotonic topology generation.
    pub generation: u64,
}

impl RingSnapshot {
    /// Primary owner of a key in this snapshot.
    pub fn primary<K: Hash + ?Sized>(&self, key: &K) -> Option<NodeId> {
        self.ring.get_primary(key)
    }
}

/// Tracks key ownership for the local node.
pub struct OwnershipTracker {
    /// Current ring and its generation.
    current: RwLock<RingSnapshot>,

    /// This node's ID.
    local_node_id: NodeId,
}

impl OwnershipTracker {
    /// Create a tracker with an empty ring.
    pub fn new(local_node_id: NodeId, num_owners: usize) -> Self {
        Self::with_ring(local_node_id, HashRing::new(num_owners))
    }

    /// Create with an existing hash ring.
    pub fn with_ring(local_node_id: NodeId, ring: HashRing) -> Self {
        Self {
            current: RwLock::new(RingSnapshot {
                ring: Arc::new(ring),
                generation: 0,
            }),
            local_node_id,
        }
    }

    /// Get the local node ID.
    pub fn local_node_id(&self) -> NodeId {
        self.local_node_id
    }

    /// Freeze the current ring.
    pub fn snapshot(&self) -> RingSnapshot {
        self.current.read().clone()
    }

    /// Current topology generation.
    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Install a new ring and return the snapshot it replaced together with
    /// the new one.
    pub fn install(&self, ring: HashRing) -> (RingSnapshot, RingSnapshot) {
        let mut current = self.current.write();
        let new = RingSnapshot {
            ring: Arc::new(ring),
            generation: current.generation + 1,
        };
        let old = std::mem::replace(&mut *current, new.clone());
        (old, new)
    }

    /// Compute the ring for a new member set without installing it.
    pub fn prepare(&self, nodes: &[NodeId]) -> HashRing {
        self.current.read().ring.rebuilt(nodes)
    }

    /// Replace the member set, returning the new snapshot.
    pub fn set_nodes(&self, nodes: &[NodeId]) -> RingSnapshot {
        let ring = self.prepare(nodes);
        self.install(ring).1
    }

    /// Get the number of nodes in the ring.
    pub fn node_count(&self) -> usize {
        self.current.read().ring.node_count()
    }

    /// Get all nodes in the ring.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.current.read().ring.nodes().to_vec()
    }

    /// Check if this node is the primary owner for a key.
    pub fn is_primary<K: Hash + ?Sized>(&self, key: &K) -> bool {
        self.current.read().ring.is_primary(key, self.local_node_id)
    }

    /// Get the primary owner for a key.
    pub fn get_primary<K: Hash + ?Sized>(&self, key: &K) -> Option<NodeId> {
        self.current.read().ring.get_primary(key)
    }

    /// Get all owners for a key.
    pub fn get_owners<K: Hash + ?Sized>(&self, key: &K) -> Vec<NodeId> {
        self.current.read().ring.get_replica_owners(key)
    }
}

impl std::fmt::Debug for OwnershipTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnershipTracker")
            .field("local_node_id", &self.local_node_id)
            .field("node_count", &self.node_count())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ring() {
        let tracker = OwnershipTracker::new(1, 2);
        assert!(tracker.get_primary("key").is_none());
        assert!(!tracker.is_primary("key"));
        assert_eq!(tracker.generation(), 0);
    }

    #[test]
    fn test_single_member_owns_everything() {
        let tracker = OwnershipTracker::new(1, 2);
        tracker.set_nodes(&[1]);

        assert!(tracker.is_primary("key1"));
        assert!(tracker.is_primary(&42u64));
        assert_eq!(tracker.get_owners("key1"), vec![1]);
    }

    #[test]
    fn test_install_bumps_generation() {
        let tracker = OwnershipTracker::new(1, 2);
        let first = tracker.set_nodes(&[1]);
        assert_eq!(first.generation, 1);

        let ring = tracker.prepare(&[1, 2]);
        let (old, new) = tracker.install(ring);
        assert_eq!(old.generation, 1);
        assert_eq!(new.generation, 2);
        assert_eq!(tracker.nodes(), vec![1, 2]);
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let tracker = OwnershipTracker::new(1, 1);
        let before = tracker.set_nodes(&[1]);
        tracker.set_nodes(&[2]);

        assert_eq!(before.primary("key"), Some(1));
        assert_eq!(tracker.get_primary("key"), Some(2));
    }
}
