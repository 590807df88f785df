//! Primary owner lookup.

use crate::cluster::group::Group;
use crate::partitioning::OwnershipTracker;
use crate::types::{CacheMode, Node};
use std::hash::Hash;
use std::sync::Arc;
use tracing::warn;

/// Maps a key to the group member currently responsible for it.
///
/// The physical owner comes from the cache's hash ring and is resolved to a
/// logical [`Node`] through the group. An owner the group does not know
/// (a view change still propagating) degrades to the local member.
#[derive(Debug, Clone)]
pub struct PrimaryOwnerLocator {
    mode: CacheMode,
    tracker: Arc<OwnershipTracker>,
    group: Arc<Group>,
}

impl PrimaryOwnerLocator {
    /// Create a locator over a cache's distribution and a group.
    pub fn new(mode: CacheMode, tracker: Arc<OwnershipTracker>, group: Arc<Group>) -> Self {
        Self {
            mode,
            tracker,
            group,
        }
    }

    /// The member owning `key`.
    pub fn locate<K: Hash + ?Sized>(&self, key: &K) -> Node {
        let local = self.group.local_member();
        if !self.mode.is_clustered() {
            return local.clone();
        }

        let Some(owner) = self.tracker.get_primary(key) else {
            return local.clone();
        };

        match self.group.member(owner) {
            Some(node) => node,
            None => {
                warn!(
                    owner,
                    local = local.id,
                    "Primary owner not registered in group, treating key as local"
                );
                local.clone()
            }
        }
    }

    /// Whether the local member owns `key`.
    pub fn is_local<K: Hash + ?Sized>(&self, key: &K) -> bool {
        self.is_local_member(&self.locate(key))
    }

    /// Whether `node` is the local member.
    pub fn is_local_member(&self, node: &Node) -> bool {
        node.id == self.group.local_member().id
    }

    /// The group members are resolved through.
    pub fn group(&self) -> &Arc<Group> {
        &self.group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;

    fn node(id: NodeId) -> Node {
        Node::new(id, format!("node-{}", id), format!("127.0.0.1:{}", 7600 + id).parse().unwrap())
    }

    #[test]
    fn test_local_mode_returns_local() {
        let tracker = Arc::new(OwnershipTracker::new(1, 1));
        tracker.set_nodes(&[2]);
        let group = Group::new("ejb", node(1));
        let locator = PrimaryOwnerLocator::new(CacheMode::Local, tracker, group);

        assert_eq!(locator.locate("B1").id, 1);
    }

    #[test]
    fn test_locates_registered_owner() {
        let tracker = Arc::new(OwnershipTracker::new(1, 1));
        tracker.set_nodes(&[2]);
        let group = Group::new("ejb", node(1));
        group.add_member(node(2)).unwrap();
        let locator = PrimaryOwnerLocator::new(CacheMode::Distributed, tracker, group);

        assert_eq!(locator.locate("B1").name, "node-2");
        assert!(!locator.is_local("B1"));
    }

    #[test]
    fn test_unregistered_owner_falls_back_to_local() {
        let tracker = Arc::new(OwnershipTracker::new(1, 1));
        tracker.set_nodes(&[9]);
        let group = Group::new("ejb", node(1));
        let locator = PrimaryOwnerLocator::new(CacheMode::Distributed, tracker, group);

        assert_eq!(locator.locate("B1").id, 1);
        assert!(locator.is_local("B1"));
    }
}
