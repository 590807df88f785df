//! Cluster membership group.
//!
//! A [`Group`] is one node's view of the cluster: the local member, the set
//! of current members, and the name registry used for client affinity. A
//! singleton group has no transport and only ever contains the local member.

use crate::cluster::events::{MemberEvent, MemberEventListener};
use crate::error::{MembershipError, Result};
use crate::types::{Node, NodeId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Cluster membership as seen by one node.
pub struct Group {
    /// Cluster name.
    name: String,

    /// This node.
    local: Node,

    /// Current members, including the local one.
    members: RwLock<BTreeMap<NodeId, Node>>,

    /// Whether clustering is configured at all.
    singleton: bool,

    /// Event listeners.
    listeners: RwLock<Vec<Arc<dyn MemberEventListener>>>,
}

impl Group {
    /// Create a clustered group containing only the local member.
    pub fn new(name: impl Into<String>, local: Node) -> Arc<Self> {
        Arc::new(Self::build(name.into(), local, false))
    }

    /// Create a non-clustered group.
    pub fn singleton(name: impl Into<String>, local: Node) -> Arc<Self> {
        Arc::new(Self::build(name.into(), local, true))
    }

    fn build(name: String, local: Node, singleton: bool) -> Self {
        let mut members = BTreeMap::new();
        members.insert(local.id, local.clone());
        Self {
            name,
            local,
            members: RwLock::new(members),
            singleton,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Cluster name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The local member.
    pub fn local_member(&self) -> &Node {
        &self.local
    }

    /// Whether this group has no clustering transport.
    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    /// Add an event listener.
    pub fn add_listener(&self, listener: Arc<dyn MemberEventListener>) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, event: MemberEvent) {
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in listeners {
            listener.on_event(event.clone());
        }
    }

    /// Current members, ordered by node ID.
    pub fn members(&self) -> Vec<Node> {
        self.members.read().values().cloned().collect()
    }

    /// Current member IDs, ordered.
    pub fn member_ids(&self) -> Vec<NodeId> {
        self.members.read().keys().copied().collect()
    }

    /// Look up a member by ID.
    pub fn member(&self, node_id: NodeId) -> Option<Node> {
        self.members.read().get(&node_id).cloned()
    }

    /// Look up a member by its registered name.
    pub fn member_by_name(&self, name: &str) -> Option<Node> {
        self.members
            .read()
            .values()
            .find(|node| node.name == name)
            .cloned()
    }

    /// Registered name of a member.
    pub fn name_of(&self, node_id: NodeId) -> Option<String> {
        self.members.read().get(&node_id).map(|node| node.name.clone())
    }

    /// Handle a member joining.
    pub fn add_member(&self, node: Node) -> Result<()> {
        if self.singleton {
            return Err(MembershipError::NotClustered(self.name.clone()).into());
        }

        let mut members = self.members.write();
        if members.contains_key(&node.id) {
            return Err(MembershipError::NodeAlreadyExists(node.id).into());
        }

        let (node_id, addr) = (node.id, node.addr);
        members.insert(node.id, node);
        drop(members);

        info!(group = %self.name, node_id, %addr, "Member joined");
        self.notify(MemberEvent::NodeJoin { node_id, addr });
        Ok(())
    }

    /// Handle a member leaving.
    pub fn remove_member(&self, node_id: NodeId) -> Result<Node> {
        if node_id == self.local.id {
            debug!(node_id, "Refusing to remove the local member");
            return Err(MembershipError::NodeNotFound(node_id).into());
        }

        let removed = self
            .members
            .write()
            .remove(&node_id)
            .ok_or(MembershipError::NodeNotFound(node_id))?;

        info!(group = %self.name, node_id, "Member left");
        self.notify(MemberEvent::NodeLeave { node_id });
        Ok(removed)
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("local", &self.local.id)
            .field("members", &self.member_ids())
            .field("singleton", &self.singleton)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn node(id: NodeId) -> Node {
        Node::new(id, format!("node-{}", id), format!("127.0.0.1:{}", 7600 + id).parse().unwrap())
    }

    struct Recorder(Mutex<Vec<MemberEvent>>);

    impl MemberEventListener for Recorder {
        fn on_event(&self, event: MemberEvent) {
            self.0.lock().push(event);
        }
    }

    #[test]
    fn test_group_membership() {
        let group = Group::new("ejb", node(1));
        assert_eq!(group.member_ids(), vec![1]);
        assert!(!group.is_singleton());

        group.add_member(node(2)).unwrap();
        assert_eq!(group.member_ids(), vec![1, 2]);
        assert_eq!(group.name_of(2).as_deref(), Some("node-2"));
        assert_eq!(group.member_by_name("node-2").map(|n| n.id), Some(2));

        assert!(group.add_member(node(2)).is_err());

        group.remove_member(2).unwrap();
        assert!(group.member(2).is_none());
        assert!(group.remove_member(2).is_err());
        assert!(group.remove_member(1).is_err());
    }

    #[test]
    fn test_singleton_rejects_members() {
        let group = Group::singleton("local", node(1));
        assert!(group.is_singleton());
        assert!(group.add_member(node(2)).is_err());
        assert_eq!(group.members().len(), 1);
    }

    #[test]
    fn test_listeners_notified() {
        let group = Group::new("ejb", node(1));
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        group.add_listener(recorder.clone());

        group.add_member(node(2)).unwrap();
        group.remove_member(2).unwrap();

        let events = recorder.0.lock();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_join());
        assert_eq!(events[1].node_id(), 2);
    }
}
