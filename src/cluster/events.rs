//! Group membership events.

use crate::types::NodeId;
use std::net::SocketAddr;

/// Events related to group membership changes.
#[derive(Debug, Clone)]
pub enum MemberEvent {
    /// A node joined the group.
    NodeJoin {
        /// The node's ID.
        node_id: NodeId,
        /// The node's address.
        addr: SocketAddr,
    },

    /// A node left the group.
    NodeLeave {
        /// The node's ID.
        node_id: NodeId,
    },
}

impl MemberEvent {
    /// Get the node ID associated with this event.
    pub fn node_id(&self) -> NodeId {
        match self {
            MemberEvent::NodeJoin { node_id, .. } => *node_id,
            MemberEvent::NodeLeave { node_id } => *node_id,
        }
    }

    /// Check if this is a join event.
    pub fn is_join(&self) -> bool {
        matches!(self, MemberEvent::NodeJoin { .. })
    }
}

/// Listener for membership events.
pub trait MemberEventListener: Send + Sync + 'static {
    /// Called after the group view changed.
    fn on_event(&self, event: MemberEvent);
}

/// Event listener that logs events.
pub struct LoggingEventListener;

impl MemberEventListener for LoggingEventListener {
    fn on_event(&self, event: MemberEvent) {
        match &event {
            MemberEvent::NodeJoin { node_id, addr } => {
                tracing::info!(node_id, %addr, "Node joined group");
            }
            MemberEvent::NodeLeave { node_id } => {
                tracing::info!(node_id, "Node left group");
            }
        }
    }
}
