//! Core types used throughout the bean manager.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::net::SocketAddr;

/// Node identifier in the cluster.
pub type NodeId = u64;

/// Bound satisfied by every bean identifier type.
///
/// Identifiers are opaque to the manager. They must hash consistently across
/// nodes (the ring hashes them) and travel inside remote scheduler commands.
pub trait Identifier:
    Clone + Eq + Hash + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> Identifier for T where
    T: Clone + Eq + Hash + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// A logical cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier.
    pub id: NodeId,
    /// Logical name, used as the routing key for client affinity.
    pub name: String,
    /// Physical address of the member.
    pub addr: SocketAddr,
}

impl Node {
    /// Create a new node.
    pub fn new(id: NodeId, name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            id,
            name: name.into(),
            addr,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}

/// Cache key of a bean entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeanKey<I>(pub I);

impl<I> BeanKey<I> {
    /// The bean identifier.
    pub fn id(&self) -> &I {
        &self.0
    }
}

/// Cache key of a bean group entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeanGroupKey<I>(pub I);

impl<I> BeanGroupKey<I> {
    /// The group identifier.
    pub fn id(&self) -> &I {
        &self.0
    }
}

/// Clustering mode of the backing cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMode {
    /// Not clustered; every key is local.
    Local,
    /// Every member holds every entry.
    Replicated,
    /// Entries are spread over `num_owners` members.
    Distributed,
}

impl CacheMode {
    /// Whether the cache spans more than one member.
    pub fn is_clustered(&self) -> bool {
        !matches!(self, CacheMode::Local)
    }
}

/// Routing hint for client request affinity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Affinity {
    /// No preference.
    None,
    /// Any member of the named cluster.
    Cluster(String),
    /// The named node.
    Node(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_mode_clustered() {
        assert!(!CacheMode::Local.is_clustered());
        assert!(CacheMode::Replicated.is_clustered());
        assert!(CacheMode::Distributed.is_clustered());
    }

    #[test]
    fn test_node_display() {
        let node = Node::new(3, "node-3", "127.0.0.1:7600".parse().unwrap());
        assert_eq!(node.to_string(), "node-3(3)");
    }
}
