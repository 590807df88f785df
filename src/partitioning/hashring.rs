//! Consistent hashing implementation with virtual nodes.
//!
//! Each physical node is represented by multiple virtual nodes (vnodes) to
//! ensure even key distribution. Keys are any `Hash` value; two rings built
//! from the same member set agree on every key, on every node.

use crate::types::NodeId;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

/// Number of virtual nodes per physical node.
/// More vnodes = more even distribution but higher memory usage.
pub const DEFAULT_VNODES_PER_NODE: usize = 256;

/// A consistent hash ring for distributing keys across nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRing {
    /// Virtual nodes mapped to their owning physical nodes.
    /// The key is the hash position on the ring, value is the node ID.
    vnodes: BTreeMap<u64, NodeId>,

    /// Number of virtual nodes per physical node.
    vnodes_per_node: usize,

    /// Number of owners per key.
    num_owners: usize,

    /// Physical nodes in the ring, sorted.
    nodes: Vec<NodeId>,
}

impl HashRing {
    /// Create a new empty hash ring.
    pub fn new(num_owners: usize) -> Self {
        Self::with_vnodes(num_owners, DEFAULT_VNODES_PER_NODE)
    }

    /// Create a new hash ring with custom vnode count.
    pub fn with_vnodes(num_owners: usize, vnodes_per_node: usize) -> Self {
        Self {
            vnodes: BTreeMap::new(),
            vnodes_per_node: vnodes_per_node.max(1),
            num_owners: num_owners.max(1),
            nodes: Vec::new(),
        }
    }

    /// Build a ring with the same parameters as this one over a new member set.
    pub fn rebuilt(&self, nodes: &[NodeId]) -> Self {
        let mut ring = Self::with_vnodes(self.num_owners, self.vnodes_per_node);
        for &node in nodes {
            ring.add_node(node);
        }
        ring
    }

    /// Get the number of owners per key.
    pub fn num_owners(&self) -> usize {
        self.num_owners
    }

    /// Get the number of physical nodes in the ring.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get all physical nodes in the ring.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Check if a node is in the ring.
    pub fn contains_node(&self, node_id: NodeId) -> bool {
        self.nodes.binary_search(&node_id).is_ok()
    }

    /// Add a node to the ring.
    pub fn add_node(&mut self, node_id: NodeId) {
        if self.contains_node(node_id) {
            return;
        }

        self.nodes.push(node_id);
        self.nodes.sort_unstable();

        for i in 0..self.vnodes_per_node {
            self.vnodes.insert(Self::vnode_hash(node_id, i), node_id);
        }
    }

    /// Remove a node from the ring.
    pub fn remove_node(&mut self, node_id: NodeId) {
        if !self.contains_node(node_id) {
            return;
        }

        self.nodes.retain(|&n| n != node_id);

        for i in 0..self.vnodes_per_node {
            let hash = Self::vnode_hash(node_id, i);
            // Colliding vnodes of another member must survive.
            if self.vnodes.get(&hash) == Some(&node_id) {
                self.vnodes.remove(&hash);
            }
        }
    }

    /// Get the primary owner for a key.
    ///
    /// Returns None if the ring is empty.
    pub fn get_primary<K: Hash + ?Sized>(&self, key: &K) -> Option<NodeId> {
        self.owner_at(Self::hash_key(key))
    }

    /// Get up to `count` distinct owners for a key, primary first.
    pub fn get_owners<K: Hash + ?Sized>(&self, key: &K, count: usize) -> Vec<NodeId> {
        if self.vnodes.is_empty() {
            return Vec::new();
        }

        let hash = Self::hash_key(key);
        let wanted = count.min(self.nodes.len());
        let mut owners = Vec::with_capacity(wanted);

        // Walk clockwise from the key position, wrapping around.
        for (_, &node_id) in self.vnodes.range(hash..).chain(self.vnodes.range(..hash)) {
            if !owners.contains(&node_id) {
                owners.push(node_id);
                if owners.len() >= wanted {
                    break;
                }
            }
        }

        owners
    }

    /// Get all owners for a key based on the configured owner count.
    pub fn get_replica_owners<K: Hash + ?Sized>(&self, key: &K) -> Vec<NodeId> {
        self.get_owners(key, self.num_owners)
    }

    /// Check if a node is the primary owner for a key.
    pub fn is_primary<K: Hash + ?Sized>(&self, key: &K, node_id: NodeId) -> bool {
        self.get_primary(key) == Some(node_id)
    }

    /// Check if a node holds a copy of a key.
    pub fn is_owner<K: Hash + ?Sized>(&self, key: &K, node_id: NodeId) -> bool {
        self.get_replica_owners(key).contains(&node_id)
    }

    /// Count primary ownership over a sample of synthetic keys.
    pub fn get_distribution(&self, sample_size: usize) -> HashMap<NodeId, usize> {
        let mut distribution = HashMap::new();

        for i in 0..sample_size {
            let key = format!("sample_key_{}", i);
            if let Some(owner) = self.get_primary(&key) {
                *distribution.entry(owner).or_insert(0) += 1;
            }
        }

        distribution
    }

    fn owner_at(&self, hash: u64) -> Option<NodeId> {
        self.vnodes
            .range(hash..)
            .next()
            .or_else(|| self.vnodes.iter().next())
            .map(|(_, &node_id)| node_id)
    }

    fn vnode_hash(node_id: NodeId, index: usize) -> u64 {
        Self::hash_key(&format!("{}:{}", node_id, index))
    }

    /// Calculate the hash of a key using xxHash64.
    fn hash_key<K: Hash + ?Sized>(key: &K) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        key.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(2)
    }
}
