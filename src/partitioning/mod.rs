//! Primary ownership of bean keys.
//!
//! [`HashRing`] maps any hashable key to a member with virtual nodes, so a
//! join or leave only moves the keys that land on the changed member.
//! [`OwnershipTracker`] holds one node's live ring and numbers each ring it
//! installs; a [`RingSnapshot`] freezes one of those generations so the
//! old and new owner of a key can be compared during a rehash.
//!
//! # Example
//!
//! ```rust
//! use beancluster::partitioning::{HashRing, OwnershipTracker};
//!
//! let mut ring = HashRing::new(2);
//! ring.add_node(1);
//! ring.add_node(2);
//! assert!(ring.get_primary("B1").is_some());
//!
//! let tracker = OwnershipTracker::new(1, 2);
//! tracker.set_nodes(&[1, 2]);
//! let _local = tracker.is_primary("B1");
//! ```

mod hashring;
mod ownership;

pub use hashring::{HashRing, DEFAULT_VNODES_PER_NODE};
pub use ownership::{OwnershipTracker, RingSnapshot};
