//! The bean cache.
//!
//! [`BeanCache`] is one node's handle on the distributed cache holding bean
//! entries and bean groups. It owns the node's view of key distribution and
//! delivers rehash events to registered [`RehashListener`]s when the member
//! set changes.

pub mod batch;
pub mod listener;
pub mod storage;

pub use batch::{Batch, BatchState, Batcher};
pub use listener::{ListenerId, RehashListener};
pub use storage::{BeanCache, CacheStats};
