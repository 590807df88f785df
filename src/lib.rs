//! Clustered manager for stateful beans.
//!
//! This crate keeps stateful beans in a two-tier cache and expires or
//! passivates them on timers that always run on the bean's primary owner:
//! - **Moka** holds the in-memory tier, bounded by the active-bean limit
//! - A consistent hash ring decides which member owns each bean
//! - Schedulers follow ownership across topology changes
//!
//! # Example
//!
//! ```rust,no_run
//! use beancluster::{
//!     BeanCache, BeanManager, BeanManagerConfig, CacheConfig, CacheMode, Group, Node,
//!     UuidIdentifierFactory,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let local = Node::new(1, "node-1", "127.0.0.1:7600".parse()?);
//!     let group = Group::singleton("local", local);
//!     let cache = BeanCache::<String, Vec<u8>>::new(CacheConfig::new("beans", CacheMode::Local), 1);
//!
//!     let config = BeanManagerConfig::new("Cart").with_timeout(Duration::from_secs(600));
//!     let manager = BeanManager::builder(config, cache, group, Arc::new(UuidIdentifierFactory))
//!         .build()?;
//!     manager.start()?;
//!
//!     let id = manager.identifier_factory().create_identifier()?;
//!     let mut bean = manager.create_bean(id.clone(), id, b"cart".to_vec())?;
//!     bean.instance_mut().extend_from_slice(b":item");
//!     // Releasing the bean starts its expiration timer.
//!     bean.close()?;
//!
//!     manager.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 BeanManager                 │
//! │  • create_bean / find_bean / remove_bean    │
//! │  • rehash worker                            │
//! └─────────────────────────────────────────────┘
//!          │                         │
//!          ▼                         ▼
//! ┌─────────────────┐   ┌───────────────────────┐
//! │    BeanCache    │   │ PrimaryOwnerScheduler │
//! │ memory + store  │   │   local or dispatch   │
//! └─────────────────┘   └───────────────────────┘
//!          │                         │
//!          ▼                         ▼
//! ┌─────────────────┐   ┌───────────────────────┐
//! │ OwnershipTracker│   │    LocalScheduler     │
//! │   hash ring     │   │ expiration / eviction │
//! └─────────────────┘   └───────────────────────┘
//! ```
//!
//! # Ownership
//!
//! Every bean has exactly one primary owner, and only the owner keeps a
//! pending schedule for it. When the ring changes, each member drops the
//! schedules of beans it is about to lose and picks up in-memory beans it
//! has just gained.

pub mod bean;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod identifier;
pub mod locality;
pub mod manager;
pub mod metrics;
pub mod partitioning;
pub mod scheduler;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use bean::{Bean, BeanEntry, BeanState, ImmutableBeanEntry, SchedulableBean};
pub use cache::{BeanCache, CacheStats};
pub use config::{BeanManagerConfig, CacheConfig, ExpirationConfig};
pub use error::{Error, Result};
pub use manager::{BeanManager, BeanManagerBuilder, ManagerState};
pub use types::{Affinity, CacheMode, Node, NodeId};

// Re-export cluster types
pub use cluster::{Group, MemberEvent, PrimaryOwnerLocator};

// Re-export dispatch and identifier types
pub use dispatcher::{CommandDispatcher, CommandDispatcherFactory, LocalCommandDispatcherFactory};
pub use identifier::{AffinityIdentifierFactory, IdentifierFactory, UuidIdentifierFactory};

// Re-export scheduling types
pub use locality::Locality;
pub use scheduler::{Scheduler, SchedulerKind};

// Re-export partitioning types
pub use partitioning::{HashRing, OwnershipTracker, RingSnapshot};

// Re-export metrics types
pub use metrics::{BeanMetrics, Counter, Gauge, LabeledCounter, MetricsSnapshot};

// Re-export testing types
pub use testing::{RecordingListener, TestCluster, TestNode};
