//! Test fixtures for multi-node bean managers.
//!
//! A [`TestCluster`] runs several nodes in one process. Nodes share a
//! [`LocalCommandDispatcherFactory`], so scheduler commands travel between
//! managers exactly as they would over a real transport, and each node has
//! its own group view, cache and manager.
//!
//! Caches are in replicated mode. The fixture has no state transfer of its
//! own; [`TestCluster::replicate`] copies a bean to the other members the
//! way the underlying cache would.

pub mod utils;


use crate::bean::{PassivationListener, RemoveListener};
use crate::cache::BeanCache;
use crate::cluster::Group;
use crate::config::{BeanManagerConfig, CacheConfig, ExpirationConfig};
use crate::dispatcher::{CommandDispatcherFactory, LocalCommandDispatcherFactory};
use crate::error::Result;
use crate::identifier::UuidIdentifierFactory;
use crate::manager::BeanManager;
use crate::types::{CacheMode, Node, NodeId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;
use utils::test_node;

/// Bean payload used by the fixtures.
pub type TestBean = Vec<u8>;

/// Manager type used by the fixtures.
pub type TestManager = BeanManager<String, TestBean>;

/// Counts listener callbacks.
#[derive(Debug, Default)]
pub struct RecordingListener {
    passivated: AtomicUsize,
    activated: AtomicUsize,
    removed: AtomicUsize,
}

impl RecordingListener {
    /// Number of `pre_passivate` calls.
    pub fn passivated(&self) -> usize {
        self.passivated.load(Ordering::Relaxed)
    }

    /// Number of `post_activate` calls.
    pub fn activated(&self) -> usize {
        self.activated.load(Ordering::Relaxed)
    }

    /// Number of `removed` calls.
    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::Relaxed)
    }
}

impl PassivationListener<TestBean> for RecordingListener {
    fn pre_passivate(&self, _instance: &mut TestBean) {
        self.passivated.fetch_add(1, Ordering::Relaxed);
    }

    fn post_activate(&self, _instance: &mut TestBean) {
        self.activated.fetch_add(1, Ordering::Relaxed);
    }
}

impl RemoveListener<TestBean> for RecordingListener {
    fn removed(&self, _instance: &TestBean) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }
}

/// One member of a [`TestCluster`].
pub struct TestNode {
    /// Member description.
    pub node: Node,
    /// This member's view of the group.
    pub group: Arc<Group>,
    /// This member's cache.
    pub cache: Arc<BeanCache<String, TestBean>>,
    /// This member's manager.
    pub manager: TestManager,
    /// Listener wired into the manager.
    pub listener: Arc<RecordingListener>,
}

impl TestNode {
    /// Member ID.
    pub fn id(&self) -> NodeId {
        self.node.id
    }
}

/// In-process cluster of bean managers.
pub struct TestCluster {
    factory: Arc<LocalCommandDispatcherFactory>,
    nodes: Vec<TestNode>,
    manager_config: BeanManagerConfig,
    singleton: bool,
}

impl TestCluster {
    /// Bean type managed by the fixtures.
    pub const BEAN_NAME: &'static str = "Cart";

    /// `node_count` members, all of them in every group and on every ring.
    pub fn new(node_count: usize, expiration: ExpirationConfig) -> Result<Self> {
        let ring: Vec<NodeId> = (1..=node_count as NodeId).collect();
        Self::with_ring(node_count, &ring, expiration)
    }

    /// `node_count` members that all know each other, with only `ring`
    /// owning keys.
    pub fn with_ring(
        node_count: usize,
        ring: &[NodeId],
        expiration: ExpirationConfig,
    ) -> Result<Self> {
        let mut cluster = Self {
            factory: LocalCommandDispatcherFactory::new(),
            nodes: Vec::with_capacity(node_count),
            manager_config: BeanManagerConfig::new(Self::BEAN_NAME).with_expiration(expiration),
            singleton: false,
        };

        let members: Vec<NodeId> = (1..=node_count as NodeId).collect();
        for &node_id in &members {
            let member = cluster.build_node(node_id, &members, ring)?;
            cluster.nodes.push(member);
        }
        info!(nodes = node_count, ring = ?ring, "Test cluster created");
        Ok(cluster)
    }

    /// A single non-clustered member.
    pub fn singleton(expiration: ExpirationConfig) -> Result<Self> {
        let factory = LocalCommandDispatcherFactory::new();
        let manager_config = BeanManagerConfig::new(Self::BEAN_NAME).with_expiration(expiration);

        let node = test_node(1);
        let group = Group::singleton("local", node.clone());
        let cache = BeanCache::<String, TestBean>::new(CacheConfig::new("beans", CacheMode::Local), node.id);
        let listener = Arc::new(RecordingListener::default());
        let dispatcher: Arc<dyn CommandDispatcherFactory> = factory.clone();
        let manager = BeanManager::builder(
            manager_config.clone(),
            cache.clone(),
            group.clone(),
            Arc::new(UuidIdentifierFactory),
        )
        .dispatcher_factory(dispatcher)
        .passivation_listener(listener.clone())
        .remove_listener(listener.clone())
        .build()?;

        Ok(Self {
            factory,
            nodes: vec![TestNode {
                node,
                group,
                cache,
                manager,
                listener,
            }],
            manager_config,
            singleton: true,
        })
    }

    fn build_node(&self, node_id: NodeId, members: &[NodeId], ring: &[NodeId]) -> Result<TestNode> {
        let node = test_node(node_id);
        let group = Group::new("ejb", node.clone());
        for &other in members {
            if other != node_id {
                group.add_member(test_node(other))?;
            }
        }

        let cache = BeanCache::<String, TestBean>::new(CacheConfig::new("beans", CacheMode::Replicated), node_id);
        cache.rebalance(ring);
        group.add_listener(cache.clone());

        let listener = Arc::new(RecordingListener::default());
        let dispatcher: Arc<dyn CommandDispatcherFactory> = self.factory.clone();
        let manager = BeanManager::builder(
            self.manager_config.clone(),
            cache.clone(),
            group.clone(),
            Arc::new(UuidIdentifierFactory),
        )
        .dispatcher_factory(dispatcher)
        .passivation_listener(listener.clone())
        .remove_listener(listener.clone())
        .build()?;

        Ok(TestNode {
            node,
            group,
            cache,
            manager,
            listener,
        })
    }

    /// Start every manager.
    pub fn start(&self) -> Result<()> {
        for member in &self.nodes {
            member.manager.start()?;
        }
        Ok(())
    }

    /// Stop every manager.
    pub async fn stop(&self) -> Result<()> {
        for member in &self.nodes {
            member.manager.stop().await?;
        }
        Ok(())
    }

    /// Shared transport.
    pub fn factory(&self) -> &Arc<LocalCommandDispatcherFactory> {
        &self.factory
    }

    /// Member IDs, in creation order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(TestNode::id).collect()
    }

    /// Look up a member.
    pub fn node(&self, node_id: NodeId) -> Option<&TestNode> {
        self.nodes.iter().find(|n| n.id() == node_id)
    }

    /// Install `ring` on every member's cache, running the rehash phases.
    pub fn rebalance(&self, ring: &[NodeId]) {
        for member in &self.nodes {
            member.cache.rebalance(ring);
        }
    }

    /// Add a member. Existing members learn about it through their group,
    /// which rehashes their caches. The new manager is left stopped.
    pub fn add_node(&mut self) -> Result<NodeId> {
        let node_id = self.nodes.iter().map(TestNode::id).max().unwrap_or(0) + 1;
        let mut members = self.node_ids();
        members.push(node_id);
        let mut ring = self
            .nodes
            .first()
            .map(|n| n.cache.tracker().nodes())
            .unwrap_or_default();
        ring.push(node_id);

        let member = self.build_node(node_id, &members, &ring)?;
        for existing in &self.nodes {
            existing.group.add_member(member.node.clone())?;
        }
        info!(node_id, "Test node added");
        self.nodes.push(member);
        Ok(node_id)
    }

    /// Stop a member and remove it from every other group view.
    pub async fn remove_node(&mut self, node_id: NodeId) -> Result<()> {
        let Some(index) = self.nodes.iter().position(|n| n.id() == node_id) else {
            return Ok(());
        };
        let member = self.nodes.remove(index);
        member.manager.stop().await?;
        for other in &self.nodes {
            other.group.remove_member(node_id)?;
        }
        info!(node_id, "Test node removed");
        Ok(())
    }

    /// Copy a bean and its group member from `from` to every other member.
    ///
    /// Returns `false` if `from` does not hold the bean.
    pub fn replicate(&self, from: NodeId, id: &str) -> bool {
        let id = id.to_string();
        let Some(source) = self.node(from) else {
            return false;
        };
        let Some(entry) = source.cache.peek_entry(&id) else {
            return false;
        };
        let Some(instance) = source
            .cache
            .find_group(entry.group_id())
            .and_then(|group| group.get(&id).cloned())
        else {
            return false;
        };

        for member in self.nodes.iter().filter(|n| n.id() != from) {
            member
                .cache
                .add_bean(id.clone(), entry.clone(), instance.clone(), true);
        }
        true
    }

    /// Members holding a pending schedule for `id`.
    pub fn scheduled_on(&self, id: &str) -> Vec<NodeId> {
        let id = id.to_string();
        self.nodes
            .iter()
            .filter(|n| n.manager.is_scheduled(&id))
            .map(TestNode::id)
            .collect()
    }

    /// Whether this cluster is a single non-clustered member.
    pub fn is_singleton(&self) -> bool {
        self.singleton
    }
}

impl std::fmt::Debug for TestCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCluster")
            .field("nodes", &self.node_ids())
            .field("singleton", &self.singleton)
            .finish()
    }
}
