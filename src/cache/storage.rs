//! Two-tier bean storage: a Moka memory tier and a passivation store.

use crate::bean::{BeanEntry, BeanGroupEntry, BeanInstance, PassivationListener};
use crate::cache::listener::{ListenerId, RehashListener};
use crate::cluster::{MemberEvent, MemberEventListener};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::locality::Locality;
use crate::partitioning::{HashRing, OwnershipTracker, RingSnapshot};
use crate::types::{BeanGroupKey, BeanKey, CacheMode, Identifier, NodeId};
use dashmap::DashMap;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

type SharedPassivationListener<T> = Arc<RwLock<Option<Arc<dyn PassivationListener<T>>>>>;

/// Entries written out of memory.
struct PassivationStore<I, T> {
    entries: DashMap<BeanKey<I>, BeanEntry<I>>,
    groups: DashMap<BeanGroupKey<I>, BeanGroupEntry<I, T>>,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Bean entries held in memory.
    pub memory_entries: u64,
    /// Bean entries held only in the store.
    pub stored_entries: u64,
    /// Groups moved to the store.
    pub passivations: u64,
    /// Groups loaded back from the store.
    pub activations: u64,
}

/// Distributed bean cache as seen by one node.
///
/// Bean entries and bean groups live in Moka caches. When a group is
/// passivated (explicitly, or because the memory tier is over capacity) it
/// and its bean entries move to the passivation store; looking a bean up
/// activates its group again. Iterating [`BeanCache::local_entries`] never
/// touches the store.
pub struct BeanCache<I: Identifier, T: BeanInstance> {
    config: CacheConfig,

    /// Live ring for this node.
    tracker: Arc<OwnershipTracker>,

    /// Memory tier, bean entries.
    entries: Cache<BeanKey<I>, BeanEntry<I>>,

    /// Memory tier, bean groups. Bounded by `max_active`.
    groups: Cache<BeanGroupKey<I>, BeanGroupEntry<I, T>>,

    /// Passivation store.
    store: Arc<PassivationStore<I, T>>,

    passivation_listener: SharedPassivationListener<T>,

    /// Serializes read-modify-write of group entries.
    group_writes: Mutex<()>,

    rehash_listeners: RwLock<Vec<(ListenerId, Arc<dyn RehashListener>)>>,
    next_listener_id: AtomicU64,

    /// Serializes topology changes.
    rehash_lock: Mutex<()>,

    passivations: Arc<AtomicU64>,
    activations: AtomicU64,
}

impl<I: Identifier, T: BeanInstance> BeanCache<I, T> {
    /// Create a cache for the given local node.
    ///
    /// The ring starts out containing only the local node.
    pub fn new(config: CacheConfig, local_node_id: NodeId) -> Arc<Self> {
        let ring = HashRing::with_vnodes(config.num_owners, config.vnodes_per_node);
        let tracker = Arc::new(OwnershipTracker::with_ring(local_node_id, ring));
        tracker.set_nodes(&[local_node_id]);

        let store = Arc::new(PassivationStore {
            entries: DashMap::new(),
            groups: DashMap::new(),
        });
        let passivation_listener: SharedPassivationListener<T> = Arc::new(RwLock::new(None));
        let passivations = Arc::new(AtomicU64::new(0));

        let entries: Cache<BeanKey<I>, BeanEntry<I>> = Cache::builder().build();

        let groups = {
            let entries = entries.clone();
            let store = store.clone();
            let listener = passivation_listener.clone();
            let passivations = passivations.clone();
            let persistent = config.persistent;

            Cache::builder()
                .max_capacity(config.max_active)
                .eviction_listener(
                    move |key: Arc<BeanGroupKey<I>>, group: BeanGroupEntry<I, T>, cause| {
                        if cause != RemovalCause::Size {
                            return;
                        }
                        debug!(group = ?key.id(), "Memory tier over capacity, evicting group");
                        let listener = listener.read().clone();
                        write_out(&store, &entries, listener.as_deref(), persistent, &key, group);
                        passivations.fetch_add(1, Ordering::Relaxed);
                    },
                )
                .build()
        };

        Arc::new(Self {
            config,
            tracker,
            entries,
            groups,
            store,
            passivation_listener,
            group_writes: Mutex::new(()),
            rehash_listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            rehash_lock: Mutex::new(()),
            passivations,
            activations: AtomicU64::new(0),
        })
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Clustering mode.
    pub fn mode(&self) -> CacheMode {
        self.config.mode
    }

    /// Whether passivated groups are kept in the store.
    pub fn is_persistent(&self) -> bool {
        self.config.persistent
    }

    /// How long a manager stop waits for in-flight work.
    pub fn stop_timeout(&self) -> Duration {
        self.config.stop_timeout
    }

    /// Live ownership.
    pub fn tracker(&self) -> &Arc<OwnershipTracker> {
        &self.tracker
    }

    /// Live locality of this node.
    pub fn locality(&self) -> Locality {
        Locality::cache(self.config.mode, self.tracker.clone())
    }

    /// Install or clear the passivation listener.
    pub fn set_passivation_listener(&self, listener: Option<Arc<dyn PassivationListener<T>>>) {
        *self.passivation_listener.write() = listener;
    }

    // ==================== Entries ====================

    /// Look up a bean entry, activating its group if it was passivated.
    pub fn find_entry(&self, id: &I) -> Option<BeanEntry<I>> {
        let key = BeanKey(id.clone());
        if let Some(entry) = self.entries.get(&key) {
            return Some(entry);
        }

        let group_id = self.store.entries.get(&key)?.group_id().clone();
        self.activate(&group_id);
        self.entries.get(&key)
    }

    /// Whether the bean currently sits only in the passivation store.
    pub fn is_passivated(&self, id: &I) -> bool {
        let key = BeanKey(id.clone());
        !self.entries.contains_key(&key) && self.store.entries.contains_key(&key)
    }

    /// Look up a bean entry in either tier without activating anything.
    pub fn peek_entry(&self, id: &I) -> Option<BeanEntry<I>> {
        let key = BeanKey(id.clone());
        self.entries
            .get(&key)
            .or_else(|| self.store.entries.get(&key).map(|e| e.clone()))
    }

    /// Whether a bean entry exists in either tier.
    pub fn contains_entry(&self, id: &I) -> bool {
        let key = BeanKey(id.clone());
        self.entries.contains_key(&key) || self.store.entries.contains_key(&key)
    }

    /// Bean entries held in memory. Never loads from the store.
    pub fn local_entries(&self) -> Vec<(I, BeanEntry<I>)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.id().clone(), entry))
            .collect()
    }

    /// Number of in-memory entries of the named bean type.
    pub fn active_count(&self, bean_name: &str) -> usize {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.bean_name() == bean_name)
            .count()
    }

    /// Number of store-only entries of the named bean type.
    pub fn passive_count(&self, bean_name: &str) -> usize {
        self.store
            .entries
            .iter()
            .filter(|entry| entry.value().bean_name() == bean_name)
            .count()
    }

    // ==================== Groups ====================

    /// Look up a group, activating it if it was passivated.
    pub fn find_group(&self, group_id: &I) -> Option<BeanGroupEntry<I, T>> {
        let key = BeanGroupKey(group_id.clone());
        self.groups.get(&key).or_else(|| self.activate(group_id))
    }

    /// Whether a group exists in either tier.
    pub fn contains_group(&self, group_id: &I) -> bool {
        let key = BeanGroupKey(group_id.clone());
        self.groups.contains_key(&key) || self.store.groups.contains_key(&key)
    }

    /// Add a bean to a group and write its entry.
    ///
    /// With `create` a missing group is created; otherwise a missing group
    /// leaves the cache untouched and returns `false`.
    pub fn add_bean(&self, id: I, entry: BeanEntry<I>, instance: T, create: bool) -> bool {
        let _guard = self.group_writes.lock();
        let key = BeanGroupKey(entry.group_id().clone());

        let mut group = match self.groups.get(&key).or_else(|| self.activate(key.id())) {
            Some(group) => group,
            None if create => BeanGroupEntry::new(),
            None => return false,
        };

        group.add(id.clone(), instance);
        self.groups.insert(key, group);
        self.entries.insert(BeanKey(id), entry);
        true
    }

    /// Write back a released bean.
    pub fn release_bean(&self, id: I, entry: BeanEntry<I>, instance: T) -> Result<()> {
        if self.add_bean(id, entry.clone(), instance, false) {
            Ok(())
        } else {
            Err(CacheError::MissingGroup(format!("{:?}", entry.group_id())).into())
        }
    }

    /// Remove a bean from whichever tier holds it.
    ///
    /// Removing the last member of a group removes the group.
    pub fn remove_bean(&self, id: &I) -> Option<T> {
        let _guard = self.group_writes.lock();
        let key = BeanKey(id.clone());

        let entry = self
            .entries
            .remove(&key)
            .or_else(|| self.store.entries.remove(&key).map(|(_, e)| e))?;
        let group_key = BeanGroupKey(entry.group_id().clone());

        if let Some(mut group) = self.groups.get(&group_key) {
            let instance = group.remove(id);
            if group.is_empty() {
                self.groups.invalidate(&group_key);
            } else {
                self.groups.insert(group_key, group);
            }
            return instance;
        }

        let mut stored = self.store.groups.get_mut(&group_key)?;
        let instance = stored.remove(id);
        let empty = stored.is_empty();
        drop(stored);
        if empty {
            self.store.groups.remove(&group_key);
        }
        instance
    }

    // ==================== Passivation ====================

    /// Move a group and its bean entries out of memory.
    ///
    /// Non-persistent caches discard the group instead.
    pub fn passivate(&self, group_id: &I) -> bool {
        let _guard = self.group_writes.lock();
        let key = BeanGroupKey(group_id.clone());
        let Some(group) = self.groups.remove(&key) else {
            return false;
        };

        let listener = self.passivation_listener.read().clone();
        write_out(
            &self.store,
            &self.entries,
            listener.as_deref(),
            self.config.persistent,
            &key,
            group,
        );
        self.passivations.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Load a passivated group back into memory.
    fn activate(&self, group_id: &I) -> Option<BeanGroupEntry<I, T>> {
        let key = BeanGroupKey(group_id.clone());
        let (_, mut group) = self.store.groups.remove(&key)?;

        let ids: Vec<I> = group.ids().cloned().collect();
        for id in ids {
            if let Some((bean_key, entry)) = self.store.entries.remove(&BeanKey(id)) {
                self.entries.insert(bean_key, entry);
            }
        }

        if let Some(listener) = self.passivation_listener.read().clone() {
            for instance in group.instances_mut() {
                listener.post_activate(instance);
            }
        }

        trace!(group = ?group_id, "Activated group");
        self.activations.fetch_add(1, Ordering::Relaxed);
        self.groups.insert(key, group.clone());
        Some(group)
    }

    /// Flush pending Moka maintenance (capacity eviction).
    pub fn run_pending_tasks(&self) {
        self.groups.run_pending_tasks();
        self.entries.run_pending_tasks();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_entries: self.entries.iter().count() as u64,
            stored_entries: self.store.entries.len() as u64,
            passivations: self.passivations.load(Ordering::Relaxed),
            activations: self.activations.load(Ordering::Relaxed),
        }
    }

    // ==================== Topology ====================

    /// Register a rehash listener.
    pub fn add_rehash_listener(&self, listener: Arc<dyn RehashListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.rehash_listeners.write().push((id, listener));
        id
    }

    /// Deregister a rehash listener. Unknown IDs are ignored.
    pub fn remove_rehash_listener(&self, id: ListenerId) {
        self.rehash_listeners.write().retain(|(lid, _)| *lid != id);
    }

    /// Change the member set and run both rehash phases.
    ///
    /// Returns `false` when nothing changed or the cache is not clustered.
    pub fn rebalance(&self, nodes: &[NodeId]) -> bool {
        if !self.config.mode.is_clustered() {
            return false;
        }

        let _guard = self.rehash_lock.lock();
        let current = self.tracker.snapshot();
        let ring = self.tracker.prepare(nodes);
        if *current.ring == ring {
            return false;
        }

        let local = self.tracker.local_node_id();
        let pending = RingSnapshot {
            ring: Arc::new(ring.clone()),
            generation: current.generation + 1,
        };
        let old = Locality::consistent_hash(current, local);
        let new = Locality::consistent_hash(pending.clone(), local);

        info!(
            cache = %self.config.name,
            node_id = local,
            generation = pending.generation,
            members = ?nodes,
            "Rehash starting"
        );

        let listeners: Vec<_> = self
            .rehash_listeners
            .read()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in &listeners {
            listener.on_pre_rehash(&new);
        }

        self.tracker.install(ring);

        for listener in &listeners {
            listener.on_post_rehash(&old, &new);
        }

        debug!(cache = %self.config.name, generation = pending.generation, "Rehash complete");
        true
    }

    /// Add a member to the ring.
    pub fn join(&self, node_id: NodeId) -> bool {
        let mut nodes = self.tracker.nodes();
        if nodes.contains(&node_id) {
            return false;
        }
        nodes.push(node_id);
        self.rebalance(&nodes)
    }

    /// Remove a member from the ring.
    pub fn leave(&self, node_id: NodeId) -> bool {
        let mut nodes = self.tracker.nodes();
        nodes.retain(|&n| n != node_id);
        self.rebalance(&nodes)
    }
}

impl<I: Identifier, T: BeanInstance> MemberEventListener for BeanCache<I, T> {
    fn on_event(&self, event: MemberEvent) {
        match event {
            MemberEvent::NodeJoin { node_id, .. } => self.join(node_id),
            MemberEvent::NodeLeave { node_id } => self.leave(node_id),
        };
    }
}

impl<I: Identifier, T: BeanInstance> std::fmt::Debug for BeanCache<I, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanCache")
            .field("name", &self.config.name)
            .field("mode", &self.config.mode)
            .field("tracker", &self.tracker)
            .finish()
    }
}

/// Move a group that already left the memory tier, plus its bean entries,
/// into the store.
fn write_out<I: Identifier, T: BeanInstance>(
    store: &PassivationStore<I, T>,
    entries: &Cache<BeanKey<I>, BeanEntry<I>>,
    listener: Option<&dyn PassivationListener<T>>,
    persistent: bool,
    key: &BeanGroupKey<I>,
    mut group: BeanGroupEntry<I, T>,
) {
    if let Some(listener) = listener {
        for instance in group.instances_mut() {
            listener.pre_passivate(instance);
        }
    }

    let ids: Vec<I> = group.ids().cloned().collect();
    for id in ids {
        let bean_key = BeanKey(id);
        if let Some(entry) = entries.remove(&bean_key) {
            if persistent {
                store.entries.insert(bean_key, entry);
            }
        }
    }

    if persistent {
        store.groups.insert(key.clone(), group);
    }
    trace!(group = ?key.id(), persistent, "Group written out of memory");
}
