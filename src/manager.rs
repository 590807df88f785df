//! The bean manager.
//!
//! One [`BeanManager`] serves one bean type on one node. It creates and
//! looks up beans in the [`BeanCache`], keeps the expiration and
//! idle-eviction schedulers consistent with key ownership, and resolves
//! client affinity.
//!
//! # Rehash handling
//!
//! The manager registers a rehash listener on the cache. Both phases are
//! queued to a single worker task so they run in order and never overlap
//! with `stop()`:
//!
//! - pre: drop schedules for beans that will no longer be local
//! - post: schedule in-memory beans that were remote and are now local
//!
//! A pre phase bumps the rehash epoch, which aborts any post phase still
//! queued or running for an earlier topology. The aborted phase's old view
//! is kept and checked by the next post phase, so beans that moved in
//! during the aborted rehash are still picked up.
//!
//! Beans held by a caller are never scheduled by a post phase. They are
//! scheduled when the caller closes them.

use crate::bean::{
    Bean, BeanEntry, BeanInstance, Checkouts, PassivationListener, RemoveListener,
    SchedulableBean,
};
use crate::cache::{BeanCache, Batcher, ListenerId, RehashListener};
use crate::cluster::{Group, PrimaryOwnerLocator};
use crate::config::BeanManagerConfig;
use crate::dispatcher::{channel_name, CommandDispatcher, CommandDispatcherFactory};
use crate::error::{BeanError, Error, Result};
use crate::identifier::{AffinityIdentifierFactory, IdentifierFactory};
use crate::locality::Locality;
use crate::metrics::BeanMetrics;
use crate::scheduler::{
    BeanGroupEvictor, CompositeScheduler, ExpiredBeanRemover, LocalScheduler,
    PrimaryOwnerScheduler, ScheduledTask, Scheduler, SchedulerCommand, SchedulerCommandHandler,
    SchedulerKind,
};
use crate::types::{Affinity, Identifier};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle state of a [`BeanManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Not running.
    Stopped,
    /// `start()` in progress.
    Starting,
    /// Serving beans.
    Started,
    /// `stop()` in progress.
    Stopping,
}

/// Work item for the rehash worker.
enum RehashTask {
    Pre { new: Locality },
    Post { old: Locality, new: Locality, epoch: u64 },
}

/// Forwards cache rehash callbacks to the worker queue.
struct RehashForwarder {
    tasks: mpsc::UnboundedSender<RehashTask>,
    epoch: Arc<AtomicU64>,
    metrics: Arc<BeanMetrics>,
}

impl RehashForwarder {
    fn submit(&self, task: RehashTask) {
        if self.tasks.send(task).is_err() {
            self.metrics.rehash_rejected.inc();
            warn!("Rehash worker is shut down, dropping rehash task");
        }
    }
}

impl RehashListener for RehashForwarder {
    fn on_pre_rehash(&self, new: &Locality) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.submit(RehashTask::Pre { new: new.clone() });
    }

    fn on_post_rehash(&self, old: &Locality, new: &Locality) {
        let epoch = self.epoch.load(Ordering::Acquire);
        self.submit(RehashTask::Post {
            old: old.clone(),
            new: new.clone(),
            epoch,
        });
    }
}

/// Schedule every in-memory bean of type `bean_name` that `new` sees as
/// local and at least one of `old` saw as remote, skipping checked-out
/// beans. Stops early once `proceed` returns false.
fn schedule_moved_in<I: Identifier, T: BeanInstance>(
    bean_name: &str,
    cache: &BeanCache<I, T>,
    scheduler: &dyn Scheduler<I>,
    checkouts: &Checkouts<I>,
    old: &[Locality],
    new: &Locality,
    proceed: impl Fn() -> bool,
) -> (u64, bool) {
    let mut scheduled = 0u64;
    for (id, entry) in cache.local_entries() {
        if !proceed() {
            return (scheduled, false);
        }
        if entry.bean_name() != bean_name || !new.is_local(&id) {
            continue;
        }
        if old.iter().all(|locality| locality.is_local(&id)) {
            continue;
        }
        let key = id.clone();
        if checkouts.unless_checked_out(&key, || scheduler.schedule(id, entry)) {
            scheduled += 1;
        }
    }
    (scheduled, true)
}

/// State owned by the rehash worker task.
struct RehashWorker<I: Identifier, T: BeanInstance> {
    bean_name: String,
    cache: Arc<BeanCache<I, T>>,
    scheduler: Arc<dyn Scheduler<I>>,
    checkouts: Arc<Checkouts<I>>,
    epoch: Arc<AtomicU64>,
    shutdown: CancellationToken,
    metrics: Arc<BeanMetrics>,
    /// Old views of post phases that were aborted.
    unprocessed: Vec<Locality>,
}

impl<I: Identifier, T: BeanInstance> RehashWorker<I, T> {
    async fn run(mut self, mut tasks: mpsc::UnboundedReceiver<RehashTask>) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                task = tasks.recv() => match task {
                    Some(task) => self.process(task),
                    None => break,
                },
            }
            tokio::task::yield_now().await;
        }
        debug!(bean = %self.bean_name, "Rehash worker stopped");
    }

    fn process(&mut self, task: RehashTask) {
        self.metrics.rehash_tasks.inc();
        match task {
            RehashTask::Pre { new } => self.scheduler.cancel_locality(&new),
            RehashTask::Post { old, new, epoch } => self.schedule_new_owned(&old, &new, epoch),
        }
    }

    fn is_superseded(&self, epoch: u64) -> bool {
        self.shutdown.is_cancelled() || self.epoch.load(Ordering::Acquire) != epoch
    }

    /// Schedule beans that were remote under `old`, or under the old view
    /// of any aborted post phase, and are local under `new`.
    fn schedule_new_owned(&mut self, old: &Locality, new: &Locality, epoch: u64) {
        self.unprocessed.push(old.clone());
        if self.is_superseded(epoch) {
            debug!(bean = %self.bean_name, epoch, "Skipping superseded rehash");
            return;
        }

        let (scheduled, complete) = schedule_moved_in(
            &self.bean_name,
            &self.cache,
            self.scheduler.as_ref(),
            &self.checkouts,
            &self.unprocessed,
            new,
            || !self.is_superseded(epoch),
        );
        self.metrics.rehash_scheduled.inc_by(scheduled);

        if complete {
            self.unprocessed.clear();
            debug!(bean = %self.bean_name, epoch, scheduled, "Scheduled beans now owned locally");
        } else {
            debug!(bean = %self.bean_name, epoch, scheduled, "Rehash interrupted");
        }
    }
}

/// Resources that exist only while started.
struct Running<I: Identifier> {
    /// Scheduler the beans see (owner-routing unless singleton).
    scheduler: Arc<dyn Scheduler<I>>,
    listener_id: ListenerId,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

/// Creates, finds, and schedules beans of one type.
pub struct BeanManager<I: Identifier, T: BeanInstance> {
    config: BeanManagerConfig,
    cache: Arc<BeanCache<I, T>>,
    group: Arc<Group>,
    locator: PrimaryOwnerLocator,
    dispatcher_factory: Option<Arc<dyn CommandDispatcherFactory>>,
    identifier_factory: Arc<AffinityIdentifierFactory<I>>,
    passivation_listener: Option<Arc<dyn PassivationListener<T>>>,
    remove_listener: Option<Arc<dyn RemoveListener<T>>>,
    batcher: Batcher,
    checkouts: Arc<Checkouts<I>>,
    metrics: Arc<BeanMetrics>,
    state: RwLock<ManagerState>,
    scheduler: RwLock<Option<Arc<dyn Scheduler<I>>>>,
    running: Mutex<Option<Running<I>>>,
    epoch: Arc<AtomicU64>,
}

impl<I: Identifier, T: BeanInstance> BeanManager<I, T> {
    /// Start building a manager.
    pub fn builder(
        config: BeanManagerConfig,
        cache: Arc<BeanCache<I, T>>,
        group: Arc<Group>,
        identifier_factory: Arc<dyn IdentifierFactory<I>>,
    ) -> BeanManagerBuilder<I, T> {
        BeanManagerBuilder {
            config,
            cache,
            group,
            identifier_factory,
            dispatcher_factory: None,
            passivation_listener: None,
            remove_listener: None,
            metrics: None,
        }
    }

    // ==================== Lifecycle ====================

    /// Current lifecycle state.
    pub fn state(&self) -> ManagerState {
        *self.state.read()
    }

    /// Start serving beans.
    ///
    /// Must be called from within a Tokio runtime. Every in-memory bean of
    /// this type that the local node owns is scheduled.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != ManagerState::Stopped {
                return Err(Error::Internal(format!(
                    "cannot start bean manager while {:?}",
                    *state
                )));
            }
            *state = ManagerState::Starting;
        }

        match self.start_inner() {
            Ok(()) => {
                *self.state.write() = ManagerState::Started;
                info!(
                    bean = %self.config.bean_name,
                    cache = %self.cache.name(),
                    node = %self.group.local_member(),
                    "Bean manager started"
                );
                Ok(())
            }
            Err(e) => {
                self.identifier_factory.stop();
                *self.state.write() = ManagerState::Stopped;
                Err(e)
            }
        }
    }

    fn start_inner(&self) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("bean manager needs a runtime: {}", e)))?;

        self.identifier_factory.start();
        if self.cache.is_persistent() {
            self.cache
                .set_passivation_listener(self.passivation_listener.clone());
        }

        let Some(local) = self.local_scheduler()? else {
            debug!(bean = %self.config.bean_name, "Expiration and eviction disabled");
            return Ok(());
        };
        let scheduler = self.routing_scheduler(local.clone(), &runtime);

        let shutdown = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let listener_id = self.cache.add_rehash_listener(Arc::new(RehashForwarder {
            tasks: tx,
            epoch: self.epoch.clone(),
            metrics: self.metrics.clone(),
        }));

        let worker = RehashWorker {
            bean_name: self.config.bean_name.clone(),
            cache: self.cache.clone(),
            scheduler: local.clone(),
            checkouts: self.checkouts.clone(),
            epoch: self.epoch.clone(),
            shutdown: shutdown.clone(),
            metrics: self.metrics.clone(),
            unprocessed: Vec::new(),
        };
        let worker = runtime.spawn(worker.run(rx));

        // Everything was remote before start. Runs before the state turns
        // `Started`, so bean calls cannot interleave with it.
        let (scheduled, _) = schedule_moved_in(
            &self.config.bean_name,
            &self.cache,
            local.as_ref(),
            &self.checkouts,
            &[Locality::simple(false)],
            &self.cache.locality(),
            || true,
        );
        debug!(bean = %self.config.bean_name, scheduled, "Scheduled locally owned beans");

        *self.scheduler.write() = Some(scheduler.clone());
        *self.running.lock() = Some(Running {
            scheduler,
            listener_id,
            shutdown,
            worker,
        });
        Ok(())
    }

    /// One local scheduler per enabled kind, composed.
    fn local_scheduler(&self) -> Result<Option<Arc<dyn Scheduler<I>>>> {
        let mut schedulers: Vec<Arc<dyn Scheduler<I>>> = Vec::new();
        for kind in SchedulerKind::ALL {
            let timeout = kind.timeout(&self.config.expiration);
            if timeout.is_zero() {
                continue;
            }

            let task: Arc<dyn ScheduledTask<I>> = match kind {
                SchedulerKind::Expiration => Arc::new(ExpiredBeanRemover::new(
                    self.cache.clone(),
                    self.remove_listener.clone(),
                    self.metrics.clone(),
                )),
                SchedulerKind::IdleEviction => Arc::new(BeanGroupEvictor::new(
                    self.cache.clone(),
                    self.metrics.clone(),
                )),
            };
            schedulers.push(Arc::new(LocalScheduler::start(
                kind,
                timeout,
                task,
                self.metrics.clone(),
            )?));
        }

        if schedulers.is_empty() {
            return Ok(None);
        }
        Ok(Some(Arc::new(CompositeScheduler::new(schedulers))))
    }

    /// Front `local` with owner routing, unless the group is a singleton.
    fn routing_scheduler(
        &self,
        local: Arc<dyn Scheduler<I>>,
        runtime: &Handle,
    ) -> Arc<dyn Scheduler<I>> {
        let factory = match &self.dispatcher_factory {
            Some(factory) if !self.group.is_singleton() => factory.clone(),
            _ => return local,
        };

        let dispatcher = CommandDispatcher::<SchedulerCommand<I>>::create(
            factory,
            channel_name(self.cache.name(), &self.config.bean_name),
            self.group.local_member().clone(),
            Arc::new(SchedulerCommandHandler::new(local.clone())),
        );
        Arc::new(PrimaryOwnerScheduler::new(
            local,
            self.locator.clone(),
            Arc::new(dispatcher),
            runtime.clone(),
            self.metrics.clone(),
        ))
    }

    /// Stop serving beans.
    ///
    /// Waits up to the cache's stop timeout for the rehash worker to finish
    /// its current task. Stopping a stopped manager does nothing.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != ManagerState::Started {
                debug!(state = ?*state, "Bean manager not started, nothing to stop");
                return Ok(());
            }
            *state = ManagerState::Stopping;
        }

        let running = self.running.lock().take();
        *self.scheduler.write() = None;

        if let Some(mut running) = running {
            self.cache.remove_rehash_listener(running.listener_id);
            running.shutdown.cancel();

            let timeout = self.cache.stop_timeout();
            if tokio::time::timeout(timeout, &mut running.worker).await.is_err() {
                warn!(?timeout, "Rehash worker did not stop in time, aborting it");
                running.worker.abort();
            }

            running.scheduler.close();
        }

        if self.cache.is_persistent() {
            self.cache.set_passivation_listener(None);
        }
        self.identifier_factory.stop();

        *self.state.write() = ManagerState::Stopped;
        info!(bean = %self.config.bean_name, node = %self.group.local_member(), "Bean manager stopped");
        Ok(())
    }

    fn ensure_started(&self) -> Result<()> {
        match self.state() {
            ManagerState::Started => Ok(()),
            state => Err(BeanError::NotStarted(format!("{:?}", state).to_lowercase()).into()),
        }
    }

    fn current_scheduler(&self) -> Option<Arc<dyn Scheduler<I>>> {
        self.scheduler.read().clone()
    }

    // ==================== Beans ====================

    /// Create a bean.
    ///
    /// A bean whose id equals its group id starts a new group. Any other
    /// bean joins an existing group and fails with
    /// [`BeanError::GroupNotFound`] if there is none.
    pub fn create_bean(&self, id: I, group_id: I, instance: T) -> Result<SchedulableBean<I, T>> {
        self.ensure_started()?;

        let entry = BeanEntry::new(self.config.bean_name.clone(), group_id.clone());
        let create = id == group_id;
        self.checkouts.check_out(&id);
        if !self
            .cache
            .add_bean(id.clone(), entry.clone(), instance.clone(), create)
        {
            self.checkouts.check_in(&id);
            return Err(BeanError::GroupNotFound(format!("{:?}", group_id)).into());
        }

        self.metrics.beans_created.inc();
        debug!(bean_id = ?id, group = ?group_id, "Bean created");
        let bean = Bean::new(id, entry, instance, self.cache.clone());
        Ok(SchedulableBean::checked_out(
            bean,
            self.current_scheduler(),
            self.checkouts.clone(),
        ))
    }

    /// Check out an existing bean, cancelling its pending schedule.
    ///
    /// A passivated bean is activated first. Returns `Ok(None)` if no such
    /// bean exists.
    pub fn find_bean(&self, id: &I) -> Result<Option<SchedulableBean<I, T>>> {
        self.ensure_started()?;

        // Checked out before the lookup, so a rehash running meanwhile
        // cannot schedule the bean behind our cancel.
        self.checkouts.check_out(id);
        let passivated = self.cache.is_passivated(id);
        let Some(entry) = self.cache.find_entry(id) else {
            self.checkouts.check_in(id);
            return Ok(None);
        };
        if passivated {
            self.metrics.groups_activated.inc();
        }
        let Some(instance) = self
            .cache
            .find_group(entry.group_id())
            .and_then(|group| group.get(id).cloned())
        else {
            warn!(bean_id = ?id, group = ?entry.group_id(), "Bean entry without group member");
            self.checkouts.check_in(id);
            return Ok(None);
        };

        let scheduler = self.current_scheduler();
        if let Some(scheduler) = &scheduler {
            scheduler.cancel(id);
        }
        let bean = Bean::new(id.clone(), entry, instance, self.cache.clone());
        Ok(Some(SchedulableBean::checked_out(
            bean,
            scheduler,
            self.checkouts.clone(),
        )))
    }

    /// Remove a checked-out bean, notifying the remove listener.
    pub fn remove_bean(&self, bean: &mut SchedulableBean<I, T>) -> bool {
        let removed = bean.remove(self.remove_listener.as_deref());
        if removed {
            self.metrics.beans_removed.inc();
        }
        removed
    }

    /// Whether a bean exists in memory or in the passivation store.
    pub fn contains_bean(&self, id: &I) -> bool {
        self.cache.contains_entry(id)
    }

    /// Beans of this type held in memory.
    pub fn active_count(&self) -> usize {
        self.cache.active_count(&self.config.bean_name)
    }

    /// Beans of this type held only in the passivation store.
    pub fn passive_count(&self) -> usize {
        self.cache.passive_count(&self.config.bean_name)
    }

    /// Whether `id` has a pending schedule on this node.
    pub fn is_scheduled(&self, id: &I) -> bool {
        self.current_scheduler()
            .map(|s| s.contains(id))
            .unwrap_or(false)
    }

    // ==================== Affinity ====================

    /// Affinity for requests that must stay where the bean lives.
    ///
    /// Clustered caches pin to the cluster, since any member can load the
    /// bean; a local cache pins to this node.
    pub fn strict_affinity(&self) -> Affinity {
        if self.cache.mode().is_clustered() {
            Affinity::Cluster(self.group.name().to_string())
        } else {
            Affinity::Node(self.group.local_member().name.clone())
        }
    }

    /// Preferred node for requests on `id`: its primary owner.
    pub fn weak_affinity(&self, id: &I) -> Affinity {
        if !self.cache.mode().is_clustered() {
            return Affinity::None;
        }
        let owner = self.locator.locate(id);
        match self.group.name_of(owner.id) {
            Some(name) => Affinity::Node(name),
            None => Affinity::None,
        }
    }

    // ==================== Accessors ====================

    /// Identifier generator biased toward locally owned ids.
    pub fn identifier_factory(&self) -> Arc<dyn IdentifierFactory<I>> {
        self.identifier_factory.clone()
    }

    /// Batch factory.
    pub fn batcher(&self) -> &Batcher {
        &self.batcher
    }

    /// Whether a caller on this node currently holds the bean.
    pub fn is_checked_out(&self, id: &I) -> bool {
        self.checkouts.is_checked_out(id)
    }

    /// Manager metrics.
    pub fn metrics(&self) -> &Arc<BeanMetrics> {
        &self.metrics
    }

    /// Backing cache.
    pub fn cache(&self) -> &Arc<BeanCache<I, T>> {
        &self.cache
    }

    /// Manager configuration.
    pub fn config(&self) -> &BeanManagerConfig {
        &self.config
    }
}

impl<I: Identifier, T: BeanInstance> std::fmt::Debug for BeanManager<I, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanManager")
            .field("bean_name", &self.config.bean_name)
            .field("cache", &self.cache.name())
            .field("node", &self.group.local_member().id)
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for [`BeanManager`].
pub struct BeanManagerBuilder<I: Identifier, T: BeanInstance> {
    config: BeanManagerConfig,
    cache: Arc<BeanCache<I, T>>,
    group: Arc<Group>,
    identifier_factory: Arc<dyn IdentifierFactory<I>>,
    dispatcher_factory: Option<Arc<dyn CommandDispatcherFactory>>,
    passivation_listener: Option<Arc<dyn PassivationListener<T>>>,
    remove_listener: Option<Arc<dyn RemoveListener<T>>>,
    metrics: Option<Arc<BeanMetrics>>,
}

impl<I: Identifier, T: BeanInstance> BeanManagerBuilder<I, T> {
    /// Set the transport used to reach other members' schedulers.
    pub fn dispatcher_factory(mut self, factory: Arc<dyn CommandDispatcherFactory>) -> Self {
        self.dispatcher_factory = Some(factory);
        self
    }

    /// Set the listener notified around passivation.
    pub fn passivation_listener(mut self, listener: Arc<dyn PassivationListener<T>>) -> Self {
        self.passivation_listener = Some(listener);
        self
    }

    /// Set the listener notified when beans are removed.
    pub fn remove_listener(mut self, listener: Arc<dyn RemoveListener<T>>) -> Self {
        self.remove_listener = Some(listener);
        self
    }

    /// Set the metrics instance.
    pub fn metrics(mut self, metrics: Arc<BeanMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build a stopped manager.
    pub fn build(self) -> Result<BeanManager<I, T>> {
        let local_id = self.group.local_member().id;
        if self.cache.tracker().local_node_id() != local_id {
            return Err(Error::Config(format!(
                "cache belongs to node {}, group to node {}",
                self.cache.tracker().local_node_id(),
                local_id
            )));
        }
        if !self.group.is_singleton() && self.dispatcher_factory.is_none() {
            return Err(Error::Config(
                "a clustered group needs a command dispatcher factory".into(),
            ));
        }

        let locator = PrimaryOwnerLocator::new(
            self.cache.mode(),
            self.cache.tracker().clone(),
            self.group.clone(),
        );
        let identifier_factory = Arc::new(AffinityIdentifierFactory::new(
            self.identifier_factory,
            self.cache.locality(),
            self.config.affinity_attempts,
        ));

        Ok(BeanManager {
            config: self.config,
            cache: self.cache,
            group: self.group,
            locator,
            dispatcher_factory: self.dispatcher_factory,
            identifier_factory,
            passivation_listener: self.passivation_listener,
            remove_listener: self.remove_listener,
            batcher: Batcher::new(),
            checkouts: Arc::new(Checkouts::new()),
            metrics: self.metrics.unwrap_or_else(|| Arc::new(BeanMetrics::new())),
            state: RwLock::new(ManagerState::Stopped),
            scheduler: RwLock::new(None),
            running: Mutex::new(None),
            epoch: Arc::new(AtomicU64::new(0)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, ExpirationConfig};
    use crate::dispatcher::LocalCommandDispatcherFactory;
    use crate::identifier::UuidIdentifierFactory;
    use crate::types::{CacheMode, Node};
    use std::time::Duration;

    type TestManager = BeanManager<String, Vec<u8>>;

    fn node(id: u64) -> Node {
        Node::new(id, format!("node-{}", id), format!("127.0.0.1:{}", 7600 + id).parse().unwrap())
    }

    fn singleton_manager(expiration: ExpirationConfig) -> TestManager {
        let cache = BeanCache::<String, Vec<u8>>::new(CacheConfig::new("beans", CacheMode::Local), 1);
        let group = Group::singleton("local", node(1));
        let config = BeanManagerConfig::new("Cart").with_expiration(expiration);
        BeanManager::builder(config, cache, group, Arc::new(UuidIdentifierFactory))
            .build()
            .unwrap()
    }

    fn long_timeouts() -> ExpirationConfig {
        ExpirationConfig::new(Duration::from_secs(600), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let manager = singleton_manager(long_timeouts());
        assert_eq!(manager.state(), ManagerState::Stopped);
        assert!(manager.create_bean("B1".into(), "B1".into(), vec![]).is_err());

        manager.start().unwrap();
        assert_eq!(manager.state(), ManagerState::Started);
        assert!(manager.start().is_err());

        manager.stop().await.unwrap();
        assert_eq!(manager.state(), ManagerState::Stopped);
        manager.stop().await.unwrap();

        // Restartable.
        manager.start().unwrap();
        manager.stop().await.unwrap();
    }

    #[test]
    fn test_start_requires_runtime() {
        let manager = singleton_manager(long_timeouts());
        assert!(manager.start().is_err());
        assert_eq!(manager.state(), ManagerState::Stopped);
    }

    #[test]
    fn test_clustered_group_requires_dispatcher() {
        let cache = BeanCache::<String, Vec<u8>>::new(CacheConfig::default(), 1);
        let group = Group::new("ejb", node(1));
        let result = BeanManager::builder(
            BeanManagerConfig::new("Cart"),
            cache,
            group,
            Arc::new(UuidIdentifierFactory),
        )
        .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_node_mismatch_rejected() {
        let cache = BeanCache::<String, Vec<u8>>::new(CacheConfig::new("beans", CacheMode::Local), 2);
        let result = BeanManager::builder(
            BeanManagerConfig::new("Cart"),
            cache,
            Group::singleton("local", node(1)),
            Arc::new(UuidIdentifierFactory),
        )
        .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let manager = singleton_manager(long_timeouts());
        manager.start().unwrap();

        let mut bean = manager
            .create_bean("B1".into(), "B1".into(), vec![1])
            .unwrap();
        bean.instance_mut().push(2);
        bean.close().unwrap();
        assert!(manager.is_scheduled(&"B1".to_string()));

        let found = manager.find_bean(&"B1".to_string()).unwrap().unwrap();
        assert_eq!(found.instance(), &vec![1, 2]);
        assert!(!manager.is_scheduled(&"B1".to_string()));

        assert!(manager.find_bean(&"missing".to_string()).unwrap().is_none());
        assert!(manager.contains_bean(&"B1".to_string()));
        assert_eq!(manager.active_count(), 1);
        assert_eq!(manager.passive_count(), 0);

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_group_membership() {
        let manager = singleton_manager(long_timeouts());
        manager.start().unwrap();

        let err = manager
            .create_bean("B2".into(), "G1".into(), vec![])
            .unwrap_err();
        assert!(matches!(err, Error::Bean(BeanError::GroupNotFound(_))));
        assert!(!manager.contains_bean(&"B2".to_string()));

        manager
            .create_bean("G1".into(), "G1".into(), vec![])
            .unwrap()
            .close()
            .unwrap();
        let member = manager
            .create_bean("B2".into(), "G1".into(), vec![2])
            .unwrap();
        assert_eq!(member.group_id(), "G1");
        assert_eq!(manager.active_count(), 2);

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_bean() {
        let manager = singleton_manager(long_timeouts());
        manager.start().unwrap();

        let mut bean = manager.create_bean("B1".into(), "B1".into(), vec![]).unwrap();
        bean.close().unwrap();
        let mut bean = manager.find_bean(&"B1".to_string()).unwrap().unwrap();
        assert!(manager.remove_bean(&mut bean));
        assert!(!manager.remove_bean(&mut bean));
        assert!(!manager.contains_bean(&"B1".to_string()));
        assert_eq!(manager.metrics().beans_removed.get(), 1);

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_schedules_existing_beans() {
        let manager = singleton_manager(long_timeouts());
        let mut entry = BeanEntry::new("Cart", "B1".to_string());
        entry.set_last_accessed(std::time::SystemTime::now());
        manager.cache().add_bean("B1".into(), entry, vec![], true);
        let other = BeanEntry::new("Order", "O1".to_string());
        manager.cache().add_bean("O1".into(), other, vec![], true);

        manager.start().unwrap();
        assert!(manager.is_scheduled(&"B1".to_string()));
        assert!(!manager.is_scheduled(&"O1".to_string()));

        manager.stop().await.unwrap();
        assert!(!manager.is_scheduled(&"B1".to_string()));
    }

    #[tokio::test]
    async fn test_found_bean_stays_unscheduled_after_start() {
        let manager = singleton_manager(long_timeouts());
        manager.start().unwrap();
        let id = "B1".to_string();

        manager.create_bean(id.clone(), id.clone(), vec![]).unwrap().close().unwrap();
        let mut bean = manager.find_bean(&id).unwrap().unwrap();
        assert!(manager.is_checked_out(&id));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!manager.is_scheduled(&id));

        bean.close().unwrap();
        assert!(manager.is_scheduled(&id));
        assert!(!manager.is_checked_out(&id));

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_lookups_release_checkout() {
        let manager = singleton_manager(long_timeouts());
        manager.start().unwrap();

        assert!(manager.find_bean(&"missing".to_string()).unwrap().is_none());
        assert!(!manager.is_checked_out(&"missing".to_string()));
        assert!(manager.create_bean("B2".into(), "G9".into(), vec![]).is_err());
        assert!(!manager.is_checked_out(&"B2".to_string()));

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_timeouts_schedule_nothing() {
        let manager = singleton_manager(ExpirationConfig::default());
        manager.start().unwrap();

        let mut bean = manager.create_bean("B1".into(), "B1".into(), vec![]).unwrap();
        bean.close().unwrap();
        assert!(!manager.is_scheduled(&"B1".to_string()));

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_affinity_local_cache() {
        let manager = singleton_manager(long_timeouts());
        assert_eq!(manager.strict_affinity(), Affinity::Node("node-1".into()));
        assert_eq!(manager.weak_affinity(&"B1".to_string()), Affinity::None);
    }

    #[tokio::test]
    async fn test_affinity_clustered_cache() {
        let cache = BeanCache::<String, Vec<u8>>::new(CacheConfig::default(), 1);
        let group = Group::new("ejb", node(1));
        group.add_member(node(2)).unwrap();
        cache.rebalance(&[1, 2]);

        let manager = BeanManager::builder(
            BeanManagerConfig::new("Cart"),
            cache.clone(),
            group,
            Arc::new(UuidIdentifierFactory),
        )
        .dispatcher_factory(LocalCommandDispatcherFactory::new())
        .build()
        .unwrap();

        assert_eq!(manager.strict_affinity(), Affinity::Cluster("ejb".into()));
        let owner = cache.tracker().get_primary(&"B1".to_string()).unwrap();
        assert_eq!(
            manager.weak_affinity(&"B1".to_string()),
            Affinity::Node(format!("node-{}", owner))
        );
    }

    #[tokio::test]
    async fn test_identifier_factory_follows_lifecycle() {
        let manager = singleton_manager(long_timeouts());
        let factory = manager.identifier_factory();
        assert!(factory.create_identifier().is_err());

        manager.start().unwrap();
        let id = factory.create_identifier().unwrap();
        assert!(!id.is_empty());

        manager.stop().await.unwrap();
        assert!(factory.create_identifier().is_err());
    }
}
