//! Routing of schedule requests to each bean's primary owner.

use crate::bean::ImmutableBeanEntry;
use crate::cluster::PrimaryOwnerLocator;
use crate::dispatcher::{CommandDispatcher, CommandHandler};
use crate::error::DispatchError;
use crate::locality::Locality;
use crate::metrics::BeanMetrics;
use crate::scheduler::Scheduler;
use crate::types::{Identifier, Node};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{trace, warn};

/// Scheduler request executed on the primary owner of a bean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerCommand<I> {
    /// Schedule the bean.
    Schedule {
        id: I,
        entry: ImmutableBeanEntry<I>,
    },
    /// Cancel the bean's schedule.
    Cancel { id: I },
}

impl<I> SchedulerCommand<I> {
    /// The bean the command is about.
    pub fn id(&self) -> &I {
        match self {
            SchedulerCommand::Schedule { id, .. } | SchedulerCommand::Cancel { id } => id,
        }
    }
}

/// Applies received [`SchedulerCommand`]s to the local scheduler.
pub struct SchedulerCommandHandler<I: Identifier> {
    scheduler: Arc<dyn Scheduler<I>>,
}

impl<I: Identifier> SchedulerCommandHandler<I> {
    /// Handle commands with `scheduler`.
    pub fn new(scheduler: Arc<dyn Scheduler<I>>) -> Self {
        Self { scheduler }
    }
}

impl<I: Identifier> CommandHandler<SchedulerCommand<I>> for SchedulerCommandHandler<I> {
    fn handle(&self, command: SchedulerCommand<I>) -> Result<(), DispatchError> {
        trace!(bean_id = ?command.id(), "Received scheduler command");
        match command {
            SchedulerCommand::Schedule { id, entry } => self.scheduler.schedule(id, entry),
            SchedulerCommand::Cancel { id } => self.scheduler.cancel(&id),
        }
        Ok(())
    }
}

/// Sends each schedule and cancel to the bean's primary owner.
///
/// Requests for beans owned here go straight to the local scheduler. Remote
/// requests are sent in the background; a failed send is logged and counted,
/// never reported to the caller.
pub struct PrimaryOwnerScheduler<I: Identifier> {
    local: Arc<dyn Scheduler<I>>,
    locator: PrimaryOwnerLocator,
    dispatcher: Arc<CommandDispatcher<SchedulerCommand<I>>>,
    runtime: Handle,
    metrics: Arc<BeanMetrics>,
}

impl<I: Identifier> PrimaryOwnerScheduler<I> {
    /// Wrap `local`, routing through `dispatcher`.
    ///
    /// Background sends run on `runtime`.
    pub fn new(
        local: Arc<dyn Scheduler<I>>,
        locator: PrimaryOwnerLocator,
        dispatcher: Arc<CommandDispatcher<SchedulerCommand<I>>>,
        runtime: Handle,
        metrics: Arc<BeanMetrics>,
    ) -> Self {
        Self {
            local,
            locator,
            dispatcher,
            runtime,
            metrics,
        }
    }

    fn route(&self, command: SchedulerCommand<I>) {
        let owner = self.locator.locate(command.id());
        if self.locator.is_local_member(&owner) {
            self.metrics.local_schedules.inc();
            match command {
                SchedulerCommand::Schedule { id, entry } => self.local.schedule(id, entry),
                SchedulerCommand::Cancel { id } => self.local.cancel(&id),
            }
            return;
        }

        self.metrics.remote_dispatches.inc();
        let dispatcher = self.dispatcher.clone();
        let metrics = self.metrics.clone();
        self.runtime.spawn(async move {
            send(&dispatcher, &owner, &command, &metrics).await;
        });
    }
}

async fn send<I: Identifier>(
    dispatcher: &CommandDispatcher<SchedulerCommand<I>>,
    owner: &Node,
    command: &SchedulerCommand<I>,
    metrics: &BeanMetrics,
) {
    if let Err(e) = dispatcher.execute_on_member(owner, command).await {
        metrics.record_dispatch_failure(&e);
        warn!(
            bean_id = ?command.id(),
            owner = %owner,
            error = %e,
            "Failed to dispatch scheduler command to primary owner"
        );
    }
}

impl<I: Identifier> Scheduler<I> for PrimaryOwnerScheduler<I> {
    fn schedule(&self, id: I, entry: ImmutableBeanEntry<I>) {
        self.route(SchedulerCommand::Schedule { id, entry });
    }

    fn cancel(&self, id: &I) {
        self.route(SchedulerCommand::Cancel { id: id.clone() });
    }

    fn cancel_locality(&self, locality: &Locality) {
        self.local.cancel_locality(locality);
    }

    fn contains(&self, id: &I) -> bool {
        self.local.contains(id)
    }

    fn close(&self) {
        self.dispatcher.close();
        self.local.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Group;
    use crate::dispatcher::{channel_name, CommandDispatcherFactory, LocalCommandDispatcherFactory};
    use crate::partitioning::OwnershipTracker;
    use crate::testing::utils::wait_for;
    use crate::types::{CacheMode, NodeId};
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::time::Duration;

    #[derive(Default)]
    struct SetScheduler(Mutex<HashSet<String>>);

    impl Scheduler<String> for SetScheduler {
        fn schedule(&self, id: String, _entry: ImmutableBeanEntry<String>) {
            self.0.lock().insert(id);
        }

        fn cancel(&self, id: &String) {
            self.0.lock().remove(id);
        }

        fn cancel_locality(&self, _locality: &Locality) {}

        fn contains(&self, id: &String) -> bool {
            self.0.lock().contains(id)
        }

        fn close(&self) {
            self.0.lock().clear();
        }
    }

    fn node(id: NodeId) -> Node {
        Node::new(id, format!("node-{}", id), format!("127.0.0.1:{}", 7600 + id).parse().unwrap())
    }

    struct Member {
        local: Arc<SetScheduler>,
        scheduler: PrimaryOwnerScheduler<String>,
        metrics: Arc<BeanMetrics>,
    }

    /// Two members sharing a ring of `ring_nodes`.
    fn member(
        id: NodeId,
        ring_nodes: &[NodeId],
        factory: &Arc<LocalCommandDispatcherFactory>,
    ) -> Member {
        let group = Group::new("ejb", node(id));
        for other in [1, 2] {
            if other != id {
                group.add_member(node(other)).unwrap();
            }
        }
        let tracker = Arc::new(OwnershipTracker::new(id, 1));
        tracker.set_nodes(ring_nodes);
        let locator = PrimaryOwnerLocator::new(CacheMode::Distributed, tracker, group);

        let local = Arc::new(SetScheduler::default());
        let factory: Arc<dyn CommandDispatcherFactory> = factory.clone();
        let dispatcher = Arc::new(CommandDispatcher::<SchedulerCommand<String>>::create(
            factory,
            channel_name("beans", "Cart"),
            node(id),
            Arc::new(SchedulerCommandHandler::<String>::new(local.clone())),
        ));
        let metrics = Arc::new(BeanMetrics::new());
        let scheduler = PrimaryOwnerScheduler::<String>::new(
            local.clone(),
            locator,
            dispatcher,
            Handle::current(),
            metrics.clone(),
        );
        Member {
            local,
            scheduler,
            metrics,
        }
    }

    fn entry() -> ImmutableBeanEntry<String> {
        ImmutableBeanEntry::new("Cart", "B1".to_string())
    }

    #[tokio::test]
    async fn test_local_owner_schedules_directly() {
        let factory = LocalCommandDispatcherFactory::new();
        let a = member(1, &[1], &factory);

        a.scheduler.schedule("B1".to_string(), entry());
        assert!(a.local.contains(&"B1".to_string()));
        assert_eq!(factory.dispatch_count(), 0);
        assert_eq!(a.metrics.local_schedules.get(), 1);

        a.scheduler.cancel(&"B1".to_string());
        assert!(!a.scheduler.contains(&"B1".to_string()));
    }

    #[tokio::test]
    async fn test_remote_owner_receives_command() {
        let factory = LocalCommandDispatcherFactory::new();
        let a = member(1, &[2], &factory);
        let b = member(2, &[2], &factory);

        a.scheduler.schedule("B1".to_string(), entry());
        assert!(wait_for(Duration::from_secs(2), || b.local.contains(&"B1".to_string())).await);
        assert!(!a.local.contains(&"B1".to_string()));
        assert_eq!(a.metrics.remote_dispatches.get(), 1);

        a.scheduler.cancel(&"B1".to_string());
        assert!(wait_for(Duration::from_secs(2), || !b.local.contains(&"B1".to_string())).await);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_swallowed() {
        let factory = LocalCommandDispatcherFactory::new();
        let a = member(1, &[2], &factory);

        // Node 2 never registered a handler.
        a.scheduler.schedule("B1".to_string(), entry());
        assert!(wait_for(Duration::from_secs(2), || a.metrics.dispatch_failures.total() == 1).await);
        assert_eq!(a.metrics.dispatch_failures.get(["unreachable"]), 1);
        assert!(!a.local.contains(&"B1".to_string()));
    }

    #[tokio::test]
    async fn test_close_unregisters() {
        let factory = LocalCommandDispatcherFactory::new();
        let a = member(1, &[1], &factory);
        assert!(factory.is_registered("beans/Cart", 1));

        a.scheduler.schedule("B1".to_string(), entry());
        a.scheduler.close();
        assert!(!factory.is_registered("beans/Cart", 1));
        assert!(!a.local.contains(&"B1".to_string()));
    }
}
