//! Timer-driven scheduler for beans owned by this node.

use crate::bean::ImmutableBeanEntry;
use crate::error::{Error, Result};
use crate::locality::Locality;
use crate::metrics::BeanMetrics;
use crate::scheduler::{ScheduledTask, Scheduler, SchedulerKind};
use crate::types::Identifier;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Ordering key of a pending entry. The sequence number breaks ties between
/// equal deadlines.
type Slot = (Instant, u64);

/// Pending entries ordered by deadline, indexed by bean.
struct Pending<I> {
    by_deadline: BTreeMap<Slot, (I, ImmutableBeanEntry<I>)>,
    index: HashMap<I, Slot>,
    seq: u64,
    closed: bool,
}

impl<I: Identifier> Pending<I> {
    fn new() -> Self {
        Self {
            by_deadline: BTreeMap::new(),
            index: HashMap::new(),
            seq: 0,
            closed: false,
        }
    }

    /// Insert or replace. Returns `true` if `id` was not pending before.
    fn insert(&mut self, id: I, entry: ImmutableBeanEntry<I>, deadline: Instant) -> bool {
        let replaced = self.remove(&id);
        self.seq += 1;
        let slot = (deadline, self.seq);
        self.by_deadline.insert(slot, (id.clone(), entry));
        self.index.insert(id, slot);
        !replaced
    }

    fn remove(&mut self, id: &I) -> bool {
        match self.index.remove(id) {
            Some(slot) => {
                self.by_deadline.remove(&slot);
                true
            }
            None => false,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
    }

    fn pop_due(&mut self, now: Instant) -> Vec<(I, ImmutableBeanEntry<I>)> {
        let mut due = Vec::new();
        while let Some(((deadline, _), _)) = self.by_deadline.first_key_value() {
            if *deadline > now {
                break;
            }
            if let Some((_, (id, entry))) = self.by_deadline.pop_first() {
                self.index.remove(&id);
                due.push((id, entry));
            }
        }
        due
    }

    /// Keep only entries whose bean satisfies `keep`. Returns how many were
    /// dropped.
    fn retain(&mut self, mut keep: impl FnMut(&I) -> bool) -> usize {
        let dropped: Vec<I> = self
            .index
            .keys()
            .filter(|id| !keep(id))
            .cloned()
            .collect();
        for id in &dropped {
            self.remove(id);
        }
        dropped.len()
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn clear(&mut self) -> usize {
        let len = self.len();
        self.by_deadline.clear();
        self.index.clear();
        len
    }
}

/// State shared with the timer task.
struct Shared<I> {
    kind: SchedulerKind,
    pending: Mutex<Pending<I>>,
    wakeup: Notify,
    metrics: Arc<BeanMetrics>,
}

/// Fires a [`ScheduledTask`] for each bean once its timeout has elapsed
/// since the bean was last closed.
///
/// Scheduling an already-pending bean replaces its deadline. The timer runs
/// on its own Tokio task; callers never wait on it.
pub struct LocalScheduler<I: Identifier> {
    timeout: Duration,
    shared: Arc<Shared<I>>,
    shutdown: CancellationToken,
}

impl<I: Identifier> LocalScheduler<I> {
    /// Start a scheduler on the current Tokio runtime.
    pub fn start(
        kind: SchedulerKind,
        timeout: Duration,
        task: Arc<dyn ScheduledTask<I>>,
        metrics: Arc<BeanMetrics>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("{} scheduler needs a runtime: {}", kind, e)))?;

        let shared = Arc::new(Shared {
            kind,
            pending: Mutex::new(Pending::new()),
            wakeup: Notify::new(),
            metrics,
        });
        let shutdown = CancellationToken::new();

        runtime.spawn(run_timer(shared.clone(), task, shutdown.clone()));
        debug!(%kind, ?timeout, "Scheduler started");

        Ok(Self {
            timeout,
            shared,
            shutdown,
        })
    }

    /// What this scheduler is for.
    pub fn kind(&self) -> SchedulerKind {
        self.shared.kind
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<I: Identifier> Scheduler<I> for LocalScheduler<I> {
    fn schedule(&self, id: I, entry: ImmutableBeanEntry<I>) {
        let remaining = entry.remaining(self.timeout, SystemTime::now());
        let deadline = Instant::now() + remaining;

        let mut pending = self.shared.pending.lock();
        if pending.closed {
            trace!(kind = %self.shared.kind, bean_id = ?id, "Scheduler closed, ignoring schedule");
            return;
        }
        trace!(kind = %self.shared.kind, bean_id = ?id, ?remaining, "Scheduling bean");
        if pending.insert(id, entry, deadline) {
            self.shared.metrics.scheduled_entries.inc();
        }
        drop(pending);

        self.shared.wakeup.notify_one();
    }

    fn cancel(&self, id: &I) {
        if self.shared.pending.lock().remove(id) {
            trace!(kind = %self.shared.kind, bean_id = ?id, "Cancelled schedule");
            self.shared.metrics.scheduled_entries.dec();
        }
    }

    fn cancel_locality(&self, locality: &Locality) {
        let dropped = self.shared.pending.lock().retain(|id| locality.is_local(id));
        if dropped > 0 {
            debug!(kind = %self.shared.kind, dropped, "Cancelled schedules for beans moving away");
            self.shared.metrics.scheduled_entries.sub(dropped as i64);
        }
    }

    fn contains(&self, id: &I) -> bool {
        self.shared.pending.lock().index.contains_key(id)
    }

    fn close(&self) {
        let dropped = {
            let mut pending = self.shared.pending.lock();
            pending.closed = true;
            pending.clear()
        };
        self.shared.metrics.scheduled_entries.sub(dropped as i64);
        self.shutdown.cancel();
        debug!(kind = %self.shared.kind, dropped, "Scheduler closed");
    }
}

impl<I: Identifier> Drop for LocalScheduler<I> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<I: Identifier> std::fmt::Debug for LocalScheduler<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalScheduler")
            .field("kind", &self.shared.kind)
            .field("timeout", &self.timeout)
            .field("pending", &self.len())
            .finish()
    }
}

/// Sleep until the earliest deadline, fire what is due, repeat.
async fn run_timer<I: Identifier>(
    shared: Arc<Shared<I>>,
    task: Arc<dyn ScheduledTask<I>>,
    shutdown: CancellationToken,
) {
    loop {
        let next = shared.pending.lock().next_deadline();
        let timer = async move {
            match next {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = shared.wakeup.notified() => {}
            _ = timer => {
                let due = shared.pending.lock().pop_due(Instant::now());
                for (id, entry) in due {
                    shared.metrics.scheduled_entries.dec();
                    let applied = task.execute(&id, &entry);
                    trace!(kind = %shared.kind, bean_id = ?id, applied, "Schedule fired");
                }
            }
        }
    }

    debug!(kind = %shared.kind, "Scheduler timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioning::{HashRing, RingSnapshot};
    use crate::testing::utils::wait_for;

    #[derive(Default)]
    struct Fired(Mutex<Vec<String>>);

    impl ScheduledTask<String> for Fired {
        fn execute(&self, id: &String, _scheduled: &ImmutableBeanEntry<String>) -> bool {
            self.0.lock().push(id.clone());
            true
        }
    }

    fn released(group: &str) -> ImmutableBeanEntry<String> {
        let mut entry = ImmutableBeanEntry::new("Cart", group.to_string());
        entry.set_last_accessed(SystemTime::now());
        entry
    }

    fn scheduler(timeout: Duration) -> (LocalScheduler<String>, Arc<Fired>, Arc<BeanMetrics>) {
        let fired = Arc::new(Fired::default());
        let metrics = Arc::new(BeanMetrics::new());
        let scheduler = LocalScheduler::start(
            SchedulerKind::Expiration,
            timeout,
            fired.clone(),
            metrics.clone(),
        )
        .unwrap();
        (scheduler, fired, metrics)
    }

    #[test]
    fn test_requires_runtime() {
        let result = LocalScheduler::<String>::start(
            SchedulerKind::Expiration,
            Duration::from_secs(1),
            Arc::new(Fired::default()),
            Arc::new(BeanMetrics::new()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fires_once() {
        let (scheduler, fired, metrics) = scheduler(Duration::from_millis(50));
        scheduler.schedule("B1".to_string(), released("B1"));
        assert!(scheduler.contains(&"B1".to_string()));
        assert_eq!(metrics.scheduled_entries.get(), 1);

        assert!(wait_for(Duration::from_secs(2), || fired.0.lock().len() == 1).await);
        assert!(!scheduler.contains(&"B1".to_string()));
        assert_eq!(metrics.scheduled_entries.get(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (scheduler, fired, metrics) = scheduler(Duration::from_millis(50));
        scheduler.cancel(&"missing".to_string());

        scheduler.schedule("B1".to_string(), released("B1"));
        scheduler.cancel(&"B1".to_string());
        scheduler.cancel(&"B1".to_string());
        assert!(scheduler.is_empty());
        assert_eq!(metrics.scheduled_entries.get(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(fired.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reschedule_replaces() {
        let (scheduler, fired, metrics) = scheduler(Duration::from_secs(60));
        scheduler.schedule("B1".to_string(), released("B1"));
        scheduler.schedule("B1".to_string(), released("B1"));
        assert_eq!(scheduler.len(), 1);
        assert_eq!(metrics.scheduled_entries.get(), 1);
        assert!(fired.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_earlier_deadline_wakes_timer() {
        let (scheduler, fired, _) = scheduler(Duration::from_secs(60));
        scheduler.schedule("late".to_string(), released("late"));

        // Released long ago: due immediately.
        let mut stale = ImmutableBeanEntry::new("Cart", "early".to_string());
        stale.set_last_accessed(SystemTime::now() - Duration::from_secs(120));
        scheduler.schedule("early".to_string(), stale);

        assert!(wait_for(Duration::from_secs(2), || !fired.0.lock().is_empty()).await);
        assert_eq!(*fired.0.lock(), vec!["early".to_string()]);
        assert!(scheduler.contains(&"late".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_locality() {
        let (scheduler, _, metrics) = scheduler(Duration::from_secs(60));
        for id in ["B1", "B2", "B3", "B4"] {
            scheduler.schedule(id.to_string(), released(id));
        }

        scheduler.cancel_locality(&Locality::simple(true));
        assert_eq!(scheduler.len(), 4);

        let ring = HashRing::new(1).rebuilt(&[1, 2]);
        let snapshot = RingSnapshot {
            ring: Arc::new(ring.clone()),
            generation: 1,
        };
        let locality = Locality::consistent_hash(snapshot, 1);
        scheduler.cancel_locality(&locality);

        for id in ["B1", "B2", "B3", "B4"] {
            let local = ring.get_primary(&id.to_string()) == Some(1);
            assert_eq!(scheduler.contains(&id.to_string()), local);
        }
        assert_eq!(metrics.scheduled_entries.get(), scheduler.len() as i64);

        scheduler.cancel_locality(&Locality::simple(false));
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_close_drops_pending() {
        let (scheduler, fired, metrics) = scheduler(Duration::from_millis(20));
        scheduler.schedule("B1".to_string(), released("B1"));
        scheduler.close();
        scheduler.schedule("B2".to_string(), released("B2"));

        assert!(scheduler.is_empty());
        assert_eq!(metrics.scheduled_entries.get(), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fired.0.lock().is_empty());
    }
}
