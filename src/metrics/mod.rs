//! Bean manager metrics.
//!
//! Plain atomic counters and gauges, one [`BeanMetrics`] per manager. There
//! is no exporter; callers read a [`MetricsSnapshot`] or render the text
//! exposition format with [`BeanMetrics::to_prometheus`].

mod counters;
mod gauges;

pub use counters::{Counter, LabeledCounter};
pub use gauges::Gauge;

use crate::error::DispatchError;

/// Metrics for one bean manager.
#[derive(Debug)]
pub struct BeanMetrics {
    // Bean lifecycle
    /// Beans created.
    pub beans_created: Counter,
    /// Beans removed explicitly.
    pub beans_removed: Counter,
    /// Beans removed by the expiration scheduler.
    pub beans_expired: Counter,
    /// Groups passivated by the idle-eviction scheduler.
    pub groups_passivated: Counter,
    /// Passivated groups loaded back on lookup.
    pub groups_activated: Counter,

    // Scheduling
    /// Schedule or cancel requests applied locally.
    pub local_schedules: Counter,
    /// Schedule or cancel requests sent to another member.
    pub remote_dispatches: Counter,
    /// Remote requests that failed, by reason.
    pub dispatch_failures: LabeledCounter<1>,
    /// Entries currently waiting in the local schedulers.
    pub scheduled_entries: Gauge,

    // Rehash
    /// Rehash phases processed by the worker.
    pub rehash_tasks: Counter,
    /// Rehash phases dropped because the worker was gone.
    pub rehash_rejected: Counter,
    /// Beans scheduled because they moved onto this node.
    pub rehash_scheduled: Counter,
}

impl BeanMetrics {
    /// Create a new metrics instance.
    pub fn new() -> Self {
        Self {
            beans_created: Counter::new("beans_created_total", "Beans created"),
            beans_removed: Counter::new("beans_removed_total", "Beans removed explicitly"),
            beans_expired: Counter::new("beans_expired_total", "Beans removed on expiration"),
            groups_passivated: Counter::new(
                "bean_groups_passivated_total",
                "Bean groups passivated on idle timeout",
            ),
            groups_activated: Counter::new(
                "bean_groups_activated_total",
                "Passivated bean groups activated on lookup",
            ),
            local_schedules: Counter::new(
                "scheduler_local_total",
                "Schedule and cancel requests applied locally",
            ),
            remote_dispatches: Counter::new(
                "scheduler_remote_total",
                "Schedule and cancel requests sent to the primary owner",
            ),
            dispatch_failures: LabeledCounter::new(
                "scheduler_dispatch_failures_total",
                "Failed remote scheduler requests by reason",
                ["reason"],
            ),
            scheduled_entries: Gauge::new("scheduler_entries", "Pending scheduled entries"),
            rehash_tasks: Counter::new("rehash_tasks_total", "Rehash phases processed"),
            rehash_rejected: Counter::new(
                "rehash_rejected_total",
                "Rehash phases dropped during shutdown",
            ),
            rehash_scheduled: Counter::new(
                "rehash_scheduled_total",
                "Beans scheduled after moving onto this node",
            ),
        }
    }

    /// Record a failed remote scheduler request.
    pub fn record_dispatch_failure(&self, error: &DispatchError) {
        let reason = match error {
            DispatchError::Unreachable { .. } => "unreachable",
            DispatchError::Rejected { .. } => "rejected",
            DispatchError::Marshalling(_) => "marshalling",
        };
        self.dispatch_failures.inc([reason]);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            beans_created: self.beans_created.get(),
            beans_removed: self.beans_removed.get(),
            beans_expired: self.beans_expired.get(),
            groups_passivated: self.groups_passivated.get(),
            groups_activated: self.groups_activated.get(),
            local_schedules: self.local_schedules.get(),
            remote_dispatches: self.remote_dispatches.get(),
            dispatch_failures: self.dispatch_failures.total(),
            scheduled_entries: self.scheduled_entries.get(),
            rehash_tasks: self.rehash_tasks.get(),
            rehash_rejected: self.rehash_rejected.get(),
            rehash_scheduled: self.rehash_scheduled.get(),
        }
    }

    /// Format metrics in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        for counter in [
            &self.beans_created,
            &self.beans_removed,
            &self.beans_expired,
            &self.groups_passivated,
            &self.groups_activated,
            &self.local_schedules,
            &self.remote_dispatches,
            &self.rehash_tasks,
            &self.rehash_rejected,
            &self.rehash_scheduled,
        ] {
            counter.render(&mut output);
        }
        self.scheduled_entries.render(&mut output);
        self.dispatch_failures.render(&mut output);
        output
    }
}

impl Default for BeanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`BeanMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub beans_created: u64,
    pub beans_removed: u64,
    pub beans_expired: u64,
    pub groups_passivated: u64,
    pub groups_activated: u64,
    pub local_schedules: u64,
    pub remote_dispatches: u64,
    pub dispatch_failures: u64,
    pub scheduled_entries: i64,
    pub rehash_tasks: u64,
    pub rehash_rejected: u64,
    pub rehash_scheduled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = BeanMetrics::new();
        metrics.beans_created.inc();
        metrics.remote_dispatches.inc_by(3);
        metrics.record_dispatch_failure(&DispatchError::Unreachable {
            channel: "beans/Cart".into(),
            node: 2,
        });
        metrics.record_dispatch_failure(&DispatchError::Marshalling("eof".into()));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.beans_created, 1);
        assert_eq!(snapshot.remote_dispatches, 3);
        assert_eq!(snapshot.dispatch_failures, 2);
        assert_eq!(metrics.dispatch_failures.get(["unreachable"]), 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = BeanMetrics::new();
        metrics.beans_expired.inc();
        metrics.record_dispatch_failure(&DispatchError::Rejected {
            node: 2,
            reason: "closed".into(),
        });

        let output = metrics.to_prometheus();
        assert!(output.contains("# TYPE beans_expired_total counter"));
        assert!(output.contains("beans_expired_total 1"));
        assert!(output.contains("# TYPE scheduler_entries gauge"));
        assert!(output.contains("scheduler_dispatch_failures_total{reason=\"rejected\"} 1"));
    }
}
