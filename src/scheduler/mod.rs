//! Expiration and idle-eviction scheduling.
//!
//! Released beans are handed to a [`Scheduler`], which fires a
//! [`ScheduledTask`] once the configured timeout has passed since the bean
//! was last closed. A manager runs one [`LocalScheduler`] per enabled
//! [`SchedulerKind`], joined by a [`CompositeScheduler`] and, in a clustered
//! group, fronted by a [`PrimaryOwnerScheduler`] so each bean is only ever
//! scheduled on its primary owner.
//!
//! ```text
//! SchedulableBean::close
//!         │
//!         ▼
//! PrimaryOwnerScheduler ── remote owner ──► SchedulerCommand ──► owner's
//!         │ local owner                                          composite
//!         ▼
//! CompositeScheduler ──► LocalScheduler(Expiration)   ──► ExpiredBeanRemover
//!                   └──► LocalScheduler(IdleEviction) ──► BeanGroupEvictor
//! ```

pub mod composite;
pub mod local;
pub mod primary_owner;
pub mod tasks;

pub use composite::CompositeScheduler;
pub use local::LocalScheduler;
pub use primary_owner::{PrimaryOwnerScheduler, SchedulerCommand, SchedulerCommandHandler};
pub use tasks::{BeanGroupEvictor, ExpiredBeanRemover};

use crate::bean::ImmutableBeanEntry;
use crate::config::ExpirationConfig;
use crate::locality::Locality;
use crate::types::Identifier;
use std::fmt;
use std::time::Duration;

/// Tracks pending timed actions per bean.
pub trait Scheduler<I: Identifier>: Send + Sync {
    /// Schedule `id`, replacing any pending schedule for it.
    fn schedule(&self, id: I, entry: ImmutableBeanEntry<I>);

    /// Drop the pending schedule for `id`. No-op if there is none.
    fn cancel(&self, id: &I);

    /// Drop every pending schedule whose bean is not local under `locality`.
    fn cancel_locality(&self, locality: &Locality);

    /// Whether `id` has a pending schedule on this node.
    fn contains(&self, id: &I) -> bool;

    /// Stop firing and drop everything pending.
    fn close(&self);
}

/// Action run when a schedule fires.
pub trait ScheduledTask<I>: Send + Sync + 'static {
    /// Run for `id`. `scheduled` is the entry as it was when scheduled.
    ///
    /// Returns whether the action took effect.
    fn execute(&self, id: &I, scheduled: &ImmutableBeanEntry<I>) -> bool;
}

/// What a local scheduler is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerKind {
    /// Remove beans that outlived their timeout.
    Expiration,
    /// Passivate groups of beans that sat idle.
    IdleEviction,
}

impl SchedulerKind {
    /// All kinds, in composition order.
    pub const ALL: [SchedulerKind; 2] = [SchedulerKind::Expiration, SchedulerKind::IdleEviction];

    /// The timeout this kind uses. Zero means the kind is disabled.
    pub fn timeout(&self, config: &ExpirationConfig) -> Duration {
        match self {
            SchedulerKind::Expiration => config.timeout,
            SchedulerKind::IdleEviction => config.idle_timeout,
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::Expiration => write!(f, "expiration"),
            SchedulerKind::IdleEviction => write!(f, "idle-eviction"),
        }
    }
}
