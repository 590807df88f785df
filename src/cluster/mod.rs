//! Cluster membership and owner lookup.

pub mod events;
pub mod group;
pub mod locator;

pub use events::{LoggingEventListener, MemberEvent, MemberEventListener};
pub use group::Group;
pub use locator::PrimaryOwnerLocator;
