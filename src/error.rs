//! Error types for the bean manager.

use crate::types::NodeId;
use thiserror::Error;

/// Result type alias for bean manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the bean manager.
#[derive(Error, Debug)]
pub enum Error {
    /// Cache layer errors.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Remote command dispatch errors.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Bean lifecycle errors.
    #[error("bean error: {0}")]
    Bean(#[from] BeanError),

    /// Cluster membership errors.
    #[error("membership error: {0}")]
    Membership(#[from] MembershipError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// Marshalling errors.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Cache layer errors.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A bean's group entry is missing while the bean entry exists.
    #[error("missing group entry: {0}")]
    MissingGroup(String),
}

/// Remote command dispatch errors.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No dispatcher is registered for the target node on this channel.
    #[error("node {node} unreachable on channel {channel}")]
    Unreachable { channel: String, node: NodeId },

    /// The target rejected the command (e.g. its scheduler is closed).
    #[error("command rejected by node {node}: {reason}")]
    Rejected { node: NodeId, reason: String },

    /// Failed to encode or decode a command.
    #[error("marshalling failed: {0}")]
    Marshalling(String),
}

/// Bean lifecycle errors.
#[derive(Error, Debug)]
pub enum BeanError {
    /// The group a new bean should join does not exist.
    #[error("bean group not found: {0}")]
    GroupNotFound(String),

    /// The manager is not started.
    #[error("bean manager is {0}")]
    NotStarted(String),

    /// The bean was already removed.
    #[error("bean already removed: {0}")]
    Removed(String),
}

/// Cluster membership errors.
#[derive(Error, Debug)]
pub enum MembershipError {
    /// Node not found in the group.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// Node already exists.
    #[error("node already exists: {0}")]
    NodeAlreadyExists(NodeId),

    /// A singleton group cannot take members.
    #[error("group {0} is not clustered")]
    NotClustered(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for DispatchError {
    fn from(e: bincode::Error) -> Self {
        DispatchError::Marshalling(e.to_string())
    }
}

/// Whether a failure may be retried on another node.
///
/// Any cache-layer error anywhere in the cause chain makes the failure
/// non-remotable: it may indicate local corruption rather than a transient
/// network problem.
pub fn is_remotable(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(e) = current {
        if e.is::<CacheError>() {
            return false;
        }
        if let Some(Error::Cache(_)) = e.downcast_ref::<Error>() {
            return false;
        }
        current = e.source();
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Error, Debug)]
    #[error("wrapper")]
    struct Wrapper(#[source] Error);

    #[test]
    fn test_cache_error_not_remotable() {
        let err = Error::Cache(CacheError::MissingGroup("B1".into()));
        assert!(!is_remotable(&err));

        let wrapped = Wrapper(Error::Cache(CacheError::MissingGroup("G1".into())));
        assert!(!is_remotable(&wrapped));
    }

    #[test]
    fn test_other_errors_remotable() {
        let err = Error::Dispatch(DispatchError::Unreachable {
            channel: "beans/Cart".into(),
            node: 2,
        });
        assert!(is_remotable(&err));
        assert!(is_remotable(&Error::Serialization("eof".into())));
        assert!(is_remotable(&Wrapper(Error::Internal("boom".into()))));
    }

    #[test]
    fn test_error_display() {
        let err = Error::Bean(BeanError::GroupNotFound("g1".into()));
        assert_eq!(err.to_string(), "bean error: bean group not found: g1");
    }
}
