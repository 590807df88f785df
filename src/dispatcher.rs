//! Command dispatch between group members.
//!
//! A [`CommandDispatcherFactory`] moves opaque payloads to a named channel on
//! a target member. [`CommandDispatcher`] layers typed commands on top: it
//! marshals each command with bincode before handing it to the factory, and
//! the receiving side unmarshals it before calling its [`CommandHandler`].
//!
//! ```text
//! caller ── C ──► CommandDispatcher ── bytes ──► factory ──► target member
//!                                                              │
//!                          CommandHandler ◄── C ── unmarshal ◄─┘
//! ```

use crate::error::DispatchError;
use crate::types::{Node, NodeId};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Channel name shared by all managers of one bean type on one cache.
pub fn channel_name(cache_name: &str, bean_name: &str) -> String {
    format!("{}/{}", cache_name, bean_name)
}

/// Receives raw payloads delivered to a channel.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one payload.
    fn handle(&self, payload: Bytes) -> Result<(), DispatchError>;
}

/// Handles typed commands delivered to a member.
pub trait CommandHandler<C>: Send + Sync + 'static {
    /// Apply one command.
    fn handle(&self, command: C) -> Result<(), DispatchError>;
}

/// Transport for member-addressed payloads.
#[async_trait]
pub trait CommandDispatcherFactory: Send + Sync + std::fmt::Debug + 'static {
    /// Start receiving payloads for `channel` on `local`.
    fn register(&self, channel: &str, local: &Node, handler: Arc<dyn MessageHandler>);

    /// Stop receiving payloads for `channel` on `local`.
    fn unregister(&self, channel: &str, local: NodeId);

    /// Deliver a payload to `channel` on `target`.
    async fn send(&self, channel: &str, target: &Node, payload: Bytes) -> Result<(), DispatchError>;
}

/// Unmarshals payloads for a typed handler.
struct Unmarshaller<C> {
    handler: Arc<dyn CommandHandler<C>>,
}

impl<C: DeserializeOwned + Send + 'static> MessageHandler for Unmarshaller<C> {
    fn handle(&self, payload: Bytes) -> Result<(), DispatchError> {
        let command: C = bincode::deserialize(&payload).map_err(|e| {
            error!(bytes = payload.len(), error = %e, "Dropping command that failed to unmarshal");
            DispatchError::from(e)
        })?;
        self.handler.handle(command)
    }
}

/// Sends typed commands to other members over one channel.
pub struct CommandDispatcher<C> {
    channel: String,
    local: Node,
    factory: Arc<dyn CommandDispatcherFactory>,
    _command: PhantomData<fn(C)>,
}

impl<C> CommandDispatcher<C>
where
    C: Serialize + DeserializeOwned + Send + 'static,
{
    /// Register `handler` for `channel` on the local member and return a
    /// dispatcher for the same channel.
    pub fn create(
        factory: Arc<dyn CommandDispatcherFactory>,
        channel: impl Into<String>,
        local: Node,
        handler: Arc<dyn CommandHandler<C>>,
    ) -> Self {
        let channel = channel.into();
        factory.register(&channel, &local, Arc::new(Unmarshaller { handler }));
        debug!(channel = %channel, node_id = local.id, "Command dispatcher registered");
        Self {
            channel,
            local,
            factory,
            _command: PhantomData,
        }
    }

    /// Channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Marshal `command` and deliver it to `member`.
    pub async fn execute_on_member(&self, member: &Node, command: &C) -> Result<(), DispatchError> {
        let payload = Bytes::from(bincode::serialize(command)?);
        trace!(channel = %self.channel, target = member.id, bytes = payload.len(), "Dispatching command");
        self.factory.send(&self.channel, member, payload).await
    }

    /// Stop receiving commands on this channel.
    pub fn close(&self) {
        self.factory.unregister(&self.channel, self.local.id);
        debug!(channel = %self.channel, node_id = self.local.id, "Command dispatcher closed");
    }
}

impl<C> std::fmt::Debug for CommandDispatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("channel", &self.channel)
            .field("local", &self.local.id)
            .finish()
    }
}

/// In-process transport connecting every member registered with the same
/// factory instance.
#[derive(Default)]
pub struct LocalCommandDispatcherFactory {
    handlers: DashMap<(String, NodeId), Arc<dyn MessageHandler>>,
    sent: AtomicU64,
}

impl LocalCommandDispatcherFactory {
    /// Create an empty factory.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of payloads sent through this factory, delivered or not.
    pub fn dispatch_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Whether `node` receives on `channel`.
    pub fn is_registered(&self, channel: &str, node: NodeId) -> bool {
        self.handlers.contains_key(&(channel.to_string(), node))
    }
}

impl std::fmt::Debug for LocalCommandDispatcherFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCommandDispatcherFactory")
            .field("handlers", &self.handlers.len())
            .field("sent", &self.dispatch_count())
            .finish()
    }
}

#[async_trait]
impl CommandDispatcherFactory for LocalCommandDispatcherFactory {
    fn register(&self, channel: &str, local: &Node, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert((channel.to_string(), local.id), handler);
    }

    fn unregister(&self, channel: &str, local: NodeId) {
        self.handlers.remove(&(channel.to_string(), local));
    }

    async fn send(&self, channel: &str, target: &Node, payload: Bytes) -> Result<(), DispatchError> {
        self.sent.fetch_add(1, Ordering::Relaxed);

        let handler = self
            .handlers
            .get(&(channel.to_string(), target.id))
            .map(|h| h.value().clone())
            .ok_or_else(|| DispatchError::Unreachable {
                channel: channel.to_string(),
                node: target.id,
            })?;

        handler.handle(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Ping {
        Hello(String),
        Fail,
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Ping>>);

    impl CommandHandler<Ping> for Recorder {
        fn handle(&self, command: Ping) -> Result<(), DispatchError> {
            if command == Ping::Fail {
                return Err(DispatchError::Rejected {
                    node: 2,
                    reason: "closed".into(),
                });
            }
            self.0.lock().push(command);
            Ok(())
        }
    }

    fn node(id: NodeId) -> Node {
        Node::new(id, format!("node-{}", id), format!("127.0.0.1:{}", 7600 + id).parse().unwrap())
    }

    #[tokio::test]
    async fn test_delivers_to_registered_member() {
        let factory = LocalCommandDispatcherFactory::new();
        let channel = channel_name("beans", "Cart");
        let receiver = Arc::new(Recorder::default());

        let a = CommandDispatcher::<Ping>::create(
            factory.clone(),
            channel.clone(),
            node(1),
            Arc::new(Recorder::default()),
        );
        let _b = CommandDispatcher::<Ping>::create(factory.clone(), channel, node(2), receiver.clone());

        a.execute_on_member(&node(2), &Ping::Hello("hi".into()))
            .await
            .unwrap();
        assert_eq!(*receiver.0.lock(), vec![Ping::Hello("hi".into())]);
        assert_eq!(factory.dispatch_count(), 1);

        let err = a.execute_on_member(&node(2), &Ping::Fail).await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_after_close() {
        let factory = LocalCommandDispatcherFactory::new();
        let a = CommandDispatcher::<Ping>::create(
            factory.clone(),
            "beans/Cart",
            node(1),
            Arc::new(Recorder::default()),
        );
        let b = CommandDispatcher::<Ping>::create(
            factory.clone(),
            "beans/Cart",
            node(2),
            Arc::new(Recorder::default()),
        );
        assert!(factory.is_registered("beans/Cart", 2));

        b.close();
        let err = a
            .execute_on_member(&node(2), &Ping::Hello("late".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Unreachable { node: 2, .. }));
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let factory = LocalCommandDispatcherFactory::new();
        let a = CommandDispatcher::<Ping>::create(
            factory.clone(),
            channel_name("beans", "Cart"),
            node(1),
            Arc::new(Recorder::default()),
        );
        let _b = CommandDispatcher::<Ping>::create(
            factory.clone(),
            channel_name("beans", "Order"),
            node(2),
            Arc::new(Recorder::default()),
        );

        assert!(a.execute_on_member(&node(2), &Ping::Fail).await.is_err());
    }
}
