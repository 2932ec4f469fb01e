//! Event bus facade and builder.
//!
//! The [`EventBusBuilder`] configures limits and cluster membership, and
//! [`EventBus`] exposes the bus operations:
//! 1. Register / unregister handlers at addresses (local or cluster scope)
//! 2. `send` to one handler, optionally awaiting replies
//! 3. `publish` to every handler
//!
//! Arguments are validated and bodies normalized synchronously; delivery
//! happens afterwards on the tokio runtime the bus was built on.
//!
//! # Example
//!
//! ```ignore
//! use addrbus::{EventBus, Handler, ReplyContext, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = EventBus::builder().build()?;
//!
//!     let pong = Handler::new(|_body: Value, ctx: ReplyContext| async move {
//!         ctx.reply("pong")
//!     });
//!     bus.register_handler("ping", &pong)?;
//!
//!     let reply = bus.request("ping", "ping").await?;
//!     assert_eq!(reply.body, Value::from("pong"));
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{BusError, Result};
use crate::handler::adapter::DeliveryAdapter;
use crate::handler::{Handler, HandlerRegistry, ReplyContext};
use crate::message::{normalize_outbound, Value};
use crate::transport::{release_slot_while, Cluster, Node, NodeId, Scope};

/// Default maximum concurrent handler invocations.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Default time a reply handler stays registered waiting for its reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum handler invocations running at once. Deliveries beyond the
    /// limit wait for a slot. Reply handlers do not take one, and a handler
    /// awaiting [`EventBus::request`] gives its slot back meanwhile.
    pub max_concurrent_handlers: usize,
    /// How long a reply handler waits before it is reclaimed. `None` keeps
    /// it until a reply arrives.
    pub reply_timeout: Option<Duration>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            reply_timeout: Some(DEFAULT_REPLY_TIMEOUT),
        }
    }
}

/// Builder for configuring and creating an [`EventBus`].
#[derive(Debug, Default)]
pub struct EventBusBuilder {
    config: BusConfig,
    cluster: Option<Cluster>,
}

impl EventBusBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of concurrent handler invocations.
    ///
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = limit;
        self
    }

    /// Set the reply timeout.
    ///
    /// Default: 30 seconds
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.config.reply_timeout = Some(timeout);
        self
    }

    /// Keep reply handlers registered until a reply arrives.
    pub fn no_reply_timeout(mut self) -> Self {
        self.config.reply_timeout = None;
        self
    }

    /// Join `cluster`, making cluster-scoped handlers visible across its nodes.
    pub fn cluster(mut self, cluster: &Cluster) -> Self {
        self.cluster = Some(cluster.clone());
        self
    }

    /// Build the bus on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NoRuntime`] when called outside a runtime.
    pub fn build(self) -> Result<EventBus> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        let node = Node::new(runtime, &self.config, self.cluster);

        Ok(EventBus {
            inner: Arc::new(BusInner {
                node,
                registry: HandlerRegistry::new(),
                config: self.config,
            }),
        })
    }
}

/// The first reply to a [`request`](EventBus::request).
#[derive(Debug)]
pub struct Reply {
    /// Reply body.
    pub body: Value,
    /// Context for answering the reply.
    pub context: ReplyContext,
}

struct BusInner {
    node: Node,
    registry: HandlerRegistry,
    config: BusConfig,
}

/// Address-keyed message bus.
///
/// Cheaply cloneable; clones are the same bus. A handler that captures a
/// clone of its own bus keeps the bus alive until [`close`](Self::close).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new bus builder.
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    /// Register a handler visible to the whole cluster.
    ///
    /// # Errors
    ///
    /// [`BusError::InvalidArgument`] for an empty address, [`BusError::Closed`]
    /// after [`close`](Self::close).
    pub fn register_handler(&self, address: &str, handler: &Handler) -> Result<&Self> {
        self.register(address, handler, Scope::Cluster)
    }

    /// Register a handler only reachable from this node.
    pub fn register_local_handler(&self, address: &str, handler: &Handler) -> Result<&Self> {
        self.register(address, handler, Scope::Local)
    }

    /// Unregister a handler.
    ///
    /// Unregistering a handler that is not registered at `address` does
    /// nothing. If it was registered several times, the most recent
    /// registration is removed.
    pub fn unregister_handler(&self, address: &str, handler: &Handler) -> Result<&Self> {
        check_address(address)?;

        let node = &self.inner.node;
        self.inner
            .registry
            .remove_with(address, handler, |registration| {
                node.unregister(address, registration);
            });
        Ok(self)
    }

    /// Send a message to one handler at `address`.
    ///
    /// Dropped without error if no handler is registered there.
    pub fn send(&self, address: &str, message: impl Into<Value>) -> Result<&Self> {
        self.send_or_publish(address, message.into(), Dispatch::Send(None))
    }

    /// Send a message to one handler at `address` and handle its reply.
    ///
    /// `reply_handler` is invoked at most once, with a context that can
    /// answer the reply in turn.
    pub fn send_with_reply(
        &self,
        address: &str,
        message: impl Into<Value>,
        reply_handler: &Handler,
    ) -> Result<&Self> {
        self.send_or_publish(address, message.into(), Dispatch::Send(Some(reply_handler)))
    }

    /// Publish a message to every handler at `address`.
    pub fn publish(&self, address: &str, message: impl Into<Value>) -> Result<&Self> {
        self.send_or_publish(address, message.into(), Dispatch::Publish)
    }

    /// Send a message and wait for the first reply.
    ///
    /// # Errors
    ///
    /// - [`BusError::Timeout`] if no reply arrives within the reply timeout
    /// - [`BusError::NoReply`] if the reply handler is dropped first, e.g.
    ///   because nobody is registered at `address`
    /// - synchronous errors of [`send`](Self::send)
    ///
    /// Called from a handler, the handler's concurrency slot is released
    /// while waiting, so nested requests do not starve the node.
    pub async fn request(&self, address: &str, message: impl Into<Value>) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let reply_handler = Handler::new(move |body: Value, context: ReplyContext| {
            let tx = tx.clone();
            async move {
                let sender = tx.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(sender) = sender {
                    let _ = sender.send(Reply { body, context });
                }
                Ok(())
            }
        });

        // Taken before the reply handler exists, so the transport never
        // reclaims it ahead of this deadline. Past the clock's range there
        // is no deadline.
        let deadline = self
            .inner
            .config
            .reply_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));

        self.send_with_reply(address, message, &reply_handler)?;
        // The transport now holds the only handle on the sender
        drop(reply_handler);

        let wait = async {
            let Some(deadline) = deadline else {
                return rx.await.map_err(|_| BusError::NoReply(address.to_string()));
            };

            match tokio::time::timeout_at(deadline, rx).await {
                Ok(Ok(reply)) => Ok(reply),
                // Reclaimed by the transport's own reply timeout
                Ok(Err(_)) if Instant::now() >= deadline => {
                    Err(BusError::Timeout(address.to_string()))
                }
                Ok(Err(_)) => Err(BusError::NoReply(address.to_string())),
                Err(_) => Err(BusError::Timeout(address.to_string())),
            }
        };
        release_slot_while(wait).await
    }

    /// Number of handlers registered on this node at `address`.
    pub fn handler_count(&self, address: &str) -> usize {
        self.inner.node.handler_count(address)
    }

    /// This bus's node ID within its cluster.
    pub fn node_id(&self) -> NodeId {
        self.inner.node.id()
    }

    /// The transport node backing this bus.
    pub fn node(&self) -> &Node {
        &self.inner.node
    }

    /// The bus configuration.
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Shut the bus down.
    ///
    /// Every registration is destroyed, cluster routes are withdrawn, and
    /// further calls fail with [`BusError::Closed`]. Closing twice is a no-op.
    pub fn close(&self) {
        self.inner.node.close();
        self.inner.registry.clear();
    }

    /// Whether the bus has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.node.is_closed()
    }

    fn register(&self, address: &str, handler: &Handler, scope: Scope) -> Result<&Self> {
        check_address(address)?;

        let node = &self.inner.node;
        self.inner
            .registry
            .insert_with(address, handler, scope, || {
                node.register(address, scope, DeliveryAdapter::wrap(handler))
            })?;
        Ok(self)
    }

    fn send_or_publish(
        &self,
        address: &str,
        message: Value,
        dispatch: Dispatch<'_>,
    ) -> Result<&Self> {
        check_address(address)?;
        let message = normalize_outbound(message)?;

        match dispatch {
            Dispatch::Send(reply_handler) => {
                let reply = reply_handler.map(DeliveryAdapter::wrap);
                self.inner.node.send(address, message, reply)?;
            }
            Dispatch::Publish => self.inner.node.publish(address, message)?,
        }
        Ok(self)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("node", &self.inner.node)
            .field("config", &self.inner.config)
            .finish()
    }
}

enum Dispatch<'a> {
    Send(Option<&'a Handler>),
    Publish,
}

fn check_address(address: &str) -> Result<()> {
    if address.is_empty() {
        return Err(BusError::InvalidArgument("address must be specified"));
    }
    Ok(())
}
