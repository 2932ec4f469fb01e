//! In-process transport node.
//!
//! A [`Node`] owns the address table of one bus instance and implements the
//! delivery primitives the bus facade is built on:
//!
//! - `send` - exactly one registration at the address receives the message,
//!   chosen round-robin among this node's registrations followed by the
//!   cluster-scoped registrations of the other nodes
//! - `publish` - every such registration receives its own copy
//! - reply targets - one-shot registrations at generated addresses, consumed
//!   by the first reply that reaches them and reclaimed after a timeout
//!
//! Nothing here blocks the caller: each delivery is spawned on the runtime
//! the node was created on. A semaphore bounds how many handler calls run at
//! once. Reply targets run outside that bound, and a handler waiting in
//! `release_slot_while` hands its slot back until the wait is over.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::{Cluster, NodeId, RegistrationId, Scope};
use crate::bus::BusConfig;
use crate::codec::MessageCodec;
use crate::error::{BusError, Result};
use crate::handler::adapter::DeliveryAdapter;
use crate::message::Message;

/// Prefix of generated reply addresses.
pub const REPLY_ADDRESS_PREFIX: &str = "__addrbus.reply.";

tokio::task_local! {
    /// Concurrency slot of the handler running on the current task.
    static HANDLER_SLOT: RefCell<HandlerSlot>;
}

struct HandlerSlot {
    permits: Arc<Semaphore>,
    permit: Option<OwnedSemaphorePermit>,
}

/// Await `fut` with the calling handler's concurrency slot released.
///
/// The slot is taken back once `fut` completes. Outside a handler this is
/// plain `fut.await`.
pub(crate) async fn release_slot_while<F: Future>(fut: F) -> F::Output {
    let released = HANDLER_SLOT
        .try_with(|slot| {
            let mut slot = slot.borrow_mut();
            let permit = slot.permit.take()?;
            drop(permit);
            Some(slot.permits.clone())
        })
        .ok()
        .flatten();

    let output = fut.await;

    if let Some(permits) = released {
        // Fails only once the node is closed
        if let Ok(permit) = permits.acquire_owned().await {
            let _ = HANDLER_SLOT.try_with(|slot| slot.borrow_mut().permit = Some(permit));
        }
    }
    output
}

/// A handler registration in the address table.
#[derive(Clone)]
struct Registration {
    id: RegistrationId,
    scope: Scope,
    adapter: DeliveryAdapter,
    /// Removed by the first delivery (reply targets).
    one_shot: bool,
}

/// Where a delivery goes.
enum Target {
    Here(Registration),
    Remote(NodeId, RegistrationId),
}

type AddressTable = HashMap<String, Vec<Registration>>;

struct NodeInner {
    id: NodeId,
    runtime: Handle,
    cluster: Option<Cluster>,
    handlers: RwLock<AddressTable>,
    /// Round-robin position per address.
    cursors: Mutex<HashMap<String, usize>>,
    /// Reclaim timers of pending reply targets.
    reply_timers: Mutex<HashMap<RegistrationId, JoinHandle<()>>>,
    next_registration: AtomicU64,
    next_reply: AtomicU64,
    permits: Arc<Semaphore>,
    reply_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        let timers = self
            .reply_timers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, timer) in timers.drain() {
            timer.abort();
        }
        if let Some(cluster) = &self.cluster {
            cluster.leave(self.id);
        }
    }
}

/// Transport node: address table plus delivery primitives.
///
/// Cheaply cloneable; clones share the same table.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

/// Non-owning reference to a [`Node`], held by reply contexts and timers.
#[derive(Clone)]
pub(crate) struct WeakNode(Weak<NodeInner>);

impl WeakNode {
    pub(crate) fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(|inner| Node { inner })
    }
}

impl Node {
    /// Create a node delivering on `runtime`, joined to `cluster` if given.
    pub(crate) fn new(runtime: Handle, config: &BusConfig, cluster: Option<Cluster>) -> Self {
        let id = cluster
            .as_ref()
            .map_or(NodeId::from_raw(0), Cluster::allocate_id);
        let permits = config
            .max_concurrent_handlers
            .clamp(1, Semaphore::MAX_PERMITS);

        let node = Node {
            inner: Arc::new(NodeInner {
                id,
                runtime,
                cluster,
                handlers: RwLock::new(HashMap::new()),
                cursors: Mutex::new(HashMap::new()),
                reply_timers: Mutex::new(HashMap::new()),
                next_registration: AtomicU64::new(1),
                next_reply: AtomicU64::new(1),
                permits: Arc::new(Semaphore::new(permits)),
                reply_timeout: config.reply_timeout,
                closed: AtomicBool::new(false),
            }),
        };

        if let Some(cluster) = &node.inner.cluster {
            cluster.attach(id, node.downgrade());
        }
        node
    }

    /// Node ID (unique within its cluster).
    #[inline]
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Whether [`close`](Self::close) has been called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of registrations on this node at `address`.
    pub fn handler_count(&self, address: &str) -> usize {
        self.read().get(address).map_or(0, Vec::len)
    }

    /// Number of addresses with at least one registration on this node.
    pub fn address_count(&self) -> usize {
        self.read().len()
    }

    pub(crate) fn downgrade(&self) -> WeakNode {
        WeakNode(Arc::downgrade(&self.inner))
    }

    /// Register a handler adapter at `address`.
    pub(crate) fn register(
        &self,
        address: &str,
        scope: Scope,
        adapter: DeliveryAdapter,
    ) -> Result<RegistrationId> {
        self.ensure_open()?;
        Ok(self.insert(address, scope, adapter, false))
    }

    /// Remove a registration. Returns false if it was not there.
    pub(crate) fn unregister(&self, address: &str, id: RegistrationId) -> bool {
        self.remove(address, id).is_some()
    }

    /// Deliver `message` to one registration at `address`.
    ///
    /// With `reply`, a reply target is registered first and its address
    /// travels with the message. If the message is dropped, for lack of a
    /// handler or on the way to another node, the reply target is withdrawn.
    pub(crate) fn send(
        &self,
        address: &str,
        message: Message,
        reply: Option<DeliveryAdapter>,
    ) -> Result<()> {
        self.ensure_open()?;

        let reply_address = reply.map(|adapter| self.register_reply_target(adapter));

        let mut candidates = self.candidates(address);
        let target = match candidates.len() {
            0 => None,
            1 => candidates.pop(),
            n => Some(candidates.swap_remove(self.next_cursor(address, n))),
        };

        match target {
            Some(target) => self.dispatch(address, target, message, reply_address),
            None => {
                debug!(address, "No handlers registered, dropping message");
                self.abandon(reply_address);
            }
        }
        Ok(())
    }

    /// Deliver a copy of `message` to every registration at `address`.
    pub(crate) fn publish(&self, address: &str, message: Message) -> Result<()> {
        self.ensure_open()?;

        let targets = self.candidates(address);
        if targets.is_empty() {
            debug!(address, "No handlers registered, dropping publish");
        }
        for target in targets {
            self.dispatch(address, target, message.clone(), None);
        }
        Ok(())
    }

    /// Drop every registration, leave the cluster and stop running handlers.
    pub(crate) fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let drained = std::mem::take(&mut *self.write());
        self.cursors().clear();
        for (_, timer) in self.reply_timers().drain() {
            timer.abort();
        }
        if let Some(cluster) = &self.inner.cluster {
            cluster.leave(self.id());
        }
        self.inner.permits.close();

        debug!(
            node = %self.id(),
            addresses = drained.len(),
            "Node closed"
        );
    }

    /// Entry point for deliveries forwarded by the cluster from another node.
    ///
    /// Returns false if the delivery was dropped.
    pub(crate) fn receive(
        &self,
        address: &str,
        id: RegistrationId,
        payload: &[u8],
        reply_address: Option<&str>,
    ) -> bool {
        if self.is_closed() {
            debug!(address, "Node closed, dropping remote delivery");
            return false;
        }

        let message = match MessageCodec::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                error!(address, error = %e, "Failed to decode remote delivery");
                return false;
            }
        };

        let registration = self
            .read()
            .get(address)
            .and_then(|regs| regs.iter().find(|r| r.id == id).cloned());

        let Some(reg) = registration else {
            debug!(address, "Registration gone, dropping remote delivery");
            return false;
        };
        if !self.claim(address, &reg) {
            return false;
        }

        self.deliver(address, reg, message, reply_address.map(str::to_string));
        true
    }

    /// Remove every registration at `address`.
    pub(crate) fn withdraw(&self, address: &str) {
        let ids: Vec<RegistrationId> = self
            .read()
            .get(address)
            .map(|regs| regs.iter().map(|r| r.id).collect())
            .unwrap_or_default();
        for id in ids {
            self.remove(address, id);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }

    fn insert(
        &self,
        address: &str,
        scope: Scope,
        adapter: DeliveryAdapter,
        one_shot: bool,
    ) -> RegistrationId {
        let raw = self.inner.next_registration.fetch_add(1, Ordering::Relaxed);
        let id = RegistrationId::from_raw(raw);

        self.write()
            .entry(address.to_string())
            .or_default()
            .push(Registration {
                id,
                scope,
                adapter,
                one_shot,
            });

        if scope == Scope::Cluster {
            if let Some(cluster) = &self.inner.cluster {
                cluster.add_route(address, self.id(), id);
            }
        }
        id
    }

    fn remove(&self, address: &str, id: RegistrationId) -> Option<Registration> {
        let removed = {
            let mut table = self.write();
            let regs = table.get_mut(address)?;
            let pos = regs.iter().position(|r| r.id == id)?;
            let reg = regs.remove(pos);
            if regs.is_empty() {
                table.remove(address);
                self.cursors().remove(address);
            }
            reg
        };

        if removed.scope == Scope::Cluster {
            if let Some(cluster) = &self.inner.cluster {
                cluster.remove_route(address, self.id(), id);
            }
        }
        if removed.one_shot {
            if let Some(timer) = self.reply_timers().remove(&id) {
                timer.abort();
            }
        }
        Some(removed)
    }

    /// Withdraw the reply target of a dropped delivery.
    fn abandon(&self, reply_address: Option<String>) {
        if let Some(reply_address) = reply_address {
            self.withdraw(&reply_address);
        }
    }

    fn register_reply_target(&self, adapter: DeliveryAdapter) -> String {
        let seq = self.inner.next_reply.fetch_add(1, Ordering::Relaxed);
        let address = format!("{}{}.{}", REPLY_ADDRESS_PREFIX, self.id(), seq);

        let Some(timeout) = self.inner.reply_timeout else {
            self.insert(&address, Scope::Cluster, adapter, true);
            return address;
        };

        // Held until the timer is stored, so an early reply can cancel it
        let mut timers = self.reply_timers();
        let id = self.insert(&address, Scope::Cluster, adapter, true);

        let node = self.downgrade();
        let reply_address = address.clone();
        let timer = self.inner.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(node) = node.upgrade() else {
                return;
            };
            node.reply_timers().remove(&id);
            if node.remove(&reply_address, id).is_some() {
                warn!(
                    reply_address = %reply_address,
                    timeout_ms = timeout.as_millis() as u64,
                    "No reply within timeout, reclaiming reply handler"
                );
            }
        });
        timers.insert(id, timer);
        address
    }

    /// This node's registrations, then cluster routes on other nodes.
    fn candidates(&self, address: &str) -> Vec<Target> {
        let mut targets: Vec<Target> = self
            .read()
            .get(address)
            .map(|regs| regs.iter().cloned().map(Target::Here).collect())
            .unwrap_or_default();

        if let Some(cluster) = &self.inner.cluster {
            let me = self.id();
            targets.extend(
                cluster
                    .routes(address)
                    .into_iter()
                    .filter(|(node, _)| *node != me)
                    .map(|(node, id)| Target::Remote(node, id)),
            );
        }
        targets
    }

    fn next_cursor(&self, address: &str, len: usize) -> usize {
        let mut cursors = self.cursors();
        let cursor = cursors.entry(address.to_string()).or_insert(0);
        let index = *cursor % len;
        *cursor = cursor.wrapping_add(1);
        index
    }

    fn dispatch(
        &self,
        address: &str,
        target: Target,
        message: Message,
        reply_address: Option<String>,
    ) {
        match target {
            Target::Here(reg) => {
                if self.claim(address, &reg) {
                    self.deliver(address, reg, message, reply_address);
                } else {
                    self.abandon(reply_address);
                }
            }
            Target::Remote(node, id) => {
                let Some(cluster) = &self.inner.cluster else {
                    return;
                };
                match MessageCodec::encode(&message) {
                    Ok(payload) => {
                        cluster.forward(self.id(), node, address, id, payload, reply_address)
                    }
                    Err(e) => {
                        error!(address, error = %e, "Failed to encode message for remote delivery");
                        self.abandon(reply_address);
                    }
                }
            }
        }
    }

    /// Consume a one-shot registration. False if another delivery got it first.
    fn claim(&self, address: &str, reg: &Registration) -> bool {
        if reg.one_shot && self.remove(address, reg.id).is_none() {
            debug!(address, "Reply handler already consumed, dropping reply");
            return false;
        }
        true
    }

    fn deliver(
        &self,
        address: &str,
        reg: Registration,
        message: Message,
        reply_address: Option<String>,
    ) {
        // Reply targets run without taking a slot
        let permits = (!reg.one_shot).then(|| self.inner.permits.clone());
        let node = self.downgrade();
        let address = address.to_string();

        self.inner.runtime.spawn(async move {
            let call = reg.adapter.invoke(node, &address, message, reply_address);

            let outcome = match permits {
                None => call.await,
                Some(permits) => {
                    let Ok(permit) = permits.clone().acquire_owned().await else {
                        return;
                    };
                    let slot = HandlerSlot {
                        permits,
                        permit: Some(permit),
                    };
                    // The slot lives until the handler completes
                    HANDLER_SLOT.scope(RefCell::new(slot), call).await
                }
            };

            if let Err(e) = outcome {
                error!(address = %address, error = %e, "Handler error");
            }
        });
    }

    fn read(&self) -> RwLockReadGuard<'_, AddressTable> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AddressTable> {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn cursors(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.inner
            .cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn reply_timers(&self) -> MutexGuard<'_, HashMap<RegistrationId, JoinHandle<()>>> {
        self.inner
            .reply_timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn pending_reply_timers(&self) -> usize {
        self.reply_timers().len()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("addresses", &self.address_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Handler, ReplyContext};
    use crate::message::Value;
    use tokio::sync::mpsc;

    type Inbox = mpsc::UnboundedReceiver<(&'static str, Value)>;

    fn node_with(config: BusConfig) -> Node {
        Node::new(Handle::current(), &config, None)
    }

    fn node() -> Node {
        node_with(BusConfig::default())
    }

    fn recorder(
        tag: &'static str,
        tx: &mpsc::UnboundedSender<(&'static str, Value)>,
    ) -> DeliveryAdapter {
        let tx = tx.clone();
        DeliveryAdapter::wrap(&Handler::new(move |body: Value, _ctx: ReplyContext| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((tag, body));
                Ok(())
            }
        }))
    }

    async fn next(rx: &mut Inbox) -> (&'static str, Value) {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_send_round_robin() {
        let node = node();
        let (tx, mut rx) = mpsc::unbounded_channel();
        node.register("work", Scope::Local, recorder("a", &tx)).unwrap();
        node.register("work", Scope::Local, recorder("b", &tx)).unwrap();

        let mut seen = Vec::new();
        for i in 0..4 {
            node.send("work", Message::Int(i), None).unwrap();
            seen.push(next(&mut rx).await.0);
        }
        seen.sort();
        assert_eq!(seen, vec!["a", "a", "b", "b"]);
    }

    #[tokio::test]
    async fn test_publish_reaches_everyone() {
        let node = node();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for tag in ["a", "b", "c"] {
            node.register("news", Scope::Cluster, recorder(tag, &tx)).unwrap();
        }

        node.publish("news", Message::String("hi".into())).unwrap();

        let mut tags = Vec::new();
        for _ in 0..3 {
            let (tag, body) = next(&mut rx).await;
            assert_eq!(body, Value::from("hi"));
            tags.push(tag);
        }
        tags.sort();
        assert_eq!(tags, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_send_without_handlers_withdraws_reply_target() {
        let node = node();
        let (tx, _rx) = mpsc::unbounded_channel();

        node.send("nobody", Message::Absent, Some(recorder("r", &tx))).unwrap();
        assert_eq!(node.address_count(), 0);
        assert_eq!(node.pending_reply_timers(), 0);
    }

    #[tokio::test]
    async fn test_reply_target_is_one_shot() {
        let node = node();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let reply_address = node.register_reply_target(recorder("reply", &tx));
        assert_eq!(node.handler_count(&reply_address), 1);

        node.send(&reply_address, Message::Int(1), None).unwrap();
        node.send(&reply_address, Message::Int(2), None).unwrap();

        assert_eq!(next(&mut rx).await.1, Value::Int(1));
        assert_eq!(node.handler_count(&reply_address), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_consumed_reply_target_cancels_timer() {
        let node = node();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let reply_address = node.register_reply_target(recorder("reply", &tx));
        assert_eq!(node.pending_reply_timers(), 1);

        node.send(&reply_address, Message::Int(1), None).unwrap();
        next(&mut rx).await;
        assert_eq!(node.pending_reply_timers(), 0);
    }

    #[tokio::test]
    async fn test_no_timer_without_reply_timeout() {
        let node = node_with(BusConfig {
            reply_timeout: None,
            ..BusConfig::default()
        });
        let (tx, _rx) = mpsc::unbounded_channel();

        let reply_address = node.register_reply_target(recorder("reply", &tx));
        assert_eq!(node.handler_count(&reply_address), 1);
        assert_eq!(node.pending_reply_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_target_reclaimed_after_timeout() {
        let node = node_with(BusConfig {
            reply_timeout: Some(Duration::from_millis(50)),
            ..BusConfig::default()
        });
        let (tx, _rx) = mpsc::unbounded_channel();

        let reply_address = node.register_reply_target(recorder("reply", &tx));
        assert_eq!(node.handler_count(&reply_address), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(node.handler_count(&reply_address), 0);
        assert_eq!(node.pending_reply_timers(), 0);
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let node = node();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = node.register("x", Scope::Local, recorder("a", &tx)).unwrap();

        assert!(node.unregister("x", id));
        assert!(!node.unregister("x", id));

        node.send("x", Message::Bool(true), None).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_node_rejects_calls() {
        let node = node();
        let (tx, _rx) = mpsc::unbounded_channel();
        node.register("x", Scope::Local, recorder("a", &tx)).unwrap();

        node.close();
        assert!(node.is_closed());
        assert_eq!(node.handler_count("x"), 0);
        assert!(matches!(node.send("x", Message::Absent, None), Err(BusError::Closed)));
        assert!(matches!(node.publish("x", Message::Absent), Err(BusError::Closed)));
        assert!(matches!(
            node.register("x", Scope::Local, recorder("b", &tx)),
            Err(BusError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_concurrency_limit_queues_deliveries() {
        let node = node_with(BusConfig {
            max_concurrent_handlers: 1,
            ..BusConfig::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let slow = DeliveryAdapter::wrap(&Handler::new(move |body: Value, _ctx: ReplyContext| {
            let tx = tx.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = tx.send(body);
                Ok(())
            }
        }));
        node.register("slow", Scope::Local, slow).unwrap();

        for i in 0..3 {
            node.send("slow", Message::Int(i), None).unwrap();
        }

        // Nothing is dropped when the limit is reached
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_reply_target_runs_while_slots_are_busy() {
        let node = node_with(BusConfig {
            max_concurrent_handlers: 1,
            ..BusConfig::default()
        });
        let gate = Arc::new(tokio::sync::Notify::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let waiting = gate.clone();
        let hold = DeliveryAdapter::wrap(&Handler::new(move |_body: Value, _ctx: ReplyContext| {
            let waiting = waiting.clone();
            async move {
                waiting.notified().await;
                Ok(())
            }
        }));
        node.register("hold", Scope::Local, hold).unwrap();
        node.send("hold", Message::Absent, None).unwrap();

        let reply_address = node.register_reply_target(recorder("reply", &tx));
        node.send(&reply_address, Message::Int(7), None).unwrap();
        assert_eq!(next(&mut rx).await, ("reply", Value::Int(7)));

        gate.notify_one();
    }

    #[tokio::test]
    async fn test_released_slot_lets_other_handlers_run() {
        let node = node_with(BusConfig {
            max_concurrent_handlers: 1,
            ..BusConfig::default()
        });

        let (seen_tx, seen_rx) = mpsc::unbounded_channel::<()>();
        let inner = DeliveryAdapter::wrap(&Handler::new(move |_body: Value, _ctx: ReplyContext| {
            let seen_tx = seen_tx.clone();
            async move {
                let _ = seen_tx.send(());
                Ok(())
            }
        }));
        node.register("inner", Scope::Local, inner).unwrap();

        let seen_rx = Arc::new(tokio::sync::Mutex::new(seen_rx));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let outer_node = node.clone();
        let outer = DeliveryAdapter::wrap(&Handler::new(move |_body: Value, _ctx: ReplyContext| {
            let node = outer_node.clone();
            let seen_rx = seen_rx.clone();
            let done_tx = done_tx.clone();
            async move {
                node.send("inner", Message::Absent, None)?;
                let mut seen = seen_rx.lock().await;
                let wait = tokio::time::timeout(Duration::from_secs(1), seen.recv());
                let arrived = release_slot_while(wait).await;
                let _ = done_tx.send(matches!(arrived, Ok(Some(()))));
                Ok(())
            }
        }));
        node.register("outer", Scope::Local, outer).unwrap();
        node.send("outer", Message::Absent, None).unwrap();

        let arrived = tokio::time::timeout(Duration::from_secs(2), done_rx.recv())
            .await
            .unwrap();
        assert_eq!(arrived, Some(true));
    }

    #[tokio::test]
    async fn test_release_outside_handler_is_plain_await() {
        assert_eq!(release_slot_while(async { 5 }).await, 5);
    }
}
