//! In-memory cluster hub.
//!
//! Nodes built with the same [`Cluster`] see each other's cluster-scoped
//! registrations. The hub keeps a route table `address → (node, registration)`
//! and hands encoded messages from one node to another. Membership is
//! whatever nodes are alive and attached; there is no discovery.
//!
//! # Example
//!
//! ```ignore
//! let cluster = Cluster::new();
//! let a = EventBus::builder().cluster(&cluster).build()?;
//! let b = EventBus::builder().cluster(&cluster).build()?;
//!
//! b.register_handler("greet", &greeter)?;
//! a.send("greet", "hello")?; // delivered on b
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use tracing::debug;

use super::node::{Node, WeakNode};
use super::{NodeId, RegistrationId};

#[derive(Default)]
struct ClusterInner {
    next_node: AtomicU64,
    nodes: RwLock<HashMap<NodeId, WeakNode>>,
    routes: RwLock<HashMap<String, Vec<(NodeId, RegistrationId)>>>,
}

/// Hub joining several nodes into one cluster.
///
/// Cheaply cloneable; clones are the same cluster.
#[derive(Clone, Default)]
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

impl Cluster {
    /// Create an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attached nodes.
    pub fn node_count(&self) -> usize {
        self.inner
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of cluster-scoped registrations at `address`, across all nodes.
    pub fn route_count(&self, address: &str) -> usize {
        self.routes(address).len()
    }

    pub(crate) fn allocate_id(&self) -> NodeId {
        NodeId::from_raw(self.inner.next_node.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn attach(&self, id: NodeId, node: WeakNode) {
        self.inner
            .nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, node);
        debug!(node = %id, "Node joined cluster");
    }

    /// Detach a node and drop all of its routes.
    pub(crate) fn leave(&self, id: NodeId) {
        let removed = self
            .inner
            .nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();

        self.inner
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, routes| {
                routes.retain(|(node, _)| *node != id);
                !routes.is_empty()
            });

        if removed {
            debug!(node = %id, "Node left cluster");
        }
    }

    pub(crate) fn add_route(&self, address: &str, node: NodeId, id: RegistrationId) {
        self.inner
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(address.to_string())
            .or_default()
            .push((node, id));
    }

    pub(crate) fn remove_route(&self, address: &str, node: NodeId, id: RegistrationId) {
        let mut routes = self
            .inner
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = routes.get_mut(address) {
            list.retain(|route| *route != (node, id));
            if list.is_empty() {
                routes.remove(address);
            }
        }
    }

    pub(crate) fn routes(&self, address: &str) -> Vec<(NodeId, RegistrationId)> {
        self.inner
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    /// Hand an encoded message from node `from` to registration `id` on
    /// node `to`.
    ///
    /// If the delivery is dropped, the reply target it carries is withdrawn
    /// from the sending node.
    pub(crate) fn forward(
        &self,
        from: NodeId,
        to: NodeId,
        address: &str,
        id: RegistrationId,
        payload: Bytes,
        reply_address: Option<String>,
    ) {
        let delivered = match self.node(to) {
            Some(node) => node.receive(address, id, &payload, reply_address.as_deref()),
            None => {
                debug!(node = %to, address, "Node gone, dropping delivery");
                self.leave(to);
                false
            }
        };

        if delivered {
            return;
        }
        if let (Some(reply_address), Some(sender)) = (reply_address, self.node(from)) {
            sender.withdraw(&reply_address);
        }
    }

    fn node(&self, id: NodeId) -> Option<Node> {
        self.inner
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .and_then(WeakNode::upgrade)
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Scope;
    use crate::bus::BusConfig;
    use crate::codec::MessageCodec;
    use crate::handler::adapter::DeliveryAdapter;
    use crate::handler::{Handler, ReplyContext};
    use crate::message::{Message, Value};
    use tokio::runtime::Handle;

    #[test]
    fn test_node_ids_are_unique() {
        let cluster = Cluster::new();
        let a = cluster.allocate_id();
        let b = cluster.allocate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_route_bookkeeping() {
        let cluster = Cluster::new();
        let n1 = cluster.allocate_id();
        let n2 = cluster.allocate_id();
        let r1 = RegistrationId::from_raw(1);
        let r2 = RegistrationId::from_raw(2);

        cluster.add_route("addr", n1, r1);
        cluster.add_route("addr", n2, r2);
        assert_eq!(cluster.route_count("addr"), 2);

        cluster.remove_route("addr", n1, r1);
        assert_eq!(cluster.routes("addr"), vec![(n2, r2)]);

        cluster.leave(n2);
        assert_eq!(cluster.route_count("addr"), 0);
    }

    fn joined(cluster: &Cluster) -> Node {
        Node::new(
            Handle::current(),
            &BusConfig::default(),
            Some(cluster.clone()),
        )
    }

    fn idle() -> DeliveryAdapter {
        let handler = Handler::new(|_body: Value, _ctx: ReplyContext| async { Ok(()) });
        DeliveryAdapter::wrap(&handler)
    }

    #[tokio::test]
    async fn test_dropped_forward_withdraws_reply_target() {
        let cluster = Cluster::new();
        let sender = joined(&cluster);
        let receiver = joined(&cluster);
        let payload = MessageCodec::encode(&Message::Int(1)).unwrap();

        // Registration unknown on the receiving node
        sender.register("pending", Scope::Cluster, idle()).unwrap();
        cluster.forward(
            sender.id(),
            receiver.id(),
            "svc",
            RegistrationId::from_raw(99),
            payload.clone(),
            Some("pending".to_string()),
        );
        assert_eq!(sender.handler_count("pending"), 0);
        assert_eq!(cluster.route_count("pending"), 0);

        // Receiving node no longer attached
        sender.register("pending", Scope::Cluster, idle()).unwrap();
        cluster.forward(
            sender.id(),
            NodeId::from_raw(1_000),
            "svc",
            RegistrationId::from_raw(1),
            payload,
            Some("pending".to_string()),
        );
        assert_eq!(sender.handler_count("pending"), 0);
    }

    #[tokio::test]
    async fn test_delivered_forward_keeps_reply_target() {
        let cluster = Cluster::new();
        let sender = joined(&cluster);
        let receiver = joined(&cluster);
        let id = receiver.register("svc", Scope::Cluster, idle()).unwrap();
        sender.register("pending", Scope::Cluster, idle()).unwrap();

        cluster.forward(
            sender.id(),
            receiver.id(),
            "svc",
            id,
            MessageCodec::encode(&Message::Absent).unwrap(),
            Some("pending".to_string()),
        );
        assert_eq!(sender.handler_count("pending"), 1);
    }

    #[test]
    fn test_remove_unknown_route_is_noop() {
        let cluster = Cluster::new();
        let n1 = cluster.allocate_id();
        cluster.remove_route("nothing", n1, RegistrationId::from_raw(7));
        assert_eq!(cluster.route_count("nothing"), 0);
    }
}
