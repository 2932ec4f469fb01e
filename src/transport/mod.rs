//! Transport module - the delivery layer the bus sits on.
//!
//! Provides:
//! - [`Node`] - one bus instance's address table and send/publish primitives
//! - [`Cluster`] - in-memory hub joining nodes, so cluster-scoped handlers
//!   on one node receive messages sent on another
//!
//! ```text
//!            ┌───────── Cluster ─────────┐
//!  Node A ───┤ routes: address → (node, │─── Node B
//!            │          registration)   │
//!            └──────────────────────────┘
//!  same node: canonical Message handed over directly
//!  other node: MessageCodec bytes, decoded on arrival
//! ```

use std::fmt;

mod cluster;
mod node;

pub use cluster::Cluster;
pub use node::Node;
pub(crate) use node::{release_slot_while, WeakNode};

/// Visibility of a handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Only messages sent or published on the registering node.
    Local,
    /// Messages sent or published on any node of the cluster.
    Cluster,
}

/// Identifier of a transport registration, unique per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

impl RegistrationId {
    #[inline]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier of a node, unique per cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    #[inline]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
