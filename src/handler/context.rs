//! Reply context for handlers.
//!
//! Every handler invocation receives a [`ReplyContext`] bound to the
//! delivery it was invoked for. It provides:
//! - `reply` - answer whoever is waiting on this delivery
//! - `reply_with` - answer, and wait for an answer to the answer
//!
//! # Example
//!
//! ```ignore
//! let server = Handler::new(|body: Value, ctx: ReplyContext| async move {
//!     let confirm = Handler::new(|ack: Value, _ctx: ReplyContext| async move {
//!         tracing::info!(?ack, "client confirmed");
//!         Ok(())
//!     });
//!     ctx.reply_with("ready?", &confirm)
//! });
//! ```

use tracing::debug;

use super::adapter::DeliveryAdapter;
use super::Handler;
use crate::error::{BusError, Result};
use crate::message::{normalize_outbound, Value};
use crate::transport::WeakNode;

/// Context passed to handlers.
///
/// Replying never waits: the reply is handed to the transport and the call
/// returns. Replying more than once is allowed; each reply is sent on its
/// own, and a reply target only accepts the first one that arrives.
#[derive(Clone)]
pub struct ReplyContext {
    node: WeakNode,
    /// Address the message was delivered to.
    address: String,
    /// Address replies go to (`None` = nobody is waiting).
    reply_address: Option<String>,
}

impl ReplyContext {
    pub(crate) fn new(node: WeakNode, address: &str, reply_address: Option<String>) -> Self {
        Self {
            node,
            address: address.to_string(),
            reply_address,
        }
    }

    /// Address the message was delivered to.
    #[inline]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the sender is waiting for a reply.
    #[inline]
    pub fn expects_reply(&self) -> bool {
        self.reply_address.is_some()
    }

    /// Reply to the sender.
    ///
    /// # Errors
    ///
    /// - [`BusError::InvalidArgument`] if `body` is [`Value::Undefined`];
    ///   use `Value::Null` for an empty reply
    /// - [`BusError::UnsupportedType`] if `body` has no message form
    pub fn reply(&self, body: impl Into<Value>) -> Result<()> {
        self.send_reply(body.into(), None)
    }

    /// Reply to the sender and handle the sender's answer with `on_reply`.
    ///
    /// `on_reply` gets its own context, so the exchange can go on for as
    /// many rounds as the parties keep supplying handlers.
    pub fn reply_with(&self, body: impl Into<Value>, on_reply: &Handler) -> Result<()> {
        self.send_reply(body.into(), Some(DeliveryAdapter::wrap(on_reply)))
    }

    fn send_reply(&self, body: Value, on_reply: Option<DeliveryAdapter>) -> Result<()> {
        if body.is_undefined() {
            return Err(BusError::InvalidArgument("reply message must be specified"));
        }
        let message = normalize_outbound(body)?;

        let reply_address = match &self.reply_address {
            Some(addr) => addr,
            None => {
                debug!(address = %self.address, "Reply to a delivery nobody awaits, dropping");
                return Ok(());
            }
        };

        let node = self.node.upgrade().ok_or(BusError::Closed)?;
        node.send(reply_address, message, on_reply)
    }
}

impl std::fmt::Debug for ReplyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyContext")
            .field("address", &self.address)
            .field("reply_address", &self.reply_address)
            .finish()
    }
}
