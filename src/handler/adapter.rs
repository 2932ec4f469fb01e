//! Delivery adapter.
//!
//! Every callback the transport invokes is a [`DeliveryAdapter`]: handlers
//! registered at an address, reply handlers given to `send_with_reply`, and
//! `on_reply` handlers given to `ReplyContext::reply_with`. The adapter turns
//! one transport delivery into one handler call: it normalizes the canonical
//! body into a native value and binds a fresh [`ReplyContext`] to the
//! delivery.

use super::{BoxFuture, Handler, HandlerResult, ReplyContext};
use crate::message::{normalize_inbound, Message};
use crate::transport::WeakNode;

/// A handler wrapped for invocation by the transport.
#[derive(Clone, Debug)]
pub(crate) struct DeliveryAdapter {
    handler: Handler,
}

impl DeliveryAdapter {
    pub(crate) fn wrap(handler: &Handler) -> Self {
        Self {
            handler: handler.clone(),
        }
    }

    /// Build the handler call for one delivery.
    ///
    /// `reply_address` is where replies to this delivery go; `None` for
    /// publishes and for sends nobody awaits a reply to.
    pub(crate) fn invoke(
        &self,
        node: WeakNode,
        address: &str,
        message: Message,
        reply_address: Option<String>,
    ) -> BoxFuture<'static, HandlerResult> {
        let body = normalize_inbound(message);
        let ctx = ReplyContext::new(node, address, reply_address);
        self.handler.call(body, ctx)
    }
}
