//! Handler module - handler references, registration bookkeeping, replies.
//!
//! Provides:
//! - [`Handler`] - shared, identity-carrying reference to a callback
//! - [`HandlerRegistry`] - maps (address, handler identity) to registrations
//! - [`ReplyContext`] - lets a handler answer the delivery it was invoked for
//!
//! # Example
//!
//! ```ignore
//! use addrbus::{Handler, ReplyContext, Value};
//!
//! // Untyped handler
//! let echo = Handler::new(|body: Value, ctx: ReplyContext| async move {
//!     ctx.reply(body)
//! });
//!
//! // Typed handler
//! let add = Handler::typed(|(a, b): (i64, i64), ctx: ReplyContext| async move {
//!     ctx.reply(a + b)
//! });
//! ```

pub(crate) mod adapter;
mod context;
mod registry;

pub use context::ReplyContext;
pub use registry::{
    BoxFuture, Handler, HandlerId, HandlerRegistry, HandlerResult, MessageHandler, TypedHandler,
};
