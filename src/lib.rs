//! # addrbus
//!
//! Address-keyed message bus for Rust services.
//!
//! Handlers register at string addresses; producers `send` to one handler or
//! `publish` to all of them without knowing whether the handler lives in this
//! process or on another node of the cluster.
//!
//! ## Architecture
//!
//! - **Normalizer** (`message`): native [`Value`]s become canonical
//!   [`Message`]s on the way out and native values again on the way in
//! - **Handler registry** (`handler`): identity-keyed bookkeeping of
//!   registrations, so a handler reference is all it takes to unregister
//! - **Delivery** (`transport`): round-robin `send`, fan-out `publish`,
//!   local or cluster scope
//! - **Replies** ([`ReplyContext`]): every delivery can be answered, and
//!   every answer can be answered again
//!
//! ## Example
//!
//! ```ignore
//! use addrbus::{EventBus, Handler, ReplyContext, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), addrbus::BusError> {
//!     let bus = EventBus::builder().build()?;
//!
//!     let echo = Handler::new(|body: Value, ctx: ReplyContext| async move {
//!         ctx.reply(body)
//!     });
//!     bus.register_handler("echo", &echo)?;
//!
//!     let reply = bus.request("echo", Value::object([("a", Value::from(1))])).await?;
//!     assert_eq!(reply.body.get("a"), Some(&Value::Int(1)));
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod message;
pub mod transport;

mod bus;

pub use bus::{
    BusConfig, EventBus, EventBusBuilder, Reply, DEFAULT_MAX_CONCURRENT_HANDLERS,
    DEFAULT_REPLY_TIMEOUT,
};
pub use error::{BusError, Result};
pub use handler::{Handler, ReplyContext};
pub use message::{Message, MessageKind, Value};
pub use transport::{Cluster, Scope};
