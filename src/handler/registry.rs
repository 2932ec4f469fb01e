//! Handler references and the identity-keyed handler registry.
//!
//! A [`Handler`] is a shared reference to a callback. Its identity is the
//! identity of the shared allocation: clones of a `Handler` are the same
//! handler, two `Handler::new` calls over identical closures are not. The
//! [`HandlerRegistry`] uses that identity to find the transport registration
//! to remove when a handler is unregistered.
//!
//! # Example
//!
//! ```ignore
//! use addrbus::{Handler, ReplyContext, Value};
//!
//! let echo = Handler::new(|body: Value, reply: ReplyContext| async move {
//!     reply.reply(body)
//! });
//! let same = echo.clone();
//! assert_eq!(echo.id(), same.id());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;

use super::ReplyContext;
use crate::error::Result;
use crate::message::Value;
use crate::transport::{RegistrationId, Scope};

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for handler functions.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one delivered message.
    fn call(&self, body: Value, reply: ReplyContext) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Value, ReplyContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, body: Value, reply: ReplyContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(body, reply))
    }
}

/// Wrapper that converts the body to `T` before calling the handler.
pub struct TypedHandler<F, T, Fut>
where
    F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> MessageHandler for TypedHandler<F, T, Fut>
where
    F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, body: Value, reply: ReplyContext) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match body.into_typed() {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        Box::pin((self.handler)(parsed, reply))
    }
}

/// Identity of a [`Handler`], stable for as long as any clone of it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(usize);

/// Shared reference to a message handler.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<dyn MessageHandler>,
}

impl Handler {
    /// Create a handler from an async callback.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Value, ReplyContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::from_handler(handler)
    }

    /// Create a handler whose body is converted to `T` first.
    ///
    /// A body that does not convert is reported as a handler error.
    pub fn typed<F, T, Fut>(handler: F) -> Self
    where
        F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::from_handler(TypedHandler::new(handler))
    }

    /// Create a handler from any [`MessageHandler`] implementation.
    pub fn from_handler<H: MessageHandler>(handler: H) -> Self {
        Self {
            inner: Arc::new(handler),
        }
    }

    /// Reference identity of this handler.
    pub fn id(&self) -> HandlerId {
        HandlerId(Arc::as_ptr(&self.inner) as *const () as usize)
    }

    pub(crate) fn call(
        &self,
        body: Value,
        reply: ReplyContext,
    ) -> BoxFuture<'static, HandlerResult> {
        self.inner.call(body, reply)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.id()).finish()
    }
}

/// One registration of a handler at an address.
#[derive(Debug, Clone, Copy)]
struct HandlerEntry {
    registration: RegistrationId,
    scope: Scope,
}

/// Registry mapping (address, handler identity) to transport registrations.
///
/// Registering the same handler twice at one address keeps two entries;
/// unregistering removes the most recent one.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: Mutex<HashMap<(String, HandlerId), Vec<HandlerEntry>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a registration, creating it while the registry is locked.
    ///
    /// `register` performs the transport registration; holding the lock across
    /// it keeps a concurrent unregister of the same handler from missing it.
    pub(crate) fn insert_with<R>(
        &self,
        address: &str,
        handler: &Handler,
        scope: Scope,
        register: R,
    ) -> Result<RegistrationId>
    where
        R: FnOnce() -> Result<RegistrationId>,
    {
        let mut entries = self.lock();
        let registration = register()?;
        entries
            .entry((address.to_string(), handler.id()))
            .or_default()
            .push(HandlerEntry {
                registration,
                scope,
            });
        Ok(registration)
    }

    /// Remove the most recent registration of `handler` at `address`.
    ///
    /// `unregister` is called with the registration while the registry is
    /// locked. Returns `None` when the handler is not registered there.
    pub(crate) fn remove_with<U>(
        &self,
        address: &str,
        handler: &Handler,
        unregister: U,
    ) -> Option<RegistrationId>
    where
        U: FnOnce(RegistrationId),
    {
        let mut entries = self.lock();
        let key = (address.to_string(), handler.id());
        let list = entries.get_mut(&key)?;
        let entry = list.pop()?;
        if list.is_empty() {
            entries.remove(&key);
        }
        unregister(entry.registration);
        Some(entry.registration)
    }

    /// Number of registrations of `handler` at `address`.
    pub fn count(&self, address: &str, handler: &Handler) -> usize {
        self.lock()
            .get(&(address.to_string(), handler.id()))
            .map_or(0, Vec::len)
    }

    /// Number of registrations with the given scope, across all addresses.
    pub fn count_scope(&self, scope: Scope) -> usize {
        self.lock()
            .values()
            .flatten()
            .filter(|entry| entry.scope == scope)
            .count()
    }

    /// Total number of registrations.
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every registration.
    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, HandlerId), Vec<HandlerEntry>>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
