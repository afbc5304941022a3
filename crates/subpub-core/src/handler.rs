//! Subscriber callbacks.
//!
//! A [`Handler`] is invoked once per delivered message by the subscription's
//! dedicated worker. Invocations for one subscription never overlap, so a
//! handler needs no locking of its own to observe messages in order.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Callback invoked for every message delivered to a subscription.
#[async_trait]
pub trait Handler<P>: Send + Sync + 'static
where
    P: Send + 'static,
{
    /// Handle one delivered message.
    ///
    /// A panic here is caught by the worker and does not stop later
    /// deliveries to the same subscription.
    async fn handle(&self, message: P);
}

/// Shared, type-erased handler.
pub type HandlerRef<P> = Arc<dyn Handler<P>>;

/// Adapter turning an async closure into a [`Handler`].
///
/// ```
/// use subpub_core::{HandlerFn, HandlerRef};
///
/// let handler: HandlerRef<String> = HandlerFn::arc(|msg: String| async move {
///     println!("got {msg}");
/// });
/// # drop(handler);
/// ```
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    /// Wrap a closure.
    #[must_use]
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wrap a closure and erase it into a [`HandlerRef`].
    #[must_use]
    pub fn arc<P, Fut>(f: F) -> HandlerRef<P>
    where
        P: Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<P, F, Fut> Handler<P> for HandlerFn<F>
where
    P: Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, message: P) {
        (self.f)(message).await;
    }
}
