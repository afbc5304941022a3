//! Subject/subscriber fan-out engine.
//!
//! Every subscription gets a private unbounded FIFO queue and exactly one
//! worker task draining it. [`Engine::publish`] only pushes onto those queues,
//! so it never waits for a handler, and a single worker per queue delivers
//! each subscriber's messages in publish order without any per-handler lock.
//!
//! ```text
//! publish(subject, msg)
//!     │  compact + snapshot under the subject lock
//!     ├──► [queue 1] ──► worker 1 ──► handler1.handle()
//!     ├──► [queue 2] ──► worker 2 ──► handler2.handle()
//!     └──► [queue N] ──► worker N ──► handlerN.handle()
//! ```
//!
//! ## Shutdown
//!
//! [`Engine::close`] (or [`Engine::close_with`] for a caller-supplied
//! cancellation future) moves the engine to *closing*, releases every queue's
//! sending half and waits for the workers to drain. When the deadline or
//! cancel future fires first, `close` returns [`EngineError::ForcedShutdown`]
//! but the workers are **not** cancelled: they keep running in the background
//! until their queues are empty, and a handler that never returns keeps its worker alive
//! indefinitely. Callers that need a hard guarantee must confirm drainage
//! themselves (see [`EngineStats::workers`]) before reusing or discarding
//! resources the handlers touch.

use crate::handler::HandlerRef;
use crate::message::Payload;
use crate::registry::{Registry, RegistryError, Subscription};
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Engine errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A caller-supplied argument was rejected.
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    /// The engine is closing or closed.
    #[error("System unavailable: {0}")]
    Unavailable(&'static str),

    /// The close deadline passed before all deliveries drained.
    #[error("Forced shutdown: {pending} delivery workers still running")]
    ForcedShutdown {
        /// Workers that had not finished when the deadline passed.
        pending: usize,
    },
}

/// Coarse error category, for mapping onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad subject, handler or message.
    InvalidInput,
    /// Engine no longer accepts calls.
    Unavailable,
    /// Close gave up waiting.
    ForcedShutdown,
}

impl EngineError {
    /// Get the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::ForcedShutdown { .. } => ErrorKind::ForcedShutdown,
        }
    }
}

/// Engine lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Accepting subscriptions and publishes.
    Open,
    /// Close was requested; outstanding deliveries may still be draining.
    Closing,
    /// All deliveries drained.
    Closed,
}

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Engine statistics.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Number of subjects ever subscribed to.
    pub subjects: usize,
    /// Number of active subscriptions.
    pub subscribers: usize,
    /// Number of delivery workers still running.
    pub workers: usize,
}

/// The publish/subscribe engine.
///
/// Owned explicitly by the caller; share it with `Arc` across tasks.
/// All methods take `&self`.
pub struct Engine<P: Payload> {
    registry: Registry<P>,
    state: AtomicU8,
    workers: Arc<watch::Sender<usize>>,
}

impl<P: Payload> Engine<P> {
    /// Create a new, open engine.
    #[must_use]
    pub fn new() -> Self {
        let (workers, _) = watch::channel(0);
        Self {
            registry: Registry::new(),
            state: AtomicU8::new(STATE_OPEN),
            workers: Arc::new(workers),
        }
    }

    /// Get the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => EngineState::Open,
            STATE_CLOSING => EngineState::Closing,
            _ => EngineState::Closed,
        }
    }

    /// Get engine statistics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            subjects: self.registry.subject_count(),
            subscribers: self.registry.total_subscribers(),
            workers: *self.workers.borrow(),
        }
    }

    /// Get the number of active subscriptions on a subject.
    #[must_use]
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.registry.subscriber_count(subject)
    }

    /// Check if a subject has been subscribed to at least once.
    #[must_use]
    pub fn subject_exists(&self, subject: &str) -> bool {
        self.registry.contains_subject(subject)
    }

    /// Subscribe `handler` to `subject`.
    ///
    /// Starts a dedicated worker that hands every message published to
    /// `subject` from now on to `handler`, one at a time, in publish order.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Unavailable`] if the engine is closing or closed, or if
    ///   called outside of a Tokio runtime.
    /// - [`EngineError::InvalidInput`] if `handler` is `None` or `subject` is empty.
    pub fn subscribe(
        &self,
        subject: &str,
        handler: impl Into<Option<HandlerRef<P>>>,
    ) -> Result<Subscription, EngineError> {
        self.ensure_open()?;
        let Some(handler) = handler.into() else {
            return Err(EngineError::InvalidInput("handler is absent"));
        };
        if subject.is_empty() {
            return Err(EngineError::InvalidInput("subject is empty"));
        }

        // Nothing may be registered unless the worker can be spawned.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return Err(EngineError::Unavailable("no Tokio runtime"));
        };

        // Count the worker before it becomes reachable by publish, so that a
        // concurrent close cannot observe zero workers with a message queued.
        let guard = WorkerGuard::new(Arc::clone(&self.workers));

        let (subscription, queue) = self
            .registry
            .add_subscription(subject)
            .map_err(|_| EngineError::Unavailable("engine is closing"))?;

        runtime.spawn(run_worker(subscription.clone(), queue, handler, guard));

        debug!(
            subject = %subject,
            subscription = subscription.id(),
            "Subscribed"
        );
        Ok(subscription)
    }

    /// Publish `message` to every active subscriber of `subject`.
    ///
    /// Only enqueues: returns as soon as the message sits in every current
    /// subscriber's queue, without waiting for any handler. Returns the number
    /// of subscribers the message was queued for.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Unavailable`] if the engine is closing or closed.
    /// - [`EngineError::InvalidInput`] if `subject` or `message` is empty, or if
    ///   `subject` has never been subscribed to.
    pub fn publish(&self, subject: &str, message: P) -> Result<usize, EngineError> {
        self.ensure_open()?;
        if subject.is_empty() {
            return Err(EngineError::InvalidInput("subject is empty"));
        }
        if message.is_empty_payload() {
            return Err(EngineError::InvalidInput("message is empty"));
        }

        match self.registry.fan_out(subject, message) {
            Ok(count) => {
                trace!(subject = %subject, recipients = count, "Published message");
                Ok(count)
            }
            Err(RegistryError::UnknownSubject) => {
                Err(EngineError::InvalidInput("subject has no subscribers"))
            }
            Err(RegistryError::Sealed) => Err(EngineError::Unavailable("engine is closing")),
        }
    }

    /// Close the engine, waiting up to `grace` for deliveries to drain.
    ///
    /// See [`Engine::close_by`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ForcedShutdown`] if `grace` elapses first.
    pub async fn close(&self, grace: Duration) -> Result<(), EngineError> {
        self.close_by(Instant::now() + grace).await
    }

    /// Close the engine, waiting until `deadline` for deliveries to drain.
    ///
    /// See [`Engine::close_with`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ForcedShutdown`] if `deadline` has already passed
    /// or passes before the drain completes.
    pub async fn close_by(&self, deadline: Instant) -> Result<(), EngineError> {
        self.close_with(async move {
            if Instant::now() < deadline {
                tokio::time::sleep_until(deadline).await;
            }
        })
        .await
    }

    /// Close the engine, waiting for deliveries to drain until `cancel`
    /// completes.
    ///
    /// The engine stops accepting subscribes and publishes immediately. Every
    /// message already queued is still delivered. Calling this again after a
    /// forced shutdown waits again. A `cancel` future that is already complete
    /// ends the wait at once, even when nothing is left to drain.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ForcedShutdown`] if `cancel` completes before the
    /// drain does. Workers are left running.
    pub async fn close_with<F>(&self, cancel: F) -> Result<(), EngineError>
    where
        F: Future<Output = ()>,
    {
        if self
            .state
            .compare_exchange(
                STATE_OPEN,
                STATE_CLOSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            info!("Engine closing");
        }

        self.registry.seal();

        let mut workers = self.workers.subscribe();
        tokio::select! {
            biased;
            () = cancel => Err(self.forced_shutdown()),
            _ = workers.wait_for(|n| *n == 0) => {
                self.state.store(STATE_CLOSED, Ordering::Release);
                info!("Engine closed");
                Ok(())
            }
        }
    }

    fn forced_shutdown(&self) -> EngineError {
        let pending = *self.workers.borrow();
        warn!(pending, "Close deadline passed; workers left draining");
        EngineError::ForcedShutdown { pending }
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.state.load(Ordering::Acquire) == STATE_OPEN {
            Ok(())
        } else {
            Err(EngineError::Unavailable("engine is closing"))
        }
    }
}

impl<P: Payload> Default for Engine<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the live worker count accurate however a worker exits.
struct WorkerGuard {
    workers: Arc<watch::Sender<usize>>,
}

impl WorkerGuard {
    fn new(workers: Arc<watch::Sender<usize>>) -> Self {
        workers.send_modify(|n| *n += 1);
        Self { workers }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.workers.send_modify(|n| *n = n.saturating_sub(1));
    }
}

async fn run_worker<P: Payload>(
    subscription: Subscription,
    mut queue: mpsc::UnboundedReceiver<P>,
    handler: HandlerRef<P>,
    _guard: WorkerGuard,
) {
    while let Some(message) = queue.recv().await {
        if !subscription.is_active() {
            continue;
        }

        // The call itself sits inside the future so a panic raised before the
        // handler returns its future is caught too.
        let delivery = AssertUnwindSafe(async { handler.handle(message).await }).catch_unwind();
        if let Err(panic) = delivery.await {
            warn!(
                subject = %subscription.subject(),
                subscription = subscription.id(),
                panic = %panic_message(&*panic),
                "Handler panicked"
            );
        }
    }

    trace!(
        subject = %subscription.subject(),
        subscription = subscription.id(),
        "Delivery worker finished"
    );
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
