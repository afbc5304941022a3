//! Shared fixtures for the subpub benchmarks.

use bytes::Bytes;
use subpub_core::{Engine, HandlerFn, HandlerRef};
use tokio::sync::mpsc;

/// Build a multi-threaded runtime for driving delivery workers.
///
/// # Panics
///
/// Panics if the runtime cannot be created.
#[must_use]
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

/// A handler that drops every message.
#[must_use]
pub fn noop_handler() -> HandlerRef<Bytes> {
    HandlerFn::arc(|_payload: Bytes| async move {})
}

/// A handler that forwards every message into a channel.
#[must_use]
pub fn forwarding_handler() -> (HandlerRef<Bytes>, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = HandlerFn::arc(move |payload: Bytes| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(payload);
        }
    });
    (handler, rx)
}

/// An engine with `subscribers` no-op subscriptions on `subject`.
///
/// Must be called inside a runtime context.
///
/// # Panics
///
/// Panics if subscribing fails.
#[must_use]
pub fn engine_with_subscribers(subject: &str, subscribers: usize) -> Engine<Bytes> {
    let engine = Engine::new();
    for _ in 0..subscribers {
        engine
            .subscribe(subject, noop_handler())
            .expect("subscribe failed");
    }
    engine
}
