//! Payload types carried by the engine.
//!
//! An engine instance is generic over a single payload type. The engine never
//! inspects a payload beyond asking whether it is empty; everything else is
//! opaque and is cloned once per receiving subscriber.

use bytes::Bytes;
use std::sync::Arc;

/// A message payload that can be fanned out to subscribers.
///
/// Cloning should be cheap: a published payload is cloned for every active
/// subscriber of its subject. [`Bytes`] and `Arc<T>` are the usual choices.
pub trait Payload: Clone + Send + Sync + 'static {
    /// Whether this payload carries no data and must be rejected on publish.
    fn is_empty_payload(&self) -> bool;
}

impl Payload for Bytes {
    fn is_empty_payload(&self) -> bool {
        self.is_empty()
    }
}

impl Payload for String {
    fn is_empty_payload(&self) -> bool {
        self.is_empty()
    }
}

impl Payload for Vec<u8> {
    fn is_empty_payload(&self) -> bool {
        self.is_empty()
    }
}

impl Payload for &'static str {
    fn is_empty_payload(&self) -> bool {
        self.is_empty()
    }
}

impl<T> Payload for Arc<T>
where
    T: Payload,
{
    fn is_empty_payload(&self) -> bool {
        self.as_ref().is_empty_payload()
    }
}
