//! Subject registry.
//!
//! The registry maps every subject name to the ordered list of subscriptions
//! made on it. Each subscription owns the sending half of a private, unbounded
//! FIFO queue; its receiving half belongs to the subscription's worker.
//!
//! Unsubscribing only clears a subscription's active flag. Inactive entries
//! are physically removed later, by [`Registry::compact`] or as part of a
//! [`Registry::fan_out`], so cancellation never touches the map.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A subscription identifier, unique within one registry.
pub type SubscriptionId = u64;

/// Registry errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The subject has never been subscribed to.
    #[error("Unknown subject")]
    UnknownSubject,

    /// The registry no longer accepts work.
    #[error("Registry is sealed")]
    Sealed,
}

/// Caller-side handle of a subscription.
///
/// Cloning the handle does not create a new subscription; all clones
/// share the same active flag.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriptionId,
    subject: Arc<str>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// Get the subscription identifier.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Get the subject this subscription listens on.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Check whether the subscription still receives messages.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Cancel the subscription.
    ///
    /// Never blocks and may be called any number of times, including while a
    /// delivery is in progress. Messages already queued for this subscription
    /// are discarded by its worker instead of being handed to the handler.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            debug!(subject = %self.subject, subscription = self.id, "Unsubscribed");
        }
    }
}

/// Registry-side entry of a subscription.
#[derive(Debug)]
pub struct Subscriber<P> {
    id: SubscriptionId,
    active: Arc<AtomicBool>,
    queue: mpsc::UnboundedSender<P>,
}

impl<P> Subscriber<P> {
    /// Get the subscription identifier.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Check whether the subscription is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Push a message onto the subscription's queue.
    ///
    /// Returns `false` if the worker has already gone away.
    pub fn enqueue(&self, message: P) -> bool {
        self.queue.send(message).is_ok()
    }
}

/// Thread-safe mapping from subject to its subscriptions.
///
/// Every operation on one subject runs under that subject's map entry lock,
/// which is held only for bookkeeping and enqueueing, never while a handler
/// runs.
#[derive(Debug)]
pub struct Registry<P> {
    subjects: DashMap<String, Vec<Subscriber<P>>>,
    next_id: AtomicU64,
    sealed: AtomicBool,
}

impl<P> Registry<P> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subjects: DashMap::new(),
            next_id: AtomicU64::new(1),
            sealed: AtomicBool::new(false),
        }
    }

    /// Register a new subscription on `subject`, creating the subject if
    /// it has not been seen before.
    ///
    /// Returns the caller handle and the receiving end of the subscription's
    /// delivery queue.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Sealed`] once [`Registry::seal`] was called.
    pub fn add_subscription(
        &self,
        subject: &str,
    ) -> Result<(Subscription, mpsc::UnboundedReceiver<P>), RegistryError> {
        if self.is_sealed() {
            return Err(RegistryError::Sealed);
        }

        let mut entry = self.subjects.entry(subject.to_owned()).or_default();

        // Re-check under the entry lock so that `seal` cannot miss this entry.
        if self.is_sealed() {
            return Err(RegistryError::Sealed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();

        entry.push(Subscriber {
            id,
            active: Arc::clone(&active),
            queue: tx,
        });

        debug!(
            subject = %subject,
            subscription = id,
            subscribers = entry.len(),
            "Subscription added"
        );

        let subscription = Subscription {
            id,
            subject: Arc::from(subject),
            active,
        };
        Ok((subscription, rx))
    }

    /// Remove inactive subscriptions from `subject`.
    ///
    /// Returns the number of subscriptions left, or `None` for an unknown subject.
    pub fn compact(&self, subject: &str) -> Option<usize> {
        let mut entry = self.subjects.get_mut(subject)?;
        compact_list(subject, &mut entry);
        Some(entry.len())
    }

    /// Apply `f` to every active subscription of `subject`.
    ///
    /// Returns the number of subscriptions visited, or `None` for an unknown
    /// subject. `f` runs under the subject's lock and must not block.
    pub fn for_each_subscriber<F>(&self, subject: &str, mut f: F) -> Option<usize>
    where
        F: FnMut(&Subscriber<P>),
    {
        let entry = self.subjects.get(subject)?;
        let mut visited = 0;
        for subscriber in entry.iter().filter(|s| s.is_active()) {
            f(subscriber);
            visited += 1;
        }
        Some(visited)
    }

    /// Compact `subject` and enqueue `message` for every subscription that is
    /// still active, as one atomic step.
    ///
    /// Returns the number of queues the message was pushed onto.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownSubject`] if the subject was never
    /// subscribed to, or [`RegistryError::Sealed`] if the registry is sealed.
    pub fn fan_out(&self, subject: &str, message: P) -> Result<usize, RegistryError>
    where
        P: Clone,
    {
        let mut entry = self
            .subjects
            .get_mut(subject)
            .ok_or(RegistryError::UnknownSubject)?;

        if self.is_sealed() {
            return Err(RegistryError::Sealed);
        }

        compact_list(subject, &mut entry);

        let delivered = entry
            .iter()
            .filter(|s| s.enqueue(message.clone()))
            .count();
        Ok(delivered)
    }

    /// Stop accepting subscriptions and release every queue's sending half.
    ///
    /// Workers then drain whatever is already queued and exit. Subject names
    /// stay registered. Returns the number of subscriptions released.
    pub fn seal(&self) -> usize {
        self.sealed.store(true, Ordering::SeqCst);

        let mut released = 0;
        for mut entry in self.subjects.iter_mut() {
            released += entry.len();
            entry.clear();
        }

        if released > 0 {
            debug!(released, "Registry sealed");
        }
        released
    }

    /// Check whether the registry has been sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Check if a subject has ever been subscribed to.
    #[must_use]
    pub fn contains_subject(&self, subject: &str) -> bool {
        self.subjects.contains_key(subject)
    }

    /// Get the number of active subscriptions on a subject.
    #[must_use]
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.subjects
            .get(subject)
            .map(|e| e.iter().filter(|s| s.is_active()).count())
            .unwrap_or(0)
    }

    /// Get the number of known subjects.
    #[must_use]
    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    /// Get the number of active subscriptions across all subjects.
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.subjects
            .iter()
            .map(|e| e.iter().filter(|s| s.is_active()).count())
            .sum()
    }

    /// Get all known subject names.
    #[must_use]
    pub fn subjects(&self) -> Vec<String> {
        self.subjects.iter().map(|e| e.key().clone()).collect()
    }
}

impl<P> Default for Registry<P> {
    fn default() -> Self {
        Self::new()
    }
}

fn compact_list<P>(subject: &str, list: &mut Vec<Subscriber<P>>) {
    let before = list.len();
    list.retain(Subscriber::is_active);
    let removed = before - list.len();
    if removed > 0 {
        trace!(subject = %subject, removed, remaining = list.len(), "Compacted subscribers");
    }
}
