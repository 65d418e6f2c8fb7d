//! Expiration notification fan-out
//!
//! Observers hold a [`Subscription`]; the registry actor pushes one
//! [`Expiration`] to every registered observer after the slot has been
//! cleared. Each observer has its own unbounded queue so a slow reader
//! never stalls the actor or other observers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use ktimer_types::Owner;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A timer that reached its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiration {
    pub key: String,
    pub slot: usize,
    pub owner: Owner,
    pub created_at: DateTime<Local>,
}

type ObserverMap = BTreeMap<u64, UnboundedSender<Expiration>>;

/// Registered observers, shared between the actor and live subscriptions.
#[derive(Debug, Clone, Default)]
pub struct NotificationChannel {
    observers: Arc<Mutex<ObserverMap>>,
    next_id: Arc<AtomicU64>,
}

impl NotificationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn observers(&self) -> MutexGuard<'_, ObserverMap> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new observer. It receives every expiration published
    /// after this call returns.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers().insert(id, tx);
        tracing::debug!(observer = id, "observer subscribed");

        Subscription {
            id,
            rx,
            channel: self.clone(),
        }
    }

    /// Remove an observer. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        if self.observers().remove(&id).is_some() {
            tracing::debug!(observer = id, "observer unsubscribed");
        }
    }

    /// Deliver `event` to every observer, pruning ones whose receiver is gone.
    ///
    /// Returns how many observers received it.
    pub fn publish(&self, event: &Expiration) -> usize {
        let mut observers = self.observers();
        observers.retain(|_, tx| tx.send(event.clone()).is_ok());
        observers.len()
    }

    /// Drop every observer; their subscriptions end after draining.
    pub fn close(&self) {
        let mut observers = self.observers();
        if !observers.is_empty() {
            tracing::debug!(observers = observers.len(), "closing notification channel");
        }
        observers.clear();
    }

    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }
}

/// One observer's view of the channel.
///
/// Dropping the subscription unregisters it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: UnboundedReceiver<Expiration>,
    channel: NotificationChannel,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next expiration.
    ///
    /// Returns `None` once unsubscribed and every queued event was read.
    pub async fn recv(&mut self) -> Option<Expiration> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Expiration> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving new events. Idempotent.
    pub fn unsubscribe(&mut self) {
        self.channel.unsubscribe(self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.channel.unsubscribe(self.id);
    }
}
