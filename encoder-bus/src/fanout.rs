use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::{frame::Frame, stream::EncodedStream};

/// Live per-connection streams, in registration order.
#[derive(Default)]
pub struct SubscriberSet {
    entries: Vec<Arc<dyn EncodedStream>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if a stream with the same id is already registered.
    pub fn insert(&mut self, stream: Arc<dyn EncodedStream>) -> bool {
        if self.contains(stream.id()) {
            return false;
        }
        self.entries.push(stream);
        true
    }

    /// Removing an absent id is a no-op.
    pub fn remove(&mut self, id: &str) -> Option<Arc<dyn EncodedStream>> {
        let index = self.entries.iter().position(|s| s.id() == id)?;
        Some(self.entries.remove(index))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|s| s.id() == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn EncodedStream>> {
        self.entries.clone()
    }

    fn drain(&mut self) -> Vec<Arc<dyn EncodedStream>> {
        std::mem::take(&mut self.entries)
    }
}

/// Delivers every produced frame to the persistent stream and to each live
/// subscriber.
///
/// Writes are fire-and-forget: a slow or failing consumer never holds up the
/// others or the producer. The registry lock is only held to mutate or copy
/// the subscriber list, never while writing.
pub struct FanOut {
    persistent: Arc<dyn EncodedStream>,
    subscribers: Mutex<SubscriberSet>,
    cancel: CancellationToken,
    this: Weak<FanOut>,
}

impl FanOut {
    pub fn new(persistent: Arc<dyn EncodedStream>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            persistent,
            subscribers: Mutex::new(SubscriberSet::new()),
            cancel: CancellationToken::new(),
            this: this.clone(),
        })
    }

    pub fn persistent(&self) -> &Arc<dyn EncodedStream> {
        &self.persistent
    }

    /// Writes `frame` to every stream and returns how many were ready for it.
    pub fn publish(&self, frame: &Frame) -> usize {
        let subscribers = self.registry().snapshot();
        let mut delivered = 0;
        for stream in std::iter::once(&self.persistent).chain(subscribers.iter()) {
            if stream.is_ready() {
                delivered += 1;
            }
            if let Some(Err(e)) = stream.write(frame).now_or_never() {
                log::debug!("fanout: frame not accepted by {}: {}", stream.id(), e);
            }
        }
        delivered
    }

    /// Registers a live stream; it is dropped from the registry as soon as it
    /// is disposed, whatever the cause. Must be called inside a tokio runtime.
    pub fn subscribe(&self, stream: Arc<dyn EncodedStream>) -> bool {
        if self.cancel.is_cancelled() || stream.is_disposed() {
            return false;
        }
        let id = stream.id().to_string();
        let total = {
            let mut registry = self.registry();
            if !registry.insert(Arc::clone(&stream)) {
                return false;
            }
            registry.len()
        };
        log::info!("fanout: subscriber {} registered ({} live)", id, total);

        let disposed = stream.disposed();
        let shutdown = self.cancel.clone();
        let this = self.this.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = disposed.cancelled() => {
                    if let Some(fanout) = this.upgrade() {
                        fanout.unsubscribe(&id);
                    }
                }
                _ = shutdown.cancelled() => {}
            }
        });
        true
    }

    /// Removes a subscriber without disposing it. Idempotent.
    pub fn unsubscribe(&self, id: &str) -> Option<Arc<dyn EncodedStream>> {
        let (removed, total) = {
            let mut registry = self.registry();
            (registry.remove(id), registry.len())
        };
        if removed.is_some() {
            log::info!("fanout: subscriber {} removed ({} live)", id, total);
        }
        removed
    }

    /// Connection-close path: unregister, then dispose.
    pub fn close(&self, id: &str) {
        if let Some(stream) = self.unsubscribe(id) {
            stream.dispose();
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.registry().contains(id)
    }

    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    pub fn subscriber_ids(&self) -> Vec<String> {
        self.registry().ids()
    }

    /// Disposes every subscriber and the persistent stream.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let subscribers = self.registry().drain();
        for stream in subscribers {
            stream.dispose();
        }
        self.persistent.dispose();
        log::info!("fanout: shut down");
    }

    fn registry(&self) -> MutexGuard<'_, SubscriberSet> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "fanout_test.rs"]
mod fanout_test;
