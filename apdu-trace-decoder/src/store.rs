//! Thread-safe transaction store with change notifications
//!
//! Wraps a [`Correlator`] so that one feed thread can submit frames while any
//! number of readers take snapshots or follow changes over a channel. Writers
//! are serialized by the lock; readers only ever see completed transactions.

use crate::config::CorrelatorConfig;
use crate::correlator::{Correlator, CorrelatorStats, FeedFrame, SubmitOutcome};
use crate::transaction::Transaction;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Change notification published by the store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A transaction was completed and appended to the history
    Appended(Arc<Transaction>),
    /// The given number of oldest transactions were evicted
    Evicted(usize),
    /// History was emptied (reset marker, `reset()` or `clear()`)
    Cleared,
}

/// Sender for store events
pub type StoreEventSender = Sender<StoreEvent>;
/// Receiver for store events
pub type StoreEventReceiver = Receiver<StoreEvent>;

/// Shared handle to a correlator; cheap to clone
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    correlator: Arc<RwLock<Correlator>>,
    subscribers: Arc<Mutex<Vec<StoreEventSender>>>,
}

impl SharedStore {
    /// Create a store around a fresh correlator
    pub fn new(config: CorrelatorConfig) -> Self {
        Self::from_correlator(Correlator::new(config))
    }

    /// Share an existing correlator
    pub fn from_correlator(correlator: Correlator) -> Self {
        Self {
            correlator: Arc::new(RwLock::new(correlator)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Submit one feed frame and notify subscribers of the resulting change
    pub fn submit(&self, frame: FeedFrame) -> SubmitOutcome {
        // Publish under the write lock so events arrive in history order
        let mut correlator = self.correlator.write();
        let outcome = correlator.submit(frame);

        match &outcome {
            SubmitOutcome::Completed {
                transaction,
                evicted,
            } => {
                self.publish(StoreEvent::Appended(Arc::clone(transaction)));
                if *evicted > 0 {
                    self.publish(StoreEvent::Evicted(*evicted));
                }
            }
            SubmitOutcome::Reset => self.publish(StoreEvent::Cleared),
            _ => {}
        }

        outcome
    }

    /// Submit raw bytes as a payload frame
    pub fn submit_bytes(&self, bytes: impl Into<Vec<u8>>) -> SubmitOutcome {
        self.submit(FeedFrame::payload(bytes))
    }

    /// Equivalent to receiving a reset marker
    pub fn reset(&self) {
        let mut correlator = self.correlator.write();
        correlator.reset();
        self.publish(StoreEvent::Cleared);
    }

    /// Drop the pending command and empty the history
    pub fn clear(&self) {
        let mut correlator = self.correlator.write();
        correlator.clear();
        self.publish(StoreEvent::Cleared);
    }

    /// Completed transactions in submission order
    pub fn snapshot(&self) -> Vec<Arc<Transaction>> {
        self.correlator.read().snapshot()
    }

    /// Number of completed transactions
    pub fn len(&self) -> usize {
        self.correlator.read().len()
    }

    /// True if the history is empty
    pub fn is_empty(&self) -> bool {
        self.correlator.read().is_empty()
    }

    /// Session counters
    pub fn stats(&self) -> CorrelatorStats {
        self.correlator.read().stats()
    }

    /// Follow changes on an unbounded channel
    ///
    /// Subscribers that drop their receiver are pruned on the next event.
    pub fn subscribe(&self) -> StoreEventReceiver {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Follow changes on a bounded channel
    ///
    /// Events that do not fit are dropped for this subscriber only; use
    /// [`snapshot`](Self::snapshot) to resynchronize.
    pub fn subscribe_bounded(&self, capacity: usize) -> StoreEventReceiver {
        let (tx, rx) = bounded(capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, event: StoreEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => {
                log::warn!("Subscriber channel full, dropping {:?}", event);
                true
            }
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use std::thread;

    #[test]
    fn test_subscriber_sees_appends_and_clears() {
        let store = SharedStore::default();
        let events = store.subscribe();

        store.submit_bytes(vec![0x00, 0xA4, 0x04, 0x00]);
        store.submit_bytes(vec![0x90, 0x00]);
        store.submit(FeedFrame::Reset);

        match events.try_recv().unwrap() {
            StoreEvent::Appended(tx) => assert_eq!(tx.command().ins, 0xA4),
            other => panic!("expected append, got {:?}", other),
        }
        assert_eq!(events.try_recv().unwrap(), StoreEvent::Cleared);
        assert!(events.try_recv().is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear_notifies() {
        let store = SharedStore::default();
        let events = store.subscribe();
        store.clear();
        assert_eq!(events.try_recv().unwrap(), StoreEvent::Cleared);
    }

    #[test]
    fn test_eviction_is_published() {
        let store = SharedStore::new(CorrelatorConfig::new().with_max_history(NonZeroUsize::MIN));
        let events = store.subscribe();
        for _ in 0..2 {
            store.submit_bytes(vec![0x00, 0xA4, 0x04, 0x00]);
            store.submit_bytes(vec![0x90, 0x00]);
        }

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(received.len(), 3);
        assert_eq!(received[2], StoreEvent::Evicted(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let store = SharedStore::default();
        drop(store.subscribe());
        store.clear();
        assert!(store.subscribers.lock().is_empty());
    }

    #[test]
    fn test_bounded_subscriber_does_not_block_writer() {
        let store = SharedStore::default();
        let events = store.subscribe_bounded(1);
        store.clear();
        store.clear();
        assert_eq!(events.try_iter().count(), 1);
    }

    #[test]
    fn test_concurrent_readers_only_see_completed_transactions() {
        let store = SharedStore::default();
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..200u8 {
                    store.submit_bytes(vec![0x00, i, 0x00, 0x00]);
                    store.submit_bytes(vec![0x90, 0x00]);
                }
            })
        };

        let reader = {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let snapshot = store.snapshot();
                    for (i, tx) in snapshot.iter().enumerate() {
                        assert_eq!(tx.command().ins as usize, i);
                        assert_eq!(tx.response().status_word(), 0x9000);
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(store.len(), 200);
        assert_eq!(store.stats().completed, 200);
    }
}
