//! Pending numbers waiting to be called, one at a time, in FIFO order.

pub mod storage;

use std::{collections::HashSet, time::Duration};

use indexmap::IndexSet;
use rand::seq::IndexedRandom;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    dto::snapshot::Number,
    error::ValidationError,
    timer::{Timer, TimerTicket},
};

pub use self::storage::{FileStorage, LocalStorage, MemoryStorage};

/// Storage key of the persisted queue.
pub const QUEUE_STORAGE_KEY: &str = "loto_queue";
/// Delay before the queue tries the next item after a resolution.
pub const DEFAULT_CONTINUATION_DELAY: Duration = Duration::from_millis(500);

/// Posted when the continuation delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueAlarm(TimerTicket);

/// Caller-side FIFO of distinct numbers, persisted on every change.
pub struct QueueManager {
    pending: IndexSet<Number>,
    processing: Option<Number>,
    storage: Box<dyn LocalStorage>,
    continuation: Timer,
    continuation_delay: Duration,
    alarms: mpsc::UnboundedSender<QueueAlarm>,
}

impl QueueManager {
    /// Rebuild the queue from `storage`, dropping invalid or duplicate entries.
    pub fn restore(
        storage: Box<dyn LocalStorage>,
        continuation_delay: Duration,
        alarms: mpsc::UnboundedSender<QueueAlarm>,
    ) -> Self {
        let pending = match storage.get(QUEUE_STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<i64>>(&raw) {
                Ok(values) => values
                    .into_iter()
                    .filter_map(|value| Number::new(value).ok())
                    .collect(),
                Err(err) => {
                    warn!(error = %err, "stored queue is unreadable; starting empty");
                    IndexSet::new()
                }
            },
            Ok(None) => IndexSet::new(),
            Err(err) => {
                warn!(error = %err, "failed to read stored queue; starting empty");
                IndexSet::new()
            }
        };
        if !pending.is_empty() {
            info!(count = pending.len(), "restored pending queue");
        }

        Self {
            pending,
            processing: None,
            storage,
            continuation: Timer::new(),
            continuation_delay,
            alarms,
        }
    }

    /// Append `number` unless it is queued, being processed or already called.
    ///
    /// Returns the new queue length.
    pub fn enqueue(&mut self, number: Number, called: &HashSet<Number>) -> Result<usize, ValidationError> {
        if called.contains(&number) {
            return Err(ValidationError::AlreadyCalled(number.value()));
        }
        if self.processing == Some(number) || self.pending.contains(&number) {
            return Err(ValidationError::AlreadyQueued(number.value()));
        }
        self.pending.insert(number);
        self.persist();
        Ok(self.pending.len())
    }

    /// Validate raw input, then [`QueueManager::enqueue`] it.
    pub fn enqueue_raw(&mut self, value: i64, called: &HashSet<Number>) -> Result<usize, ValidationError> {
        let number = Number::new(value)?;
        self.enqueue(number, called)
    }

    /// Pick a random number that is neither called, queued nor in flight.
    pub fn random_pick(&self, called: &HashSet<Number>) -> Result<Number, ValidationError> {
        let candidates = Number::all()
            .filter(|number| {
                !called.contains(number)
                    && !self.pending.contains(number)
                    && self.processing != Some(*number)
            })
            .collect::<Vec<_>>();
        candidates
            .choose(&mut rand::rng())
            .copied()
            .ok_or(ValidationError::Exhausted)
    }

    /// Remove the pending entry at `index`.
    pub fn remove(&mut self, index: usize) -> Result<Number, ValidationError> {
        let number = self
            .pending
            .shift_remove_index(index)
            .ok_or(ValidationError::NoSuchEntry(index))?;
        self.persist();
        Ok(number)
    }

    /// Drop every pending entry. The item in flight is unaffected.
    pub fn clear(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.pending.clear();
        self.persist();
    }

    /// Pending entries in call order.
    pub fn items(&self) -> Vec<Number> {
        self.pending.iter().copied().collect()
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Item currently in flight.
    pub fn processing(&self) -> Option<Number> {
        self.processing
    }

    /// Dequeue the next callable number and mark it in flight.
    ///
    /// No-op while `busy`, while an item is already in flight, or when empty.
    /// Entries called in the meantime are dropped silently.
    pub fn next_ready(&mut self, busy: bool, called: &HashSet<Number>) -> Option<Number> {
        if busy || self.processing.is_some() || self.pending.is_empty() {
            return None;
        }
        let mut changed = false;
        let mut next = None;
        while let Some(number) = self.pending.shift_remove_index(0) {
            changed = true;
            if called.contains(&number) {
                debug!(%number, "skipping queued number that was already called");
                continue;
            }
            next = Some(number);
            break;
        }
        if changed {
            self.persist();
        }
        self.processing = next;
        next
    }

    /// Release the item in flight and schedule the next attempt.
    pub fn resolve(&mut self) {
        if let Some(number) = self.processing.take() {
            debug!(%number, "queue item resolved");
        }
        self.continuation
            .arm(self.continuation_delay, &self.alarms, QueueAlarm);
    }

    /// Whether `alarm` is the live continuation.
    pub fn accept_alarm(&mut self, alarm: QueueAlarm) -> bool {
        self.continuation.accept(alarm.0)
    }

    fn persist(&mut self) {
        let values = self.pending.iter().map(|number| number.value()).collect::<Vec<_>>();
        let result = serde_json::to_string(&values)
            .map_err(|err| err.to_string())
            .and_then(|raw| {
                self.storage
                    .set(QUEUE_STORAGE_KEY, &raw)
                    .map_err(|err| err.to_string())
            });
        if let Err(err) = result {
            warn!(error = %err, "failed to persist pending queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(storage: MemoryStorage) -> (QueueManager, mpsc::UnboundedReceiver<QueueAlarm>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            QueueManager::restore(Box::new(storage), DEFAULT_CONTINUATION_DELAY, tx),
            rx,
        )
    }

    fn n(value: i64) -> Number {
        Number::new(value).unwrap()
    }

    #[test]
    fn enqueue_validates_input() {
        let (mut queue, _rx) = manager(MemoryStorage::new());
        let called = HashSet::from([n(9)]);

        assert_eq!(
            queue.enqueue_raw(-1, &called),
            Err(ValidationError::OutOfRange { value: -1 })
        );
        assert_eq!(
            queue.enqueue_raw(100, &called),
            Err(ValidationError::OutOfRange { value: 100 })
        );
        assert_eq!(queue.enqueue_raw(5, &called), Ok(1));
        assert_eq!(queue.enqueue_raw(5, &called), Err(ValidationError::AlreadyQueued(5)));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.enqueue_raw(9, &called), Err(ValidationError::AlreadyCalled(9)));
    }

    #[test]
    fn queue_is_persisted_and_restored() {
        let storage = MemoryStorage::new();
        {
            let (mut queue, _rx) = manager(storage.clone());
            queue.enqueue(n(3), &HashSet::new()).unwrap();
            queue.enqueue(n(1), &HashSet::new()).unwrap();
        }
        assert_eq!(
            storage.get(QUEUE_STORAGE_KEY).unwrap().as_deref(),
            Some("[3,1]")
        );

        let (queue, _rx) = manager(storage);
        assert_eq!(queue.items(), vec![n(3), n(1)]);
    }

    #[test]
    fn restore_drops_invalid_and_duplicate_entries() {
        let mut storage = MemoryStorage::new();
        storage.set(QUEUE_STORAGE_KEY, "[7, -2, 7, 150, 12]").unwrap();
        let (queue, _rx) = manager(storage);
        assert_eq!(queue.items(), vec![n(7), n(12)]);
    }

    #[test]
    fn next_ready_is_fifo_guarded_and_skips_called() {
        let (mut queue, _rx) = manager(MemoryStorage::new());
        for value in [4, 8, 15] {
            queue.enqueue_raw(value, &HashSet::new()).unwrap();
        }

        assert_eq!(queue.next_ready(true, &HashSet::new()), None);
        let called = HashSet::from([n(4)]);
        assert_eq!(queue.next_ready(false, &called), Some(n(8)));
        assert_eq!(queue.processing(), Some(n(8)));
        assert_eq!(queue.next_ready(false, &called), None, "one item in flight at a time");
        assert_eq!(queue.items(), vec![n(15)]);
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_schedules_continuation() {
        let (mut queue, mut rx) = manager(MemoryStorage::new());
        queue.enqueue_raw(42, &HashSet::new()).unwrap();
        queue.enqueue_raw(73, &HashSet::new()).unwrap();
        assert_eq!(queue.next_ready(false, &HashSet::new()), Some(n(42)));

        let resolved_at = tokio::time::Instant::now();
        queue.resolve();
        assert_eq!(queue.processing(), None);

        let alarm = rx.recv().await.unwrap();
        assert!(resolved_at.elapsed() >= DEFAULT_CONTINUATION_DELAY);
        assert!(queue.accept_alarm(alarm));
        assert_eq!(queue.next_ready(false, &HashSet::new()), Some(n(73)));
    }

    #[test]
    fn random_pick_avoids_taken_numbers() {
        let (mut queue, _rx) = manager(MemoryStorage::new());
        let called = Number::all().filter(|number| number.value() < 98).collect::<HashSet<_>>();
        queue.enqueue_raw(98, &called).unwrap();

        assert_eq!(queue.random_pick(&called), Ok(n(99)));
        queue.enqueue_raw(99, &called).unwrap();
        assert_eq!(queue.random_pick(&called), Err(ValidationError::Exhausted));
    }

    #[test]
    fn remove_and_clear() {
        let (mut queue, _rx) = manager(MemoryStorage::new());
        for value in [1, 2, 3] {
            queue.enqueue_raw(value, &HashSet::new()).unwrap();
        }
        assert_eq!(queue.remove(1), Ok(n(2)));
        assert_eq!(queue.remove(5), Err(ValidationError::NoSuchEntry(5)));
        queue.clear();
        assert!(queue.is_empty());
    }
}
