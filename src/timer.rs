//! Cancellable one-shot timers that report back to an actor mailbox.
//!
//! Every armed timer carries a generation number. Re-arming or cancelling
//! bumps the generation, so a firing that was already queued before the
//! cancellation is recognised as stale and ignored by [`Timer::accept`].

use std::time::Duration;

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep_until},
};

/// Identifies one arming of a [`Timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTicket {
    generation: u64,
}

/// A single pending deadline that posts a message when it elapses.
#[derive(Debug, Default)]
pub struct Timer {
    generation: u64,
    deadline: Option<Instant>,
    task: Option<JoinHandle<()>>,
}

impl Timer {
    /// Create a disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer, replacing any pending deadline.
    ///
    /// When `delay` elapses the message built by `make` is sent on `tx`.
    pub fn arm<M, F>(&mut self, delay: Duration, tx: &mpsc::UnboundedSender<M>, make: F) -> TimerTicket
    where
        M: Send + 'static,
        F: FnOnce(TimerTicket) -> M + Send + 'static,
    {
        self.cancel();
        let ticket = TimerTicket {
            generation: self.generation,
        };
        let deadline = Instant::now() + delay;
        let tx = tx.clone();
        self.deadline = Some(deadline);
        self.task = Some(tokio::spawn(async move {
            sleep_until(deadline).await;
            let _ = tx.send(make(ticket));
        }));
        ticket
    }

    /// Drop the pending deadline, if any. Queued firings become stale.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.deadline = None;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Whether a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }

    /// Time left before the pending deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Consume a firing. Returns `false` when the ticket belongs to a cancelled
    /// or superseded arming.
    pub fn accept(&mut self, ticket: TimerTicket) -> bool {
        if self.task.is_some() && ticket.generation == self.generation {
            self.task = None;
            self.deadline = None;
            true
        } else {
            false
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Keeps only the latest value and releases it once no newer value arrived for `delay`.
#[derive(Debug)]
pub struct Debounced<T> {
    delay: Duration,
    timer: Timer,
    pending: Option<T>,
}

impl<T> Debounced<T> {
    /// Create an empty debouncer.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timer: Timer::new(),
            pending: None,
        }
    }

    /// Replace the pending value and restart the quiet period.
    pub fn push<M, F>(&mut self, value: T, tx: &mpsc::UnboundedSender<M>, make: F)
    where
        M: Send + 'static,
        F: FnOnce(TimerTicket) -> M + Send + 'static,
    {
        self.pending = Some(value);
        self.timer.arm(self.delay, tx, make);
    }

    /// Take the value if `ticket` is the latest quiet-period firing.
    pub fn release(&mut self, ticket: TimerTicket) -> Option<T> {
        if self.timer.accept(ticket) {
            self.pending.take()
        } else {
            None
        }
    }

    /// Value waiting for the quiet period to end.
    pub fn pending(&self) -> Option<&T> {
        self.pending.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = Timer::new();
        let ticket = timer.arm(Duration::from_millis(500), &tx, |ticket| ticket);
        assert!(timer.is_armed());

        let started = Instant::now();
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, ticket);
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(timer.accept(fired));
        assert!(!timer.accept(fired));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_supersedes_previous_deadline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = Timer::new();
        let first = timer.arm(Duration::from_millis(100), &tx, |ticket| ticket);
        let second = timer.arm(Duration::from_millis(300), &tx, |ticket| ticket);
        assert_ne!(first, second);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, second);
        assert!(!timer.accept(first));
        assert!(timer.accept(second));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel::<TimerTicket>();
        let mut timer = Timer::new();
        timer.arm(Duration::from_millis(100), &tx, |ticket| ticket);
        timer.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(outcome.is_err());
        assert_eq!(timer.remaining(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_releases_latest_value_only() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debounced = Debounced::new(Duration::from_millis(300));
        debounced.push(1, &tx, |ticket| ticket);
        tokio::time::advance(Duration::from_millis(100)).await;
        debounced.push(2, &tx, |ticket| ticket);

        let ticket = rx.recv().await.unwrap();
        assert_eq!(debounced.release(ticket), Some(2));
        assert_eq!(debounced.release(ticket), None);
    }
}
