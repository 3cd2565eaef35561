//! One-shot timers delivering events to the client task.
//!
//! A timer is a spawned sleep that posts an event when it expires. Dropping
//! the [`Timer`] aborts it. An event can still be in the channel when its
//! timer is dropped, so every event carries the token of the timer that
//! produced it and receivers compare it against the timer they hold.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A running timer.
#[derive(Debug)]
pub(crate) struct Timer {
    token: u64,
    handle: JoinHandle<()>,
}

impl Timer {
    pub fn token(&self) -> u64 {
        self.token
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Starts timers posting events of type `E`.
#[derive(Debug)]
pub(crate) struct TimerSet<E> {
    tx: mpsc::UnboundedSender<E>,
    next_token: u64,
}

impl<E: Send + 'static> TimerSet<E> {
    pub fn new(tx: mpsc::UnboundedSender<E>) -> Self {
        Self { tx, next_token: 0 }
    }

    /// Start a timer posting `event(token)` after `delay`.
    pub fn start(&mut self, delay: Duration, event: impl FnOnce(u64) -> E) -> Timer {
        self.next_token += 1;
        let token = self.next_token;
        let event = event(token);
        let tx = self.tx.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });

        Timer { token, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_with_token() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx);

        let timer = timers.start(Duration::from_secs(5), |token| token);
        assert_eq!(rx.recv().await, Some(timer.token()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx);

        let dropped = timers.start(Duration::from_secs(1), |token| token);
        let kept = timers.start(Duration::from_secs(2), |token| token);
        drop(dropped);

        assert_eq!(rx.recv().await, Some(kept.token()));
        assert!(rx.try_recv().is_err());
    }
}
