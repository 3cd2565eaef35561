//! Retry scheduling for outgoing messages.
//!
//! Each in-flight message owns one scheduler. The dispatcher asks it how
//! long to wait for a reply, how long to wait before retrying, and whether
//! another attempt is allowed; the scheduler only keeps the books.

use bayeux_protocol::Message;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Parameters for a new scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Declared time to wait for a reply.
    pub timeout: Duration,
    /// Delay between a failed attempt and the next one.
    pub interval: Duration,
    /// Maximum number of send attempts, if bounded.
    pub attempts: Option<u32>,
    /// Wall-clock point after which no attempt is made, if bounded.
    pub deadline: Option<Instant>,
}

/// Retry policy for a single message.
pub trait Scheduler: Send + fmt::Debug {
    /// Time to wait for a reply to the current attempt.
    fn timeout(&self) -> Duration;

    /// Time to wait before the next attempt.
    fn interval(&self) -> Duration;

    /// Record that an attempt is being sent.
    fn send(&mut self);

    /// Record that the message was answered.
    fn succeed(&mut self);

    /// Record that the current attempt failed.
    fn fail(&mut self);

    /// Check whether another attempt may be made.
    ///
    /// Returns `false` once the attempt budget is spent, the deadline has
    /// passed, or the scheduler was aborted.
    fn is_deliverable(&self) -> bool;

    /// Mark the message as permanently undeliverable.
    fn abort(&mut self);

    /// Number of attempts sent so far.
    fn attempts(&self) -> u32;
}

/// Builds a scheduler for each new in-flight message.
pub type SchedulerFactory =
    Arc<dyn Fn(&Message, SchedulerOptions) -> Box<dyn Scheduler> + Send + Sync>;

/// Fixed-interval retry policy.
#[derive(Debug)]
pub struct RetryScheduler {
    options: SchedulerOptions,
    attempts: u32,
    aborted: bool,
}

impl RetryScheduler {
    /// Create a new scheduler.
    #[must_use]
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            options,
            attempts: 0,
            aborted: false,
        }
    }

    /// Factory producing a `RetryScheduler` per message.
    #[must_use]
    pub fn factory() -> SchedulerFactory {
        Arc::new(|_message, options| Box::new(RetryScheduler::new(options)))
    }
}

fn within_limits(options: &SchedulerOptions, made: u32) -> bool {
    if options.attempts.is_some_and(|max| made >= max) {
        return false;
    }
    if options.deadline.is_some_and(|deadline| Instant::now() > deadline) {
        return false;
    }
    true
}

impl Scheduler for RetryScheduler {
    fn timeout(&self) -> Duration {
        self.options.timeout
    }

    fn interval(&self) -> Duration {
        self.options.interval
    }

    fn send(&mut self) {
        self.attempts += 1;
    }

    fn succeed(&mut self) {}

    fn fail(&mut self) {}

    fn is_deliverable(&self) -> bool {
        !self.aborted && within_limits(&self.options, self.attempts)
    }

    fn abort(&mut self) {
        self.aborted = true;
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Exponential backoff retry policy.
///
/// The interval doubles after every consecutive failure, starting from the
/// configured interval and capped at `max_interval`.
#[derive(Debug)]
pub struct BackoffScheduler {
    options: SchedulerOptions,
    max_interval: Duration,
    attempts: u32,
    failures: u32,
    aborted: bool,
}

impl BackoffScheduler {
    /// Create a new scheduler.
    #[must_use]
    pub fn new(options: SchedulerOptions, max_interval: Duration) -> Self {
        Self {
            options,
            max_interval,
            attempts: 0,
            failures: 0,
            aborted: false,
        }
    }

    /// Factory producing a `BackoffScheduler` per message.
    #[must_use]
    pub fn factory(max_interval: Duration) -> SchedulerFactory {
        Arc::new(move |_message, options| Box::new(BackoffScheduler::new(options, max_interval)))
    }
}

impl Scheduler for BackoffScheduler {
    fn timeout(&self) -> Duration {
        self.options.timeout
    }

    fn interval(&self) -> Duration {
        let exponent = self.failures.saturating_sub(1).min(16);
        self.options
            .interval
            .saturating_mul(1 << exponent)
            .min(self.max_interval)
    }

    fn send(&mut self) {
        self.attempts += 1;
    }

    fn succeed(&mut self) {
        self.failures = 0;
    }

    fn fail(&mut self) {
        self.failures += 1;
    }

    fn is_deliverable(&self) -> bool {
        !self.aborted && within_limits(&self.options, self.attempts)
    }

    fn abort(&mut self) {
        self.aborted = true;
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }
}
