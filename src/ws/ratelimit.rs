//! Per-connection rate controls of the content sync channel.
//!
//! Both are plain state machines driven by the connection task: the task
//! waits on [`expired`] for the current deadline alongside its inbound frames,
//! so cancelling them is just dropping the state.

use std::time::Duration;
use tokio::time::Instant;

/// Trailing-edge throttle: the first value opens a window, the latest value
/// offered before the window closes is the one emitted.
#[derive(Debug)]
pub struct Throttle<T> {
    window: Duration,
    pending: Option<T>,
    deadline: Option<Instant>,
}

impl<T> Throttle<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            deadline: None,
        }
    }

    pub fn offer(&mut self, value: T, now: Instant) {
        self.pending = Some(value);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.window);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Close the window, yielding the coalesced value
    pub fn fire(&mut self) -> Option<T> {
        self.deadline = None;
        self.pending.take()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
        self.pending = None;
    }
}

/// Trailing-edge debounce: values accumulate until `quiet` elapses without a
/// new one. Nothing is ever discarded, only delayed.
#[derive(Debug)]
pub struct Debounce<T> {
    quiet: Duration,
    buffer: Vec<T>,
    deadline: Option<Instant>,
}

impl<T> Debounce<T> {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            buffer: Vec::new(),
            deadline: None,
        }
    }

    pub fn push(&mut self, value: T, now: Instant) {
        self.buffer.push(value);
        self.deadline = Some(now + self.quiet);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn drain(&mut self) -> Vec<T> {
        self.deadline = None;
        std::mem::take(&mut self.buffer)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Resolves once `deadline` is reached; never resolves without one.
pub async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_coalesces_to_the_latest_value() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_millis(100));
        for (i, pos) in (1..=50u64).enumerate() {
            throttle.offer(pos, start + Duration::from_micros(1600 * i as u64));
        }

        assert_eq!(throttle.deadline(), Some(start + Duration::from_millis(100)));
        assert_eq!(throttle.fire(), Some(50));
        assert_eq!(throttle.fire(), None);
        assert_eq!(throttle.deadline(), None);
    }

    #[test]
    fn throttle_window_restarts_after_firing() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_millis(100));
        throttle.offer(1u64, start);
        throttle.fire();

        let later = start + Duration::from_millis(250);
        throttle.offer(2, later);
        assert_eq!(throttle.deadline(), Some(later + Duration::from_millis(100)));

        throttle.cancel();
        assert_eq!(throttle.fire(), None);
    }

    #[test]
    fn debounce_extends_on_activity_and_keeps_everything() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(150));
        debounce.push("a", start);
        debounce.push("b", start + Duration::from_millis(100));

        assert_eq!(debounce.deadline(), Some(start + Duration::from_millis(250)));
        assert_eq!(debounce.drain(), vec!["a", "b"]);
        assert!(debounce.is_empty());
        assert_eq!(debounce.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_waits_for_the_deadline() {
        let start = Instant::now();
        expired(Some(start + Duration::from_millis(40))).await;
        assert!(Instant::now() >= start + Duration::from_millis(40));

        let never = tokio::time::timeout(Duration::from_secs(5), expired(None)).await;
        assert!(never.is_err());
    }
}
