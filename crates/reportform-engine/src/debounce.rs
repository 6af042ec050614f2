//! Trailing-edge debounce for search filtering
//!
//! Each keystroke takes a ticket; a ticket only fires if no newer one was
//! taken before its delay ran out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Ticket for one debounced evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceTicket(u64);

/// Shared debounce clock; clones share tickets
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    latest: Arc<AtomicU64>,
}

impl Debouncer {
    /// Create debouncer
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            latest: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Configured delay
    #[inline]
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Take a ticket, superseding every earlier one
    pub fn ticket(&self) -> DebounceTicket {
        DebounceTicket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Whether no newer ticket exists
    #[must_use]
    pub fn is_current(&self, ticket: DebounceTicket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }

    /// Wait out the delay; true if the ticket is still the newest
    pub async fn settle(&self, ticket: DebounceTicket) -> bool {
        tokio::time::sleep(self.delay).await;
        self.is_current(ticket)
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn newer_ticket_supersedes() {
        let debouncer = Debouncer::default();
        let first = debouncer.ticket();
        let other = debouncer.clone();

        let pending = tokio::spawn(async move { other.settle(first).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = debouncer.ticket();

        assert!(!pending.await.unwrap());
        assert!(debouncer.settle(second).await);
    }

    #[tokio::test(start_paused = true)]
    async fn lone_ticket_fires_after_delay() {
        let debouncer = Debouncer::new(Duration::from_millis(200));
        let start = tokio::time::Instant::now();
        let ticket = debouncer.ticket();
        assert!(debouncer.settle(ticket).await);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
