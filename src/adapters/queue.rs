use crate::events::Event;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("adapter queue full after waiting the critical-block grace period")]
    GraceExpired,
}

/// Bounded per-adapter queue implementing the backpressure policy of
/// spec.md §4.2: non-critical messages are shed head-first when full,
/// critical messages block the producer up to a grace period.
pub struct AdapterQueue {
    capacity: usize,
    buffer: Mutex<VecDeque<Event>>,
    not_empty: Notify,
    not_full: Notify,
}

impl AdapterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Drop-oldest push used for non-critical message classes. Never blocks.
    pub fn push_drop_oldest(&self, event: Event) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(event);
        self.not_empty.notify_one();
    }

    /// Blocking push used for critical message classes. Waits for room up
    /// to `grace`; returns `Err` if the queue is still full afterward
    /// (caller evicts the adapter).
    pub async fn push_blocking(&self, event: Event, grace: Duration) -> Result<(), QueueError> {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            {
                let mut buffer = self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if buffer.len() < self.capacity {
                    buffer.push_back(event);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(QueueError::GraceExpired);
            }
            if tokio::time::timeout(remaining, self.not_full.notified())
                .await
                .is_err()
            {
                return Err(QueueError::GraceExpired);
            }
        }
    }

    /// Pop the next event, waiting if the queue is currently empty.
    pub async fn pop(&self) -> Event {
        loop {
            {
                let mut buffer = self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(event) = buffer.pop_front() {
                    self.not_full.notify_one();
                    return event;
                }
            }
            self.not_empty.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
