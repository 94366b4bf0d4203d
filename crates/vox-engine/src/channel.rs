use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use vox_core::input::InputItem;

/// Maximum items buffered per session before the oldest is evicted.
pub const CHANNEL_CAPACITY: usize = 100;

/// How long the sender loop waits for input before re-checking the active
/// flag. Bounds shutdown latency.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Bounded FIFO of pending input for one session.
///
/// `push` never blocks and is callable from any task; when the channel is
/// full the oldest item is dropped to make room. Only the session's sender
/// loop pops.
pub struct InputChannel {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

struct Inner {
    items: VecDeque<InputItem>,
    closed: bool,
    dropped: u64,
}

impl InputChannel {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue an item, evicting the oldest when full. Silent no-op after
    /// `close`.
    pub fn push(&self, item: InputItem) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            if inner.items.len() == self.capacity {
                inner.items.pop_front();
                inner.dropped += 1;
                trace!(dropped = inner.dropped, "input channel full, oldest item evicted");
            }
            inner.items.push_back(item);
        }
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<InputItem> {
        self.inner.lock().items.pop_front()
    }

    /// Pop, waiting up to `timeout` for an item to arrive.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<InputItem> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for the wakeup before checking, so a push between
            // the check and the await is not missed.
            let notified = self.notify.notified();
            if let Some(item) = self.pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pop();
            }
        }
    }

    /// Stop accepting input and wake any waiting popper.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total items evicted by overflow so far.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }
}

impl Default for InputChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn text(n: usize) -> InputItem {
        InputItem::text(format!("item-{n}"))
    }

    fn text_of(item: &InputItem) -> &str {
        match item {
            InputItem::Text(t) => t,
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn fifo_order() {
        let ch = InputChannel::new();
        ch.push(text(1));
        ch.push(text(2));
        ch.push(text(3));
        assert_eq!(text_of(&ch.pop().unwrap()), "item-1");
        assert_eq!(text_of(&ch.pop().unwrap()), "item-2");
        assert_eq!(text_of(&ch.pop().unwrap()), "item-3");
        assert!(ch.pop().is_none());
    }

    #[test]
    fn overflow_retains_exactly_the_last_capacity_items() {
        let ch = InputChannel::new();
        for n in 0..CHANNEL_CAPACITY + 1 {
            ch.push(text(n));
        }
        assert_eq!(ch.len(), CHANNEL_CAPACITY);
        assert_eq!(ch.dropped(), 1);

        // Oldest (item-0) was evicted; survivors are 1..=100 in push order.
        for n in 1..CHANNEL_CAPACITY + 1 {
            assert_eq!(text_of(&ch.pop().unwrap()), format!("item-{n}"));
        }
        assert!(ch.pop().is_none());
    }

    #[test]
    fn overflow_many_times() {
        let ch = InputChannel::with_capacity(3);
        for n in 0..10 {
            ch.push(text(n));
        }
        assert_eq!(ch.len(), 3);
        assert_eq!(ch.dropped(), 7);
        assert_eq!(text_of(&ch.pop().unwrap()), "item-7");
    }

    #[test]
    fn push_after_close_is_silent_noop() {
        let ch = InputChannel::new();
        ch.push(text(1));
        ch.close();
        ch.push(text(2));
        assert!(ch.is_closed());
        assert_eq!(ch.len(), 1);
    }

    #[tokio::test]
    async fn pop_timeout_returns_pushed_item() {
        let ch = Arc::new(InputChannel::new());
        let pusher = ch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pusher.push(text(1));
        });

        let item = ch.pop_timeout(Duration::from_secs(1)).await;
        assert_eq!(text_of(&item.unwrap()), "item-1");
    }

    #[tokio::test(start_paused = true)]
    async fn pop_timeout_expires_when_empty() {
        let ch = InputChannel::new();
        let item = ch.pop_timeout(POLL_INTERVAL).await;
        assert!(item.is_none());
    }

    #[tokio::test]
    async fn close_wakes_waiting_popper() {
        let ch = Arc::new(InputChannel::new());
        let closer = ch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            closer.close();
        });

        // Returns None promptly rather than waiting out the full timeout.
        let start = std::time::Instant::now();
        let item = ch.pop_timeout(Duration::from_secs(5)).await;
        assert!(item.is_none());
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
