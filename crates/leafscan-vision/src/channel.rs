//! Bounded drop-oldest frame channel.
//!
//! Decouples the capture loop from the HTTP streaming responders. Publishing
//! never blocks: when the channel is full the oldest frame is discarded so
//! viewers always see near-live data instead of a backlog. Each frame is
//! handed to at most one consumer.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;

/// Number of frames the channel buffers: one in flight plus one waiting.
pub const FRAME_CHANNEL_CAPACITY: usize = 2;

pub struct FrameChannel {
    frames: Mutex<VecDeque<Bytes>>,
    notify: Notify,
}

impl Default for FrameChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameChannel {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(FRAME_CHANNEL_CAPACITY)),
            notify: Notify::new(),
        }
    }

    /// Insert a frame, evicting the oldest when full.
    ///
    /// Returns `true` when a frame was displaced.
    pub fn publish(&self, frame: Bytes) -> bool {
        let dropped = {
            let mut frames = self.lock();
            let dropped = if frames.len() >= FRAME_CHANNEL_CAPACITY {
                frames.pop_front().is_some()
            } else {
                false
            };
            frames.push_back(frame);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Take the oldest buffered frame without waiting.
    pub fn try_consume(&self) -> Option<Bytes> {
        self.lock().pop_front()
    }

    /// Wait up to `timeout` for a frame; `None` when none arrived in time.
    pub async fn consume(&self, timeout: Duration) -> Option<Bytes> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a publish in between is not missed.
            notified.as_mut().enable();

            if let Some(frame) = self.try_consume() {
                return Some(frame);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_consume();
            }
        }
    }

    /// Discard all buffered frames, returning how many were dropped.
    pub fn drain(&self) -> usize {
        let mut frames = self.lock();
        let n = frames.len();
        frames.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Bytes>> {
        self.frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(n: u8) -> Bytes {
        Bytes::from(vec![n])
    }

    #[tokio::test]
    async fn test_keeps_two_most_recent_in_order() {
        let channel = FrameChannel::new();
        assert!(!channel.publish(frame(1)));
        assert!(!channel.publish(frame(2)));
        assert!(channel.publish(frame(3)));
        assert!(channel.publish(frame(4)));
        assert!(channel.publish(frame(5)));
        assert_eq!(channel.len(), FRAME_CHANNEL_CAPACITY);

        let timeout = Duration::from_millis(50);
        assert_eq!(channel.consume(timeout).await, Some(frame(4)));
        assert_eq!(channel.consume(timeout).await, Some(frame(5)));
        assert_eq!(channel.consume(timeout).await, None);
    }

    #[tokio::test]
    async fn test_consume_times_out_when_empty() {
        let channel = FrameChannel::new();
        let started = std::time::Instant::now();
        assert!(channel.consume(Duration::from_millis(30)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_consume_wakes_on_publish() {
        let channel = Arc::new(FrameChannel::new());
        let reader = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.consume(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.publish(frame(9));
        assert_eq!(reader.await.unwrap(), Some(frame(9)));
    }

    #[tokio::test]
    async fn test_drain_empties_channel() {
        let channel = FrameChannel::new();
        channel.publish(frame(1));
        channel.publish(frame(2));
        assert_eq!(channel.drain(), 2);
        assert!(channel.is_empty());
        assert!(channel.consume(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_each_frame_consumed_once() {
        let channel = Arc::new(FrameChannel::new());
        channel.publish(frame(1));
        let a = channel.consume(Duration::from_millis(10)).await;
        let b = channel.consume(Duration::from_millis(10)).await;
        assert_eq!(a, Some(frame(1)));
        assert!(b.is_none());
    }
}
