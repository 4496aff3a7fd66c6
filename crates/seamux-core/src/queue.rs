//! Bounded sentence queues
//!
//! Every queue in the system is a `SentenceQueue`: the central queue
//! that inputs share and the private queue each output owns. The
//! contract has two unusual corners, both deliberate:
//!
//! - **Producers never block.** A push onto a full queue drops the
//!   oldest enqueued sentence to make room. Loss is tail-preserving:
//!   under pressure the latest data wins, and a slow output can never
//!   stall the engine or other outputs.
//! - **Closure is a state, not an item.** [`close`](SentenceQueue::close)
//!   marks the queue inactive and wakes the consumer; the consumer
//!   drains whatever is still enqueued and then sees end-of-stream.
//!   Once `next` has returned `None` it returns `None` forever.
//!
//! Each queue has exactly one consumer (the engine for the central
//! queue, the owning output task for a private queue), which is why a
//! single stored-permit notification is sufficient.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::senblk::SenBlk;
use crate::MIN_QUEUE_SIZE;

/// A bounded FIFO of sentence blocks with drop-oldest overrun
/// behavior and an end-of-stream state.
pub struct SentenceQueue {
    shared: Mutex<Shared>,
    fresh: Notify,
    capacity: usize,
}

struct Shared {
    fifo: VecDeque<SenBlk>,
    active: bool,
    dropped: u64,
}

impl SentenceQueue {
    /// Create a queue holding at most `capacity` sentences.
    ///
    /// Capacities below [`MIN_QUEUE_SIZE`] are raised to it; a queue
    /// of one slot could never hold a sentence while another is being
    /// drained.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_QUEUE_SIZE);
        Self {
            shared: Mutex::new(Shared {
                fifo: VecDeque::with_capacity(capacity),
                active: true,
                dropped: 0,
            }),
            fresh: Notify::new(),
            capacity,
        }
    }

    /// Append a sentence, dropping the oldest enqueued one when full.
    ///
    /// Completes in bounded time regardless of consumer progress.
    pub fn push(&self, blk: SenBlk) {
        {
            let mut q = self.shared.lock();
            if q.fifo.len() == self.capacity {
                q.fifo.pop_front();
                q.dropped += 1;
            }
            q.fifo.push_back(blk);
        }
        self.fresh.notify_one();
    }

    /// Mark the queue end-of-stream and wake the consumer.
    ///
    /// Already-enqueued sentences remain drainable. Idempotent.
    pub fn close(&self) {
        self.shared.lock().active = false;
        self.fresh.notify_one();
    }

    /// Wait for the next sentence.
    ///
    /// Returns `None` only when the queue is empty and closed; after
    /// the first `None` every subsequent call returns `None`.
    pub async fn next(&self) -> Option<SenBlk> {
        loop {
            {
                let mut q = self.shared.lock();
                if let Some(blk) = q.fifo.pop_front() {
                    return Some(blk);
                }
                if !q.active {
                    return None;
                }
            }
            // notify_one stores a permit, so a push between the check
            // above and this await still wakes us.
            self.fresh.notified().await;
        }
    }

    /// Number of sentences currently enqueued.
    pub fn len(&self) -> usize {
        self.shared.lock().fifo.len()
    }

    /// True when nothing is enqueued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity in sentences.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sentences lost to overrun so far.
    pub fn dropped(&self) -> u64 {
        self.shared.lock().dropped
    }

    /// False once the queue has been closed.
    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::endpoint::EndpointId;

    fn blk(tag: u8) -> SenBlk {
        SenBlk::new(&[b'$', tag, b'\r', b'\n'], EndpointId(0)).unwrap()
    }

    fn tag(blk: &SenBlk) -> u8 {
        blk.bytes()[1]
    }

    #[test]
    fn capacity_is_clamped_to_minimum() {
        assert_eq!(SentenceQueue::new(0).capacity(), MIN_QUEUE_SIZE);
        assert_eq!(SentenceQueue::new(64).capacity(), 64);
    }

    #[test]
    fn push_never_exceeds_capacity() {
        let q = SentenceQueue::new(4);
        for i in 0..100 {
            q.push(blk(i));
            assert!(q.len() <= q.capacity());
        }
        assert_eq!(q.len(), 4);
        assert_eq!(q.dropped(), 96);
    }

    #[tokio::test]
    async fn overrun_drops_oldest_keeps_newest() {
        let q = SentenceQueue::new(4);
        for i in 0..7 {
            q.push(blk(i));
        }
        // 0..3 were dropped; 3..7 survive in order.
        for expect in 3..7 {
            let got = q.next().await.unwrap();
            assert_eq!(tag(&got), expect);
        }
        assert_eq!(q.dropped(), 3);
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let q = SentenceQueue::new(8);
        for i in 0..5 {
            q.push(blk(i));
        }
        for expect in 0..5 {
            assert_eq!(tag(&q.next().await.unwrap()), expect);
        }
    }

    #[tokio::test]
    async fn next_waits_for_push() {
        let q = std::sync::Arc::new(SentenceQueue::new(4));
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push(blk(9));
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(tag(&got), 9);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let q = SentenceQueue::new(4);
        q.push(blk(1));
        q.push(blk(2));
        q.close();
        assert_eq!(tag(&q.next().await.unwrap()), 1);
        assert_eq!(tag(&q.next().await.unwrap()), 2);
        assert!(q.next().await.is_none());
    }

    #[tokio::test]
    async fn end_of_stream_is_sticky() {
        let q = SentenceQueue::new(4);
        q.close();
        assert!(q.next().await.is_none());
        assert!(q.next().await.is_none());
        assert!(q.next().await.is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let q = SentenceQueue::new(4);
        q.close();
        q.close();
        assert!(!q.is_active());
        assert!(q.is_empty());
        assert!(q.next().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_blocked_consumer() {
        let q = std::sync::Arc::new(SentenceQueue::new(4));
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(got.is_none());
    }
}
