//! The mount queue: a ring of shared-immutable [`AudioBlock`]s indexed by a
//! monotonic sequence number.
//!
//! Grounded on the teacher's `StreamState` ring buffer (`VecDeque` capped at
//! `buffer_frames`, `DashMap`-registered, `Notify`-woken), generalized so a
//! listener's position is an integer cursor into the sequence space rather
//! than a snapshot of buffered frames plus a `broadcast::Receiver`. That lets
//! a listener fall behind and resume from wherever the ring currently starts
//! instead of only ever seeing "from now on".

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::refbuf::AudioBlock;

/// Result of asking the queue for the block at a given sequence number.
pub enum QueueRead {
    /// The block was present; the listener should advance to `next_seq`.
    Ready(Arc<AudioBlock>),
    /// Not produced yet; caller should wait on [`MountQueue::notified`].
    Pending,
    /// The requested sequence fell off the back of the ring. The caller
    /// should resume from the returned sequence number.
    Overrun(u64),
}

struct Inner {
    blocks: VecDeque<Arc<AudioBlock>>,
    /// Sequence number of `blocks[0]`, i.e. the oldest retained block.
    base_seq: u64,
    /// Sequence number that will be assigned to the next pushed block.
    next_seq: u64,
}

pub struct MountQueue {
    inner: RwLock<Inner>,
    capacity: usize,
    notify: Notify,
}

impl MountQueue {
    /// `capacity` is the number of blocks retained, sized from
    /// `queue_block_size` and a target backlog depth by the caller.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                blocks: VecDeque::with_capacity(capacity),
                base_seq: 0,
                next_seq: 0,
            }),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Appends a new block, evicting the oldest if the ring is full, and
    /// returns the sequence number assigned to it.
    pub fn push(&self, block: AudioBlock) -> u64 {
        let seq = {
            let mut inner = self.inner.write();
            let seq = inner.next_seq;
            inner.blocks.push_back(Arc::new(block));
            inner.next_seq += 1;
            if inner.blocks.len() > self.capacity {
                inner.blocks.pop_front();
                inner.base_seq += 1;
            }
            seq
        };
        self.notify.notify_waiters();
        seq
    }

    /// Reads the block at `seq`, or a verdict telling the caller what to do
    /// instead (wait, or fast-forward past an overrun).
    pub fn read_at(&self, seq: u64) -> QueueRead {
        let inner = self.inner.read();
        if seq < inner.base_seq {
            return QueueRead::Overrun(inner.base_seq);
        }
        let idx = (seq - inner.base_seq) as usize;
        match inner.blocks.get(idx) {
            Some(block) => QueueRead::Ready(block.clone()),
            None => QueueRead::Pending,
        }
    }

    /// Sequence number one past the newest block; a fresh listener that
    /// wants only new audio starts here.
    pub fn tail_seq(&self) -> u64 {
        self.inner.read().next_seq
    }

    /// Sequence number of the oldest retained block; a fresh listener that
    /// wants the full retained backlog starts here.
    pub fn head_seq(&self) -> u64 {
        self.inner.read().base_seq
    }

    pub fn len(&self) -> usize {
        self.inner.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once a push has happened after this call began waiting.
    /// Callers loop: check `read_at`, then `notified().await` on `Pending`.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn block(tag: u8) -> AudioBlock {
        AudioBlock::new(Bytes::from(vec![tag]), 0)
    }

    #[test]
    fn fresh_queue_has_no_blocks_and_matching_head_tail() {
        let q = MountQueue::new(4);
        assert_eq!(q.head_seq(), 0);
        assert_eq!(q.tail_seq(), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn push_assigns_increasing_sequence_numbers() {
        let q = MountQueue::new(4);
        assert_eq!(q.push(block(1)), 0);
        assert_eq!(q.push(block(2)), 1);
        assert_eq!(q.tail_seq(), 2);
    }

    #[test]
    fn read_at_pending_for_future_sequence() {
        let q = MountQueue::new(4);
        q.push(block(1));
        assert!(matches!(q.read_at(5), QueueRead::Pending));
    }

    #[test]
    fn read_at_ready_returns_the_block() {
        let q = MountQueue::new(4);
        q.push(block(1));
        q.push(block(2));
        match q.read_at(1) {
            QueueRead::Ready(b) => assert_eq!(b.audio.as_ref(), &[2]),
            _ => panic!("expected Ready"),
        }
    }

    #[test]
    fn eviction_past_capacity_reports_overrun_for_stale_cursor() {
        let q = MountQueue::new(2);
        q.push(block(1));
        q.push(block(2));
        q.push(block(3)); // evicts seq 0
        assert_eq!(q.head_seq(), 1);
        match q.read_at(0) {
            QueueRead::Overrun(resume_at) => assert_eq!(resume_at, 1),
            _ => panic!("expected Overrun"),
        }
        match q.read_at(1) {
            QueueRead::Ready(b) => assert_eq!(b.audio.as_ref(), &[2]),
            _ => panic!("expected Ready"),
        }
    }
}
