//! Bounded FIFO of audio chunks between the network receive path and the
//! device callback.
//!
//! Pushing never blocks and never grows the queue past `capacity`.  What
//! happens to an item that arrives while the queue is full is decided by the
//! [`OverflowPolicy`]:
//!
//! * [`OverflowPolicy::DropNewest`]: the incoming item is rejected.
//! * [`OverflowPolicy::DropOldest`]: the oldest queued item is evicted.
//!
//! Either way exactly one item is lost per overflowing push.
//!
//! # Example
//!
//! ```rust
//! use wanderfm::audio::ChunkQueue;
//! use wanderfm::config::OverflowPolicy;
//!
//! let mut q = ChunkQueue::new(2, OverflowPolicy::DropNewest);
//! q.push(1).unwrap();
//! q.push(2).unwrap();
//! assert!(q.push(3).is_err()); // full → newest dropped
//! assert_eq!(q.pop(), Some(1));
//! ```

use std::collections::VecDeque;

use thiserror::Error;

use crate::config::OverflowPolicy;

/// The queue was at capacity; one item was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("playback queue full")]
pub struct QueueFull;

// ---------------------------------------------------------------------------
// ChunkQueue
// ---------------------------------------------------------------------------

/// A fixed-capacity FIFO with an explicit overflow policy.
///
/// Every [`clear`](Self::clear) advances an epoch counter so a consumer that
/// holds a partially played item can tell the queue was flushed underneath
/// it.
pub struct ChunkQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    policy: OverflowPolicy,
    /// Items discarded because the queue was full.
    dropped: u64,
    epoch: u64,
}

impl<T> ChunkQueue<T> {
    /// Create an empty queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        assert!(capacity > 0, "ChunkQueue capacity must be > 0");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            policy,
            dropped: 0,
            epoch: 0,
        }
    }

    /// Offer `item` without blocking.
    ///
    /// Returns `Err(QueueFull)` when the policy is `DropNewest` and the item
    /// was rejected.  Under `DropOldest` the push always succeeds, but the
    /// eviction is still counted in [`dropped`](Self::dropped).
    pub fn push(&mut self, item: T) -> Result<(), QueueFull> {
        if self.items.len() < self.capacity {
            self.items.push_back(item);
            return Ok(());
        }

        self.dropped += 1;
        match self.policy {
            OverflowPolicy::DropNewest => Err(QueueFull),
            OverflowPolicy::DropOldest => {
                self.items.pop_front();
                self.items.push_back(item);
                Ok(())
            }
        }
    }

    /// Remove the oldest item.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Discard everything queued and advance the epoch.
    pub fn clear(&mut self) {
        self.items.clear();
        self.epoch = self.epoch.wrapping_add(1);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
