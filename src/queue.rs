//! Bounded FIFO queue with overflow policies (§3.1, §4.2).

use std::collections::VecDeque;
use std::sync::RwLock;

use crate::domain_types::QueueCapacity;
use crate::error::QueueError;

/// What happens when `enqueue` is called on a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OverflowPolicy {
    /// Evict the head, then push; the enqueue always reports success.
    DropOldest,
    /// Refuse the push; the enqueue reports failure.
    DropNewest,
    /// Same as `DropNewest`, plus increments a rejection counter.
    Reject,
}

/// A capacity-bounded FIFO queue (§4.2). `size <= capacity` always holds
/// (§3.2 invariant 5); every overflow outcome is a definite success/failure,
/// never a panic.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    capacity: QueueCapacity,
    policy: OverflowPolicy,
    items: RwLock<VecDeque<T>>,
    rejected: std::sync::atomic::AtomicU64,
}

impl<T: Clone> BoundedQueue<T> {
    /// Creates an empty queue with the given capacity and overflow policy.
    #[must_use]
    pub fn new(capacity: QueueCapacity, policy: OverflowPolicy) -> Self {
        Self {
            capacity,
            policy,
            items: RwLock::new(VecDeque::with_capacity(capacity.into_inner())),
            rejected: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Attempts to enqueue `item`. Returns `true` on success, `false` if the
    /// policy refused the push (never panics or throws; §3.2 invariant 5).
    pub fn enqueue(&self, item: T) -> bool {
        self.enqueue_checked(item).0
    }

    /// Same as [`BoundedQueue::enqueue`], but also reports whether the queue
    /// was at capacity when this call was made — an overflow event, whether
    /// the policy evicted the head (`DropOldest`) or refused the push
    /// (`DropNewest`/`Reject`). Both checks happen under one write lock, so
    /// the report is exact even under concurrent callers.
    pub fn enqueue_checked(&self, item: T) -> (bool, bool) {
        let mut items = self.items.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if items.len() < self.capacity.into_inner() {
            items.push_back(item);
            return (true, false);
        }
        let accepted = match self.policy {
            OverflowPolicy::DropOldest => {
                items.pop_front();
                items.push_back(item);
                true
            }
            OverflowPolicy::DropNewest => false,
            OverflowPolicy::Reject => {
                self.rejected.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                false
            }
        };
        (accepted, true)
    }

    /// Attempts to enqueue `item`, returning a typed error on rejection
    /// instead of a bare bool, for call sites that want to propagate `?`.
    pub fn try_enqueue(&self, item: T) -> Result<(), QueueError> {
        if self.enqueue(item) {
            Ok(())
        } else {
            Err(QueueError::Full {
                capacity: self.capacity.into_inner(),
            })
        }
    }

    /// Removes and returns the head of the queue, if any.
    pub fn dequeue(&self) -> Option<T> {
        let mut items = self.items.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        items.pop_front()
    }

    /// Returns a clone of the head without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        let items = self.items.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        items.front().cloned()
    }

    /// Returns a point-in-time snapshot of the whole queue, front to back.
    ///
    /// Per §4.2, concurrent mutation by another slice is not permitted while a
    /// snapshot is being consumed by a scheduler — single-subsystem ownership
    /// (§5) is what makes that safe, not locking discipline in this type.
    #[must_use]
    pub fn peek_all(&self) -> Vec<T> {
        let items = self.items.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        items.iter().cloned().collect()
    }

    /// Removes a specific item if present. Returns `false` if it was already
    /// gone (e.g. raced out by another path) — callers are expected to log and
    /// continue rather than treat this as fatal (§4.6).
    pub fn remove(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        let mut items = self.items.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(pos) = items.iter().position(|i| i == item) {
            items.remove(pos);
            true
        } else {
            false
        }
    }

    /// Current number of queued items.
    #[must_use]
    pub fn size(&self) -> usize {
        self.items.read().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> QueueCapacity {
        self.capacity
    }

    /// Configured overflow policy.
    #[must_use]
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Number of enqueues refused since construction (only ever nonzero for
    /// `DropNewest`/`Reject`; `DropOldest` never refuses).
    #[must_use]
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(std::sync::atomic::Ordering::Relaxed)
    }
}
