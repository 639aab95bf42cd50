//! Bounded FIFO queues for outgoing and waiting envelopes

use std::collections::VecDeque;

/// What happens when pushing into a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Refuse the new item
    DropNewest,
    /// Evict the head to make room
    DropOldest,
}

/// Result of [`BoundedQueue::push`]
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome<T> {
    /// Item appended
    Queued,
    /// Queue full, new item handed back
    Rejected(T),
    /// Queue full, oldest item evicted and handed back
    Evicted(T),
}

/// FIFO with a fixed capacity and an overflow policy
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> BoundedQueue<T> {
    /// Create a queue; a zero capacity is raised to 1
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            policy,
        }
    }

    /// Append to the tail, applying the overflow policy when full
    pub fn push(&mut self, item: T) -> PushOutcome<T> {
        if self.items.len() < self.capacity {
            self.items.push_back(item);
            return PushOutcome::Queued;
        }
        match self.policy {
            OverflowPolicy::DropNewest => PushOutcome::Rejected(item),
            OverflowPolicy::DropOldest => match self.items.pop_front() {
                Some(evicted) => {
                    self.items.push_back(item);
                    PushOutcome::Evicted(evicted)
                }
                None => {
                    self.items.push_back(item);
                    PushOutcome::Queued
                }
            },
        }
    }

    /// Head of the queue
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Remove the head
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Iterate from head to tail
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Check if full
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Maximum number of items
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow policy
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}
