//! Sleep deadline queue
//!
//! BinaryHeap min-heap of `(deadline, task)` entries.
//!
//! # Invalidation
//!
//! Entries are never removed when a sleeping task is killed or torn down.
//! Instead every query takes a validity predicate (is this task still
//! sleeping until exactly this deadline?) and stale entries are discarded
//! as they reach the top of the heap. Entries of killed long sleepers would
//! otherwise sit deep in the heap indefinitely, so the owner calls `compact`
//! once stale entries clearly outnumber live ones.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use weft_core::TaskId;

/// Heap entry, ordered earliest deadline first
struct Entry {
    deadline: Instant,
    seq: u64,
    task: TaskId,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap; equal deadlines fire in insertion order
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Deadline queue for sleeping tasks
#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `task` sleeps until `deadline`
    pub fn push(&mut self, deadline: Instant, task: TaskId) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { deadline, seq, task });
    }

    /// Earliest deadline still accepted by `valid`
    pub fn next_deadline<F>(&mut self, mut valid: F) -> Option<Instant>
    where
        F: FnMut(TaskId, Instant) -> bool,
    {
        while let Some(top) = self.heap.peek() {
            if valid(top.task, top.deadline) {
                return Some(top.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Remove and return, in deadline order, every valid entry due by `now`
    pub fn pop_expired<F>(&mut self, now: Instant, mut valid: F) -> Vec<TaskId>
    where
        F: FnMut(TaskId, Instant) -> bool,
    {
        let mut expired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                if valid(entry.task, entry.deadline) {
                    expired.push(entry.task);
                }
            }
        }
        expired
    }

    /// Drop every entry `valid` rejects, wherever it sits in the heap
    pub fn compact<F>(&mut self, mut valid: F)
    where
        F: FnMut(TaskId, Instant) -> bool,
    {
        self.heap.retain(|entry| valid(entry.task, entry.deadline));
    }

    /// Number of entries, stale ones included
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
