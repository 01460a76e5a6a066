//! Deferred actions driven by the polling loop.
//!
//! Nothing here sleeps: actions are stored with a due instant and handed back by
//! [`Deferred::take_due`] once the owning tick observes that instant. Dropping the
//! queue discards whatever is still pending.

use std::{fmt, time::Instant};

/// Cancellation token returned by [`Deferred::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug)]
struct Pending<T> {
    id: TaskId,
    due: Instant,
    action: T,
}

/// Queue of actions waiting for their due instant.
#[derive(Debug)]
pub struct Deferred<T> {
    next_id: u64,
    pending: Vec<Pending<T>>,
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            pending: Vec::new(),
        }
    }
}

impl<T> Deferred<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `action` to run once `due` has been reached.
    pub fn schedule(&mut self, due: Instant, action: T) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.pending.push(Pending { id, due, action });
        id
    }

    /// Drop a pending action. Returns `false` when it already ran or was cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|task| task.id != id);
        before != self.pending.len()
    }

    /// Whether the action behind `id` is still waiting.
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.pending.iter().any(|task| task.id == id)
    }

    /// Remove and return every action due at `now`, oldest deadline first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(TaskId, T)> {
        let mut due = Vec::new();
        let mut index = 0;
        while index < self.pending.len() {
            if self.pending[index].due <= now {
                let task = self.pending.remove(index);
                due.push(task);
            } else {
                index += 1;
            }
        }
        due.sort_by_key(|task| task.due);
        due.into_iter().map(|task| (task.id, task.action)).collect()
    }

    /// Number of actions still waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no action is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Discard every pending action.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
