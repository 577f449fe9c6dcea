//! Deferred release of objects the GPU may still reference.
//!
//! Work is recorded on the CPU up to `back_buffer_count` frames ahead of the
//! GPU. When a descriptor set, render pass or concrete resource handle is
//! replaced, frames that are still in flight may reference the old one, so it
//! cannot be released right away.
//!
//! Every parked item is stamped with the last frame that could have used it.
//! Once the scheduler knows that frame has retired (its fence values were
//! reached) the item is handed back for destruction.
//!
//! ```text
//! frame:        5        6        7        8
//! replace X:    ^ stamp = 4 (last frame that recorded with X)
//! retired:               ..       4  ─► X released
//! ```

use std::collections::VecDeque;

/// Queue of items waiting for their last user frame to retire.
#[derive(Debug)]
pub struct DeferredRelease<T> {
    pending: VecDeque<(Option<u64>, T)>,
}

impl<T> DeferredRelease<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    /// Park `item`.
    ///
    /// `last_user` is the last frame index that may reference it, or `None`
    /// when no frame has been recorded yet.
    pub fn defer(&mut self, last_user: Option<u64>, item: T) {
        self.pending.push_back((last_user, item));
    }

    /// Remove every item whose last user frame is at or before `retired`.
    ///
    /// Stamps are monotonic, so this stops at the first item that is still
    /// potentially in use.
    pub fn drain_retired(&mut self, retired: Option<u64>) -> Vec<T> {
        let mut released = Vec::new();
        while let Some((stamp, _)) = self.pending.front() {
            let ready = match (stamp, retired) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(stamp), Some(retired)) => *stamp <= retired,
            };
            if !ready {
                break;
            }
            if let Some((_, item)) = self.pending.pop_front() {
                released.push(item);
            }
        }
        released
    }

    /// Remove everything regardless of stamps.
    ///
    /// Only valid once the GPU is idle.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.pending.drain(..).map(|(_, item)| item).collect()
    }

    /// Number of parked items.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for DeferredRelease<T> {
    fn default() -> Self {
        Self::new()
    }
}
