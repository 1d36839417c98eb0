//! Allocation tracking context
//!
//! Counts live and total blocks, buffers and readers for one flowgraph (or
//! for whatever scope the caller shares the tracker across). Tests inject
//! their own tracker to check that everything is released after a run.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Kind of runtime resource being counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Block,
    Buffer,
    Reader,
}

impl Resource {
    fn index(self) -> usize {
        match self {
            Resource::Block => 0,
            Resource::Buffer => 1,
            Resource::Reader => 2,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    live: [AtomicUsize; 3],
    total: [AtomicUsize; 3],
}

/// Shared allocation counters; clones observe the same counts
#[derive(Debug, Clone, Default)]
pub struct AllocationTracker {
    counters: Arc<Counters>,
}

impl AllocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resources of this kind currently alive
    pub fn live(&self, resource: Resource) -> usize {
        self.counters.live[resource.index()].load(Ordering::Acquire)
    }

    /// Number of resources of this kind ever allocated
    pub fn total(&self, resource: Resource) -> usize {
        self.counters.total[resource.index()].load(Ordering::Acquire)
    }

    pub(crate) fn acquire(&self, resource: Resource) -> TrackerGuard {
        let i = resource.index();
        self.counters.live[i].fetch_add(1, Ordering::AcqRel);
        self.counters.total[i].fetch_add(1, Ordering::AcqRel);
        TrackerGuard {
            tracker: self.clone(),
            resource,
        }
    }
}

/// Decrements the live count of its resource when dropped
#[derive(Debug)]
pub(crate) struct TrackerGuard {
    tracker: AllocationTracker,
    resource: Resource,
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.tracker.counters.live[self.resource.index()].fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_releases_on_drop() {
        let tracker = AllocationTracker::new();
        let a = tracker.acquire(Resource::Buffer);
        let b = tracker.clone().acquire(Resource::Buffer);
        assert_eq!(tracker.live(Resource::Buffer), 2);
        drop(a);
        drop(b);
        assert_eq!(tracker.live(Resource::Buffer), 0);
        assert_eq!(tracker.total(Resource::Buffer), 2);
        assert_eq!(tracker.live(Resource::Reader), 0);
    }

    #[test]
    fn test_independent_trackers() {
        let one = AllocationTracker::new();
        let two = AllocationTracker::new();
        let _guard = one.acquire(Resource::Block);
        assert_eq!(one.live(Resource::Block), 1);
        assert_eq!(two.live(Resource::Block), 0);
    }
}
