//! `Mailbox`: a bounded MPMC queue of Event tokens between two arrows
//! (spec §3, §4.3).
//!
//! `reserve`/`push` is a two-phase commit so a stage arrow can check
//! capacity on every output *before* popping any input (spec §4.2: "reserve
//! capacity on each output mailbox first"), without another producer
//! sneaking in and overflowing the queue in between.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use crossbeam_utils::CachePadded;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopStatus {
    Ready,
    Empty,
    Closed,
}

/// A bounded multi-producer/multi-consumer queue. Generic over `T` so the
/// same type backs both inter-arrow mailboxes (`T = Event`) and the Pool's
/// per-segment freelists.
pub struct Mailbox<T> {
    capacity: usize,
    /// Outstanding reservations not yet published via `push`, padded to
    /// its own cache line since every producer touches it on every
    /// `reserve` (spec §9 cache-line padding note).
    reserved: CachePadded<AtomicUsize>,
    closed: AtomicBool,
    queue: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    pub locality: Option<usize>,
}

impl<T> Mailbox<T> {
    pub fn new(capacity: usize) -> Self {
        Mailbox { capacity,
                  reserved: CachePadded::new(AtomicUsize::new(0)),
                  closed: AtomicBool::new(false),
                  queue: Mutex::new(VecDeque::with_capacity(capacity)),
                  not_empty: Condvar::new(),
                  locality: None }
    }

    pub fn with_locality(capacity: usize, locality: usize) -> Self {
        let mut mb = Self::new(capacity);
        mb.locality = Some(locality);
        mb
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of items resident in the queue (not counting
    /// outstanding reservations).
    pub fn size(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Claim up to `n` slots for future publication. Returns the number
    /// actually claimed, `0 <= k <= n`. Never blocks.
    pub fn reserve(&self, n: usize) -> usize {
        loop {
            let current = self.reserved.load(Ordering::Acquire);
            let occupied = self.size() + current;
            let free = self.capacity.saturating_sub(occupied);
            let k = n.min(free);
            if k == 0 {
                return 0;
            }
            if self.reserved
                   .compare_exchange(current, current + k, Ordering::AcqRel, Ordering::Acquire)
                   .is_ok()
            {
                return k;
            }
        }
    }

    /// Publish exactly `reserved_count` items previously claimed via
    /// `reserve`. Panics (a programmer error, per spec's linearizability
    /// invariant) if `items.len() != reserved_count`.
    pub fn push(&self, items: impl IntoIterator<Item = T>, reserved_count: usize) {
        let mut queue = self.queue.lock().unwrap();
        let mut pushed = 0;
        for item in items {
            queue.push_back(item);
            pushed += 1;
        }
        assert_eq!(pushed, reserved_count, "Mailbox::push must publish exactly the reserved count");
        self.reserved.fetch_sub(reserved_count, Ordering::AcqRel);
        drop(queue);
        self.not_empty.notify_all();
    }

    /// Release a reservation without publishing (e.g. an arrow reserved
    /// more capacity than it ended up using this fire).
    pub fn release(&self, reserved_count: usize) {
        self.reserved.fetch_sub(reserved_count, Ordering::AcqRel);
    }

    /// Non-blocking pop of up to `n` items.
    pub fn pop(&self, n: usize) -> (PopStatus, Vec<T>) {
        let mut queue = self.queue.lock().unwrap();
        if queue.is_empty() {
            return if self.closed.load(Ordering::Acquire) {
                (PopStatus::Closed, Vec::new())
            } else {
                (PopStatus::Empty, Vec::new())
            };
        }
        let take = n.min(queue.len());
        let items: Vec<T> = queue.drain(..take).collect();
        (PopStatus::Ready, items)
    }

    /// No more pushes will occur; pending items may still drain.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_never_exceeds_capacity() {
        let mb: Mailbox<u32> = Mailbox::new(4);
        assert_eq!(mb.reserve(10), 4);
        assert_eq!(mb.reserve(1), 0);
        mb.push([1, 2, 3, 4], 4);
        assert_eq!(mb.size(), 4);
        assert_eq!(mb.reserve(1), 0);
    }

    #[test]
    fn pop_respects_closed_vs_empty() {
        let mb: Mailbox<u32> = Mailbox::new(4);
        let (status, items) = mb.pop(4);
        assert_eq!(status, PopStatus::Empty);
        assert!(items.is_empty());
        mb.close();
        let (status, _) = mb.pop(4);
        assert_eq!(status, PopStatus::Closed);
    }

    #[test]
    fn push_then_pop_round_trips() {
        let mb: Mailbox<u32> = Mailbox::new(4);
        let k = mb.reserve(2);
        mb.push([10, 20], k);
        let (status, items) = mb.pop(10);
        assert_eq!(status, PopStatus::Ready);
        assert_eq!(items, vec![10, 20]);
    }

    #[test]
    fn release_frees_unused_reservation() {
        let mb: Mailbox<u32> = Mailbox::new(2);
        let k = mb.reserve(2);
        assert_eq!(k, 2);
        mb.release(2);
        assert_eq!(mb.reserve(2), 2);
    }
}
