//! A Michael-Scott multi-producer multi-consumer lock-free queue.
//!
//! Nodes are reclaimed through deferred destruction, so the queue can be
//! popped concurrently without use-after-free hazards. Popping supports a
//! caller-supplied predicate, which the collector uses to only take bags
//! whose epoch has expired.

use core::mem::MaybeUninit;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::atomic::{Atomic, Owned, Shared};
use crate::guard::{unprotected, Guard};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Queue
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A lock-free multi-producer multi-consumer queue.
///
/// The head always points at a sentinel node whose `data` has already been
/// taken; the first live element is the sentinel's successor.
#[derive(Debug)]
pub(crate) struct Queue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

/***** impl inherent ******************************************************************************/

impl<T> Queue<T> {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        let queue =
            Self { head: CachePadded::new(Atomic::null()), tail: CachePadded::new(Atomic::null()) };

        let sentinel = Owned::new(Node { data: MaybeUninit::uninit(), next: Atomic::null() });

        unsafe {
            let guard = unprotected();
            let sentinel = sentinel.into_shared(guard);
            queue.head.store(sentinel, Relaxed);
            queue.tail.store(sentinel, Relaxed);
        }

        queue
    }

    /// Attempts to link `new` behind `onto`, assuming `onto` is the tail.
    ///
    /// Returns `true` on success; on failure the tail has moved and the
    /// caller must retry with a fresh snapshot.
    #[inline]
    fn push_internal(&self, onto: Shared<'_, Node<T>>, new: Shared<'_, Node<T>>, guard: &Guard) -> bool {
        let o = unsafe { onto.deref() };
        // (QUE:1) this `Acquire` load synchronizes-with the `Release` CASes (QUE:2) and (QUE:3)
        let next = o.next.load(Acquire, guard);
        if unsafe { next.as_ref().is_some() } {
            // `onto` is no longer the tail; help move the tail pointer along.
            let _ = self.tail.compare_and_set(onto, next, Release, guard);
            false
        } else {
            // (QUE:2) this `Release` CAS synchronizes-with the `Acquire` loads (QUE:1) and (QUE:4)
            let result = o.next.compare_and_set(Shared::null(), new, Release, guard).is_ok();
            if result {
                let _ = self.tail.compare_and_set(onto, new, Release, guard);
            }
            result
        }
    }

    /// Appends `t` to the back of the queue.
    pub fn push(&self, t: T, guard: &Guard) {
        let new = Owned::new(Node { data: MaybeUninit::new(t), next: Atomic::null() });
        let new = new.into_shared(guard);

        loop {
            // Snapshot the tail optimistically; the CAS in `push_internal`
            // fails if the snapshot went stale.
            let tail = self.tail.load(Acquire, guard);
            if self.push_internal(tail, new, guard) {
                break;
            }
        }
    }

    /// Attempts to pop the head if `condition` accepts it.
    ///
    /// Fails with `Err(())` when losing a race with another consumer; returns
    /// `Ok(None)` when the queue is empty or the head is rejected.
    #[inline]
    fn pop_internal<F>(&self, condition: F, guard: &Guard) -> Result<Option<T>, ()>
    where
        F: Fn(&T) -> bool,
    {
        let head = self.head.load(Acquire, guard);
        let h = unsafe { head.deref() };
        // (QUE:4) this `Acquire` load synchronizes-with the `Release` CAS (QUE:2)
        let next = h.next.load(Acquire, guard);
        match unsafe { next.as_ref() } {
            Some(n) if condition(unsafe { &*n.data.as_ptr() }) => unsafe {
                // (QUE:3) this `Release` CAS synchronizes-with the `Acquire` load (QUE:1)
                self.head
                    .compare_and_set(head, next, Release, guard)
                    .map(|_| {
                        // Swing the tail before retiring a node it may still
                        // point at.
                        let tail = self.tail.load(Relaxed, guard);
                        if head == tail {
                            let _ = self.tail.compare_and_set(tail, next, Release, guard);
                        }
                        // The popped node becomes the new sentinel; the old
                        // one is gone once all pinned threads move on.
                        guard.defer_destroy(head);
                        Some(n.data.as_ptr().read())
                    })
                    .map_err(|_| ())
            },
            None | Some(_) => Ok(None),
        }
    }

    /// Pops the head of the queue, if any.
    pub fn try_pop(&self, guard: &Guard) -> Option<T> {
        loop {
            if let Ok(head) = self.pop_internal(|_| true, guard) {
                return head;
            }
        }
    }

    /// Pops the head of the queue only if `condition` accepts it.
    pub fn try_pop_if<F>(&self, condition: F, guard: &Guard) -> Option<T>
    where
        F: Fn(&T) -> bool,
    {
        loop {
            if let Ok(head) = self.pop_internal(&condition, guard) {
                return head;
            }
        }
    }
}

/***** impl Drop **********************************************************************************/

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = unprotected();

            while self.try_pop(guard).is_some() {}

            // Destroy the remaining sentinel node.
            let sentinel = self.head.load(Relaxed, guard);
            drop(sentinel.into_owned());
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Node
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
struct Node<T> {
    /// Uninitialized for sentinel nodes, whose element has been popped or
    /// never existed.
    data: MaybeUninit<T>,

    next: Atomic<Node<T>>,
}

#[cfg(test)]
mod tests {
    use crossbeam_utils::thread;

    use crate::collector::Collector;

    use super::Queue;

    #[test]
    fn push_try_pop() {
        let collector = Collector::new();
        let handle = collector.register();
        let guard = handle.pin();

        let queue = Queue::new();
        assert_eq!(queue.try_pop(&guard), None);

        queue.push(1, &guard);
        queue.push(2, &guard);
        assert_eq!(queue.try_pop(&guard), Some(1));
        assert_eq!(queue.try_pop(&guard), Some(2));
        assert_eq!(queue.try_pop(&guard), None);
    }

    #[test]
    fn conditional_pop_rejects_head() {
        let collector = Collector::new();
        let handle = collector.register();
        let guard = handle.pin();

        let queue = Queue::new();
        queue.push(1, &guard);
        queue.push(2, &guard);

        assert_eq!(queue.try_pop_if(|head| *head > 1, &guard), None);
        assert_eq!(queue.try_pop_if(|head| *head == 1, &guard), Some(1));
        assert_eq!(queue.try_pop_if(|head| *head > 1, &guard), Some(2));
    }

    #[test]
    fn drop_drains_remaining_elements() {
        struct CountOnDrop<'a>(&'a core::cell::Cell<usize>);
        impl Drop for CountOnDrop<'_> {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let collector = Collector::new();
        let handle = collector.register();
        let guard = handle.pin();

        let drops = core::cell::Cell::new(0);
        let queue = Queue::new();
        for _ in 0..3 {
            queue.push(CountOnDrop(&drops), &guard);
        }

        drop(queue);
        assert_eq!(drops.get(), 3);
    }

    #[test]
    fn concurrent_push_pop() {
        const THREADS: usize = 4;
        const COUNT: usize = 10_000;

        let collector = Collector::new();
        let queue = Queue::new();

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|_| {
                    let handle = collector.register();
                    for i in 0..COUNT {
                        let guard = handle.pin();
                        queue.push(i, &guard);
                        let _ = queue.try_pop(&guard);
                    }
                });
            }
        })
        .unwrap();
    }
}
