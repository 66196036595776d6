//! A concurrent lock-free intrusive list.
//!
//! Elements embed an [`Entry`] at a fixed offset and are linked through it.
//! Only the owner of an element may mark it as removed; the next traversal
//! physically unlinks marked entries and defers their destruction through the
//! iterating thread's guard.

use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::atomic::{Atomic, Shared};
use crate::guard::{unprotected, Guard};

/// The tag on an entry's `next` pointer marking the entry as removed.
const REMOVE_TAG: usize = 0b1;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Entry
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An intrusive link embedded in every list element.
#[derive(Debug, Default)]
pub(crate) struct Entry {
    /// The next entry in the list. If the tag is 1, this entry is removed.
    next: Atomic<Entry>,
}

/***** impl inherent ******************************************************************************/

impl Entry {
    /// Marks this entry as removed, deferring the actual unlinking and
    /// deallocation to a later traversal.
    ///
    /// # Safety
    ///
    /// Only the element's owner may call this, and only once.
    #[inline]
    pub unsafe fn delete(&self, guard: &Guard) {
        // (LST:1) this `Release` RMW synchronizes-with the `Acquire` loads (LST:4) and (LST:5)
        self.next.fetch_or(REMOVE_TAG, Release, guard);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// IsElement (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Conversions between a list element and its embedded [`Entry`].
///
/// Implementations encapsulate the entry's offset within the element, so the
/// list itself never performs pointer arithmetic.
pub(crate) trait IsElement<T> {
    /// Returns a reference to the element's embedded entry.
    fn entry_of(element: &T) -> &Entry;

    /// Returns a reference to the element containing the given entry.
    ///
    /// # Safety
    ///
    /// `entry` must be embedded in a live element of type `T`.
    unsafe fn element_of(entry: &Entry) -> &T;

    /// Schedules the destruction of the element containing `entry`.
    ///
    /// # Safety
    ///
    /// `entry` must already be unlinked, so that no new traversal can reach
    /// it.
    unsafe fn finalize(entry: &Entry, guard: &Guard);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// List
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A lock-free singly-linked list of elements with embedded entries.
#[derive(Debug)]
pub(crate) struct List<T, C: IsElement<T> = T> {
    /// The head pointer; entries are inserted at the front.
    head: Atomic<Entry>,

    _marker: PhantomData<(T, C)>,
}

/***** impl inherent ******************************************************************************/

impl<T, C: IsElement<T>> List<T, C> {
    /// Creates a new empty list.
    pub const fn new() -> Self {
        Self { head: Atomic::null(), _marker: PhantomData }
    }

    /// Inserts `container` at the front of the list.
    ///
    /// # Safety
    ///
    /// `container` must point to a live element that is not yet linked into
    /// any list and remains valid until its entry is marked removed and
    /// finalized.
    pub unsafe fn insert<'g>(&'g self, container: Shared<'g, T>, guard: &'g Guard) {
        let to = &self.head;
        let entry = C::entry_of(container.deref());
        let entry_ptr = Shared::from(entry as *const Entry);

        let mut next = to.load(Relaxed, guard);
        loop {
            entry.next.store(next, Relaxed);

            // (LST:2) this `Release` CAS synchronizes-with the `Acquire` loads (LST:4) and (LST:5)
            match to.compare_and_set_weak(next, entry_ptr, Release, guard) {
                Ok(_) => break,
                Err(err) => next = err.current,
            }
        }
    }

    /// Returns an iterator over the live elements of the list.
    #[inline]
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, T, C> {
        Iter {
            guard,
            pred: &self.head,
            // (LST:4) this `Acquire` load synchronizes-with the CASes (LST:1), (LST:2) and (LST:3)
            curr: self.head.load(Acquire, guard),
            head: &self.head,
            _marker: PhantomData,
        }
    }
}

/***** impl Drop **********************************************************************************/

impl<T, C: IsElement<T>> Drop for List<T, C> {
    fn drop(&mut self) {
        unsafe {
            let guard = unprotected();
            let mut curr = self.head.load(Relaxed, guard);
            while let Some(c) = curr.as_ref() {
                let succ = c.next.load(Relaxed, guard);
                // Every owner must have marked its entry as removed by now.
                assert_eq!(succ.tag(), REMOVE_TAG, "dropped a list with undeleted entries");

                C::finalize(curr.deref(), guard);
                curr = succ;
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// IterError
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An error that can occur during the iteration over a [`List`].
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum IterError {
    /// A concurrent unlink won the race for an entry this iterator was about
    /// to visit, forcing a restart from the head. Entries visited before the
    /// restart may be observed again.
    Stalled,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Iter
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An iterator over the live elements of a [`List`].
///
/// Marked entries encountered along the way are unlinked and their elements
/// handed to [`IsElement::finalize`].
pub(crate) struct Iter<'g, T, C: IsElement<T>> {
    guard: &'g Guard,

    /// Pointer from the predecessor to the current entry.
    pred: &'g Atomic<Entry>,

    /// The current entry.
    curr: Shared<'g, Entry>,

    /// The list head, for restarting iteration after a lost race.
    head: &'g Atomic<Entry>,

    _marker: PhantomData<(&'g T, C)>,
}

/***** impl Iterator ******************************************************************************/

impl<'g, T: 'g, C: IsElement<T>> Iterator for Iter<'g, T, C> {
    type Item = Result<&'g T, IterError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(c) = unsafe { self.curr.as_ref() } {
            // (LST:5) this `Acquire` load synchronizes-with the CASes (LST:1), (LST:2) and (LST:3)
            let succ = c.next.load(Acquire, self.guard);

            if succ.tag() == REMOVE_TAG {
                // The current entry was removed; try to unlink it.
                let succ = succ.with_tag(0);

                // (LST:3) this `Acquire` CAS synchronizes-with the CASes (LST:1) and (LST:2)
                let succ = match self.pred.compare_and_set(self.curr, succ, Acquire, self.guard) {
                    Ok(_) => {
                        // The unlinked entry can no longer be reached by new
                        // traversals; schedule its destruction.
                        unsafe { C::finalize(self.curr.deref(), self.guard) };
                        succ
                    }
                    Err(err) => {
                        // The predecessor itself was removed in the meantime;
                        // the only safe place to continue is the head.
                        if err.current.tag() == REMOVE_TAG {
                            self.pred = self.head;
                            self.curr = self.head.load(Acquire, self.guard);
                            return Some(Err(IterError::Stalled));
                        }

                        err.current
                    }
                };

                self.curr = succ;
                continue;
            }

            // Move one step forward.
            self.pred = &c.next;
            self.curr = succ;

            return Some(Ok(unsafe { C::element_of(c) }));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_utils::thread;
    use memoffset::offset_of;

    use crate::atomic::{Owned, Shared};
    use crate::collector::Collector;
    use crate::guard::{unprotected, Guard};

    use super::{Entry, IsElement, List};

    #[derive(Debug, Default)]
    struct TestNode {
        entry: Entry,
    }

    impl IsElement<TestNode> for TestNode {
        fn entry_of(node: &TestNode) -> &Entry {
            let entry_ptr =
                (node as *const TestNode as usize + offset_of!(TestNode, entry)) as *const Entry;
            unsafe { &*entry_ptr }
        }

        unsafe fn element_of(entry: &Entry) -> &TestNode {
            let node_ptr =
                (entry as *const Entry as usize - offset_of!(TestNode, entry)) as *const TestNode;
            &*node_ptr
        }

        unsafe fn finalize(entry: &Entry, guard: &Guard) {
            guard.defer_destroy(Shared::from(Self::element_of(entry) as *const TestNode));
        }
    }

    #[test]
    fn insert_iterate_unlink() {
        let collector = Collector::new();
        let handle = collector.register();
        let list = List::<TestNode>::new();

        unsafe {
            let guard = handle.pin();
            let n1 = Owned::new(TestNode::default()).into_shared(&guard);
            let n2 = Owned::new(TestNode::default()).into_shared(&guard);
            let n3 = Owned::new(TestNode::default()).into_shared(&guard);
            list.insert(n1, &guard);
            list.insert(n2, &guard);
            list.insert(n3, &guard);
            assert_eq!(list.iter(&guard).count(), 3);

            // Marked entries are unlinked by the next traversal.
            TestNode::entry_of(n2.deref()).delete(&guard);
            assert_eq!(list.iter(&guard).count(), 2);

            TestNode::entry_of(n1.deref()).delete(&guard);
            TestNode::entry_of(n3.deref()).delete(&guard);
            assert_eq!(list.iter(&guard).count(), 0);
        }
    }

    #[test]
    fn drop_finalizes_marked_entries() {
        let collector = Collector::new();
        let handle = collector.register();
        let list = List::<TestNode>::new();

        unsafe {
            let guard = handle.pin();
            let node = Owned::new(TestNode::default()).into_shared(&guard);
            list.insert(node, &guard);
            TestNode::entry_of(node.deref()).delete(&guard);
        }

        // The entry is still linked but marked; dropping the list reclaims it.
        drop(list);
    }

    #[test]
    fn concurrent_insert_unlink() {
        const THREADS: usize = 8;
        const OPERATIONS: usize = 100;

        let collector = Collector::new();
        let list = List::<TestNode>::new();

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|_| {
                    let handle = collector.register();
                    for _ in 0..OPERATIONS {
                        let guard = handle.pin();
                        unsafe {
                            let node = Owned::new(TestNode::default()).into_shared(&guard);
                            list.insert(node, &guard);
                            let _ = list.iter(&guard).count();
                            TestNode::entry_of(node.deref()).delete(&guard);
                        }
                    }
                });
            }
        })
        .unwrap();

        unsafe {
            // All entries are marked; a full traversal unlinks whatever the
            // threads left behind.
            let _ = list.iter(unprotected()).count();
        }
        drop(list);
    }
}
