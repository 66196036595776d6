//! Per-thread participants in epoch-based reclamation

use core::cell::{Cell, UnsafeCell};
use core::mem::ManuallyDrop;
use core::num::Wrapping;
use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering::{Relaxed, Release, SeqCst};

use memoffset::offset_of;

use crate::atomic::{Owned, Shared};
use crate::bag::Bag;
use crate::collector::{Collector, LocalHandle};
use crate::deferred::Deferred;
use crate::epoch::{AtomicEpoch, Epoch};
use crate::global::Global;
use crate::guard::{unprotected, Guard};
use crate::sync::list::{Entry, IsElement};

include!(concat!(env!("OUT_DIR"), "/collect_interval.rs"));

////////////////////////////////////////////////////////////////////////////////////////////////////
// Local
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A participant in garbage collection.
///
/// Every thread owning a [`LocalHandle`] has one `Local`, linked into the
/// global participant list. Its counters are only ever mutated by the owning
/// thread; the only field other threads read is the atomic `epoch`.
pub(crate) struct Local {
    /// The entry in the intrusive list of participants.
    entry: Entry,

    /// When pinned, holds the global epoch observed at pin time, with the
    /// pinned flag set. Stored as unpinned zero while the participant is not
    /// pinned.
    pub(crate) epoch: AtomicEpoch,

    /// A reference to the collector, keeping the global state alive.
    collector: UnsafeCell<ManuallyDrop<Collector>>,

    /// The thread-local cache of deferred functions.
    bag: UnsafeCell<Bag>,

    /// The number of guards keeping this participant pinned.
    guard_count: Cell<usize>,

    /// The number of active handles referring to this participant.
    handle_count: Cell<usize>,

    /// The total number of pinnings performed, which periodically kicks off
    /// a collection cycle.
    pin_count: Cell<Wrapping<usize>>,
}

// The counters and the bag are single-writer state of the owning thread;
// other threads only ever read the atomic `epoch` during list traversals.
unsafe impl Send for Local {}
unsafe impl Sync for Local {}

/***** impl inherent ******************************************************************************/

impl Local {
    /// Registers a new participant in the collector's global state and
    /// returns a handle owning it.
    pub fn register(collector: &Collector) -> LocalHandle {
        unsafe {
            // The participant is not yet visible to any other thread, so a
            // dummy guard suffices for the insertion.
            let guard = unprotected();

            let local = Owned::new(Self {
                entry: Entry::default(),
                epoch: AtomicEpoch::new(),
                collector: UnsafeCell::new(ManuallyDrop::new(collector.clone())),
                bag: UnsafeCell::new(Bag::new()),
                guard_count: Cell::new(0),
                handle_count: Cell::new(1),
                pin_count: Cell::new(Wrapping(0)),
            })
            .into_shared(guard);

            collector.global.locals.insert(local, guard);

            LocalHandle::new(local.as_raw())
        }
    }

    /// Returns a reference to the collector this participant belongs to.
    #[inline]
    pub fn collector(&self) -> &Collector {
        unsafe { &**self.collector.get() }
    }

    /// Returns a reference to the shared global state.
    #[inline]
    pub fn global(&self) -> &Global {
        &self.collector().global
    }

    /// Returns `true` if this participant is currently pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.guard_count.get() > 0
    }

    /// Pins this participant and returns a guard witnessing the pin.
    ///
    /// Pinning is reentrant; only the first guard announces an epoch.
    pub fn pin(&self) -> Guard {
        let guard = Guard { local: Some(NonNull::from(self)) };

        let guard_count = self.guard_count.get();
        // This could theoretically overflow, but a checked add on the fast
        // path is not worth a practically unreachable failure mode.
        self.guard_count.set(guard_count + 1);

        if guard_count == 0 {
            let global_epoch = self.global().epoch.load(Relaxed);
            let new_epoch = global_epoch.pinned();

            // (LOC:1) this `SeqCst` publication synchronizes-with the `SeqCst` participant
            // loads (GLO:1). The announcement must be ordered before any subsequent load from
            // the shared data structure.
            if cfg!(any(target_arch = "x86", target_arch = "x86_64")) {
                // On x86 a sequentially consistent RMW compiles to `lock cmpxchg`, a full
                // barrier that tends to beat the `mfence` a plain store would need. The CAS
                // cannot fail: an unpinned participant stores the unpinned zero epoch.
                let current = Epoch::starting();
                let previous = self.epoch.compare_and_swap(current, new_epoch, SeqCst);
                debug_assert_eq!(current, previous, "participant was expected to be unpinned");
            } else {
                self.epoch.store(new_epoch, SeqCst);
            }

            let count = self.pin_count.get();
            self.pin_count.set(count + Wrapping(1));

            // Every once in a while a pinning pays for the bookkeeping and
            // runs a collection cycle.
            if count.0 % PINNINGS_BETWEEN_COLLECT == 0 {
                self.global().collect(&guard);
            }
        }

        guard
    }

    /// Unpins this participant once.
    ///
    /// Dropping the outermost guard clears the announced epoch; a participant
    /// without remaining handles is finalized.
    pub fn unpin(&self) {
        let guard_count = self.guard_count.get();
        assert!(guard_count >= 1, "unpin without a matching pin");
        self.guard_count.set(guard_count - 1);

        if guard_count == 1 {
            // (LOC:2) this `Release` store synchronizes-with the `SeqCst` participant loads
            // (GLO:1); the zero value keeps the next pin's announcement CAS trivial.
            self.epoch.store(Epoch::starting(), Release);

            if self.handle_count.get() == 0 {
                self.finalize();
            }
        }
    }

    /// Unpins and then immediately repins this participant, so that a long
    /// running operation does not hold the global epoch back.
    ///
    /// Only takes effect when exactly one guard is active.
    pub fn repin(&self) {
        let guard_count = self.guard_count.get();

        if guard_count == 1 {
            let epoch = self.epoch.load(Relaxed);
            let global_epoch = self.global().epoch.load(Relaxed).pinned();

            if epoch != global_epoch {
                // (LOC:3) this `Release` store keeps accesses made under the previous epoch
                // from leaking past the announcement of the new one.
                self.epoch.store(global_epoch, Release);
            }
        }
    }

    /// Adds `deferred` to the thread-local bag.
    ///
    /// Full bags are sealed and handed off to the global queue until the
    /// function finds a place in a fresh bag.
    ///
    /// # Safety
    ///
    /// The caller must be the owning thread, holding the pin witnessed by
    /// `guard`.
    pub unsafe fn defer(&self, mut deferred: Deferred, guard: &Guard) {
        let bag = &mut *self.bag.get();

        while let Err(rejected) = bag.try_push(deferred) {
            self.global().push_bag(bag, guard);
            deferred = rejected;
        }
    }

    /// Hands the thread-local bag off to the global queue and runs a
    /// collection cycle.
    pub fn flush(&self, guard: &Guard) {
        let bag = unsafe { &mut *self.bag.get() };

        if !bag.is_empty() {
            self.global().push_bag(bag, guard);
        }

        self.global().collect(guard);
    }

    /// Increments the handle count.
    #[inline]
    pub fn acquire_handle(&self) {
        let handle_count = self.handle_count.get();
        assert!(handle_count >= 1, "acquiring a handle of an unreferenced participant");
        self.handle_count.set(handle_count + 1);
    }

    /// Decrements the handle count, finalizing the participant when neither
    /// handles nor guards remain.
    #[inline]
    pub fn release_handle(&self) {
        let guard_count = self.guard_count.get();
        let handle_count = self.handle_count.get();
        assert!(handle_count >= 1, "releasing a handle of an unreferenced participant");
        self.handle_count.set(handle_count - 1);

        if guard_count == 0 && handle_count == 1 {
            self.finalize();
        }
    }

    /// Removes this participant from the collector.
    ///
    /// The remaining deferred functions are handed off under a final pin, the
    /// intrusive entry is marked removed and the collector reference is
    /// dropped. The participant's storage is freed by whichever list
    /// traversal unlinks the marked entry.
    #[cold]
    fn finalize(&self) {
        debug_assert_eq!(self.guard_count.get(), 0);
        debug_assert_eq!(self.handle_count.get(), 0);

        // The hand-off below pins one last time; a temporary handle keeps
        // that pin's unpin from re-entering `finalize`.
        self.handle_count.set(1);
        unsafe {
            let guard = self.pin();
            self.global().push_bag(&mut *self.bag.get(), &guard);
            // The unpin must happen before the entry is marked removed.
            drop(guard);
        }
        self.handle_count.set(0);

        unsafe {
            // Move the collector reference out while the participant is
            // still guaranteed to be alive: once the entry is marked, any
            // traversal may unlink and free it.
            let collector: Collector = ptr::read(&**self.collector.get());

            Self::entry_of(self).delete(unprotected());

            // Dropping the last collector reference destroys the global
            // state, executing all deferred functions left in its queue.
            drop(collector);
        }
    }
}

/***** impl IsElement *****************************************************************************/

impl IsElement<Local> for Local {
    fn entry_of(local: &Local) -> &Entry {
        let entry_ptr = (local as *const Local as usize + offset_of!(Local, entry)) as *const Entry;
        unsafe { &*entry_ptr }
    }

    unsafe fn element_of(entry: &Entry) -> &Local {
        let local_ptr = (entry as *const Entry as usize - offset_of!(Local, entry)) as *const Local;
        &*local_ptr
    }

    unsafe fn finalize(entry: &Entry, guard: &Guard) {
        guard.defer_destroy(Shared::from(Self::element_of(entry) as *const Local));
    }
}
