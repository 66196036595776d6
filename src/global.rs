//! The shared state of a collector instance

use core::mem;
use core::sync::atomic::Ordering::{Relaxed, Release, SeqCst};

use crossbeam_utils::CachePadded;

use crate::bag::Bag;
use crate::epoch::{AtomicEpoch, Epoch};
use crate::guard::Guard;
use crate::local::Local;
use crate::sync::list::{IterError, List};
use crate::sync::queue::Queue;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Global
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The global data shared by all participants of one collector instance.
pub(crate) struct Global {
    /// The intrusive list of participants.
    pub(crate) locals: List<Local>,

    /// The queue of sealed bags of deferred functions.
    queue: Queue<Bag>,

    /// The global epoch. Always stored unpinned.
    pub(crate) epoch: CachePadded<AtomicEpoch>,
}

/***** impl inherent ******************************************************************************/

impl Global {
    /// The number of bags a single collection cycle destroys at most.
    const COLLECT_STEPS: usize = 8;

    /// Creates a new global state with an empty participant list, an empty
    /// queue and the starting epoch.
    #[inline]
    pub fn new() -> Self {
        Self {
            locals: List::new(),
            queue: Queue::new(),
            epoch: CachePadded::new(AtomicEpoch::new()),
        }
    }

    /// Seals the given bag with the current global epoch and pushes it onto
    /// the global queue, leaving a fresh bag in its place.
    ///
    /// A relaxed load suffices for the seal: the bag's contents are published
    /// through the queue itself.
    pub fn push_bag(&self, bag: &mut Bag, guard: &Guard) {
        let mut bag = mem::replace(bag, Bag::new());

        let epoch = self.epoch.load(Relaxed);
        bag.seal(epoch);

        self.queue.push(bag, guard);
    }

    /// Destroys up to [`COLLECT_STEPS`][Self::COLLECT_STEPS] expired bags
    /// from the global queue, executing their deferred functions.
    ///
    /// Collection first attempts to advance the global epoch; bags sealed at
    /// least two epochs ago can no longer be observed by any pinned
    /// participant and are safe to destroy.
    #[cold]
    pub fn collect(&self, guard: &Guard) {
        let global_epoch = self.try_advance(guard);

        let steps = Self::COLLECT_STEPS;
        for _ in 0..steps {
            match self.queue.try_pop_if(|bag: &Bag| bag.is_expired(global_epoch), guard) {
                None => break,
                Some(bag) => drop(bag),
            }
        }
    }

    /// Attempts to advance the global epoch and returns the epoch that is
    /// current afterwards.
    ///
    /// The epoch advances only if every currently pinned participant has been
    /// pinned in the current epoch. A participant pinned in an older epoch,
    /// or a lost race during list traversal, leaves the epoch unchanged.
    #[cold]
    pub fn try_advance(&self, guard: &Guard) -> Epoch {
        let global_epoch = self.epoch.load(Relaxed);

        for local in self.locals.iter(guard) {
            match local {
                Err(IterError::Stalled) => {
                    // The traversal lost a race against an unlinking thread
                    // and cannot certify all participants; leave the epoch to
                    // a later attempt.
                    return global_epoch;
                }
                Ok(local) => {
                    // (GLO:1) this `SeqCst` load synchronizes-with the `SeqCst` publication
                    // (LOC:1), establishing a total order between epoch announcements and
                    // advancement checks.
                    let local_epoch = local.epoch.load(SeqCst);

                    if local_epoch.is_pinned() && local_epoch.unpinned() != global_epoch {
                        return global_epoch;
                    }
                }
            }
        }

        // Every pinned participant has announced the current global epoch.
        // If another thread advanced the epoch concurrently, both stores
        // write the same successor: a thread calling `try_advance` is itself
        // pinned in `global_epoch`, so the epoch can never move two steps
        // ahead of it.
        let new_epoch = global_epoch.successor();
        // (GLO:2) this `Release` store synchronizes-with the epoch loads in `Local::pin` and
        // `Local::repin`
        self.epoch.store(new_epoch, Release);
        new_epoch
    }
}
