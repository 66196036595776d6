//! Fixed-capacity bags of deferred functions

use arrayvec::ArrayVec;

use crate::deferred::Deferred;
use crate::epoch::Epoch;

/// The maximum number of deferred functions a bag may hold.
///
/// Small bags make the debug builds exercise the overflow and hand-off paths
/// constantly; release builds trade that for fewer queue operations.
#[cfg(debug_assertions)]
const MAX_OBJECTS: usize = 4;
#[cfg(not(debug_assertions))]
const MAX_OBJECTS: usize = 64;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Bag
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A bag of deferred functions.
///
/// A bag accepts deferred functions until it is full, is sealed with the
/// global epoch when it is handed off to the global queue and executes all of
/// its functions (in insertion order) when it is dropped.
#[derive(Debug, Default)]
pub(crate) struct Bag {
    deferreds: ArrayVec<Deferred, MAX_OBJECTS>,
    seal: Option<Epoch>,
}

/***** impl inherent ******************************************************************************/

impl Bag {
    /// Creates a new empty, unsealed bag.
    #[inline]
    pub fn new() -> Self {
        Self { deferreds: ArrayVec::new(), seal: None }
    }

    /// Returns `true` if the bag contains no deferred functions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deferreds.is_empty()
    }

    /// Attempts to append `deferred` to the bag.
    ///
    /// Returns the rejected function back to the caller if the bag is full.
    ///
    /// # Panics
    ///
    /// Panics if the bag has already been sealed.
    #[inline]
    pub fn try_push(&mut self, deferred: Deferred) -> Result<(), Deferred> {
        assert!(self.seal.is_none(), "attempt to push into a sealed bag");
        self.deferreds.try_push(deferred).map_err(|full| full.element())
    }

    /// Seals the bag with the given epoch.
    #[inline]
    pub fn seal(&mut self, epoch: Epoch) {
        self.seal = Some(epoch);
    }

    /// Determines if it is safe to destroy the bag with respect to the
    /// current global epoch.
    ///
    /// A pinned participant can witness at most one epoch advancement, so a
    /// sealed bag must trail the global epoch by at least two steps before no
    /// live reader can still be observing its seal epoch.
    ///
    /// # Panics
    ///
    /// Panics if the bag has not been sealed.
    #[inline]
    pub fn is_expired(&self, global_epoch: Epoch) -> bool {
        let seal = self.seal.expect("only sealed bags can expire");
        global_epoch.wrapping_sub(seal) >= 2
    }
}

/***** impl Drop **********************************************************************************/

impl Drop for Bag {
    #[inline]
    fn drop(&mut self) {
        // Deferred functions run in insertion order.
        for deferred in self.deferreds.drain(..) {
            deferred.call();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use crate::deferred::Deferred;
    use crate::epoch::Epoch;

    use super::{Bag, MAX_OBJECTS};

    #[test]
    fn default_bag_is_empty() {
        let bag = Bag::new();
        assert!(bag.is_empty());
    }

    #[test]
    fn overflow_returns_rejected_function() {
        let count = Cell::new(0);
        let mut bag = Bag::new();

        for _ in 0..MAX_OBJECTS {
            let deferred = unsafe { Deferred::new_unchecked(|| count.set(count.get() + 1)) };
            assert!(bag.try_push(deferred).is_ok());
        }
        assert!(!bag.is_empty());

        let rejected = {
            let deferred = unsafe { Deferred::new_unchecked(|| count.set(count.get() + 1)) };
            bag.try_push(deferred).unwrap_err()
        };

        // Destroying the bag executes exactly the stored functions.
        drop(bag);
        assert_eq!(count.get(), MAX_OBJECTS);

        rejected.call();
        assert_eq!(count.get(), MAX_OBJECTS + 1);
    }

    #[test]
    #[should_panic(expected = "sealed bag")]
    fn push_into_sealed_bag() {
        let mut bag = Bag::new();
        for _ in 0..2 {
            let _ = bag.try_push(unsafe { Deferred::new_unchecked(|| {}) });
        }

        bag.seal(Epoch::with_value(16));
        let _ = bag.try_push(unsafe { Deferred::new_unchecked(|| {}) });
    }

    #[test]
    fn expiry_requires_two_epochs() {
        let mut bag = Bag::new();
        bag.seal(Epoch::with_value(4));

        assert!(!bag.is_expired(Epoch::with_value(4)));
        assert!(!bag.is_expired(Epoch::with_value(6)));
        assert!(bag.is_expired(Epoch::with_value(8)));
    }

    #[test]
    #[should_panic(expected = "sealed bags")]
    fn expiry_of_unsealed_bag() {
        let bag = Bag::new();
        let _ = bag.is_expired(Epoch::with_value(0));
    }
}
