//! Type safe wrap-around epochs

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::atomic::strongest_failure_ordering;

const EPOCH_INCREMENT: usize = 2;
const PINNED_BIT: usize = 0b1;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Epoch
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An epoch that can be marked as pinned or unpinned.
///
/// Internally, the epoch is represented as an integer that wraps around at
/// some unspecified point and a flag (the least significant bit) that
/// represents whether the epoch is pinned.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Epoch {
    data: usize,
}

/***** impl inherent ******************************************************************************/

impl Epoch {
    /// Returns the starting epoch in the unpinned state.
    #[inline]
    pub const fn starting() -> Self {
        Self { data: 0 }
    }

    /// Returns an epoch with the given raw value.
    #[inline]
    pub const fn with_value(data: usize) -> Self {
        Self { data }
    }

    /// Returns the number of epochs `self` is ahead of `rhs`.
    ///
    /// Epochs are numbers in the range `(isize::MIN / 2) .. (isize::MAX / 2)`,
    /// so the returned distance lies within this interval as well. The pinned
    /// flag of `rhs` is ignored.
    #[inline]
    pub fn wrapping_sub(self, rhs: Self) -> isize {
        // The shift discards the flag bit, so the distance is counted in
        // epochs rather than in raw increments of two.
        self.data.wrapping_sub(rhs.data & !PINNED_BIT) as isize >> 1
    }

    /// Returns `true` if the epoch is marked as pinned.
    #[inline]
    pub fn is_pinned(self) -> bool {
        (self.data & PINNED_BIT) == PINNED_BIT
    }

    /// Returns the same epoch, but marked as pinned.
    #[inline]
    pub fn pinned(self) -> Self {
        Self { data: self.data | PINNED_BIT }
    }

    /// Returns the same epoch, but marked as unpinned.
    #[inline]
    pub fn unpinned(self) -> Self {
        Self { data: self.data & !PINNED_BIT }
    }

    /// Returns the successor epoch.
    ///
    /// The successor is marked as pinned if and only if `self` is.
    #[inline]
    pub fn successor(self) -> Self {
        Self { data: self.data.wrapping_add(EPOCH_INCREMENT) }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// AtomicEpoch
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An atomic value that holds an [`Epoch`].
#[derive(Debug, Default)]
pub(crate) struct AtomicEpoch {
    data: AtomicUsize,
}

/***** impl inherent ******************************************************************************/

impl AtomicEpoch {
    /// Creates a new atomic epoch initialized with the starting epoch.
    #[inline]
    pub const fn new() -> Self {
        Self { data: AtomicUsize::new(0) }
    }

    /// Loads a value from the atomic epoch.
    #[inline]
    pub fn load(&self, order: Ordering) -> Epoch {
        Epoch::with_value(self.data.load(order))
    }

    /// Stores a value into the atomic epoch.
    #[inline]
    pub fn store(&self, epoch: Epoch, order: Ordering) {
        self.data.store(epoch.data, order);
    }

    /// Stores a value into the atomic epoch if the current value is the same
    /// as `current`.
    ///
    /// The return value is always the previous value. If it is equal to
    /// `current`, then the value was updated. The failure ordering is derived
    /// by weakening the given (success) ordering.
    #[inline]
    pub fn compare_and_swap(&self, current: Epoch, new: Epoch, order: Ordering) -> Epoch {
        match self.data.compare_exchange(
            current.data,
            new.data,
            order,
            strongest_failure_ordering(order),
        ) {
            Ok(previous) | Err(previous) => Epoch::with_value(previous),
        }
    }
}
