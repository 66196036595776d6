//! Type-erased one-shot closures for deferred execution

#[cfg(not(feature = "std"))]
use alloc::boxed::Box;

use core::fmt;
use core::mem;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Deferred
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A boxed closure whose execution has been deferred.
///
/// The closure is move-only and is invoked at most once, when the deferred
/// function is [`call`][Deferred::call]ed or when the bag holding it is
/// dropped.
pub(crate) struct Deferred {
    call: Box<dyn FnOnce()>,
}

// Deferred functions are moved between threads inside bags. The contract of
// `Guard::defer_unchecked` makes the caller responsible for only deferring
// closures that may run on another thread.
unsafe impl Send for Deferred {}
unsafe impl Sync for Deferred {}

/***** impl inherent ******************************************************************************/

impl Deferred {
    /// Creates a new [`Deferred`] from the given closure, erasing its
    /// lifetime.
    ///
    /// # Safety
    ///
    /// The caller has to ensure that everything captured by `f` remains valid
    /// until the closure is invoked.
    #[inline]
    pub unsafe fn new_unchecked<'a, F: FnOnce() + 'a>(f: F) -> Self {
        let boxed: Box<dyn FnOnce() + 'a> = Box::new(f);
        Self { call: mem::transmute::<Box<dyn FnOnce() + 'a>, Box<dyn FnOnce() + 'static>>(boxed) }
    }

    /// Consumes `self` and invokes the closure.
    #[inline]
    pub fn call(self) {
        (self.call)();
    }
}

/***** impl Debug *********************************************************************************/

impl fmt::Debug for Deferred {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Deferred { .. }")
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::Deferred;

    #[test]
    fn called_exactly_once() {
        let count = Cell::new(0);
        let deferred = unsafe { Deferred::new_unchecked(|| count.set(count.get() + 1)) };

        assert_eq!(count.get(), 0);
        deferred.call();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn dropping_without_call_does_not_invoke() {
        let count = Cell::new(0);
        let deferred = unsafe { Deferred::new_unchecked(|| count.set(count.get() + 1)) };

        drop(deferred);
        assert_eq!(count.get(), 0);
    }
}
