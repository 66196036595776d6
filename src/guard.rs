//! RAII pin witnesses

use core::fmt;
use core::mem;
use core::ptr::NonNull;

use crate::atomic::Shared;
use crate::collector::Collector;
use crate::deferred::Deferred;
use crate::local::Local;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Guard
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A guard that keeps the current thread pinned.
///
/// Pinning is reentrant: only the creation of a thread's first guard pins it
/// and only dropping the last one unpins it. While a guard is live, loads
/// from [`Atomic`][crate::Atomic] pointers yield [`Shared`] references that
/// are safe to dereference, because no cell reachable through them is
/// reclaimed before the guard is dropped.
///
/// A *dummy* guard (see [`unprotected`]) is not linked to any participant and
/// provides no protection; it exists for single-threaded construction and
/// destruction of data structures.
pub struct Guard {
    pub(crate) local: Option<NonNull<Local>>,
}

/***** impl inherent ******************************************************************************/

impl Guard {
    /// Stores `f` so that it runs at some point after all currently pinned
    /// threads have unpinned.
    ///
    /// The function is cached in the thread-local bag; full bags are handed
    /// off to the global queue, from which any thread may eventually execute
    /// them. No guarantee is made about *when* `f` runs, only that it does
    /// not run before every thread pinned right now has unpinned once.
    ///
    /// On a dummy guard, `f` is executed immediately.
    #[inline]
    pub fn defer<F, R>(&self, f: F)
    where
        F: FnOnce() -> R,
        F: Send + 'static,
    {
        unsafe { self.defer_unchecked(f) }
    }

    /// Like [`defer`][Guard::defer], but without bounds on the closure.
    ///
    /// # Safety
    ///
    /// The caller has to ensure that everything captured by `f` is still
    /// valid when the closure runs, which may be on another thread and at any
    /// later point in time.
    #[inline]
    pub unsafe fn defer_unchecked<F, R>(&self, f: F)
    where
        F: FnOnce() -> R,
    {
        match self.local {
            Some(local) => local.as_ref().defer(Deferred::new_unchecked(move || drop(f())), self),
            None => drop(f()),
        }
    }

    /// Defers the destruction of the cell `ptr` points to.
    ///
    /// When the deferred function eventually runs, it takes ownership of the
    /// cell and reclaims it.
    ///
    /// # Safety
    ///
    /// `ptr` must be unreachable for new readers by the time this is called,
    /// and no thread may use it beyond its current pin.
    #[inline]
    pub unsafe fn defer_destroy<T>(&self, ptr: Shared<'_, T>) {
        self.defer_unchecked(move || ptr.into_owned());
    }

    /// Clears the thread-local cache of deferred functions by handing it off
    /// to the global queue and runs a collection cycle.
    ///
    /// On a dummy guard this is a no-op.
    #[inline]
    pub fn flush(&self) {
        if let Some(local) = self.local_ref() {
            local.flush(self);
        }
    }

    /// Unpins and immediately repins the thread.
    ///
    /// This lets a long-running operation move to a fresh epoch instead of
    /// holding the global epoch back. The thread is only repinned if this is
    /// its sole active guard; no guard-based references may be kept across
    /// the call, which is why it takes `&mut self`.
    ///
    /// On a dummy guard this is a no-op.
    #[inline]
    pub fn repin(&mut self) {
        if let Some(local) = self.local_ref() {
            local.repin();
        }
    }

    /// Temporarily unpins the thread, executes `f` and pins the thread again.
    ///
    /// The repin happens even if `f` unwinds. On a dummy guard, `f` is simply
    /// executed.
    #[inline]
    pub fn repin_after<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        if let Some(local) = self.local_ref() {
            // Keep the participant alive across the unpinned window.
            local.acquire_handle();
            local.unpin();
        }

        let local = self.local;
        let _guard = scopeguard::guard((), move |()| {
            if let Some(local) = local {
                let local = unsafe { local.as_ref() };
                mem::forget(local.pin());
                local.release_handle();
            }
        });

        f()
    }

    /// Returns the collector this guard belongs to, or `None` for a dummy
    /// guard.
    #[inline]
    pub fn collector(&self) -> Option<&Collector> {
        self.local_ref().map(Local::collector)
    }

    /// Returns `true` if this is a dummy guard created by [`unprotected`].
    #[inline]
    pub fn is_dummy(&self) -> bool {
        self.local.is_none()
    }

    #[inline]
    fn local_ref(&self) -> Option<&Local> {
        self.local.map(|local| unsafe { &*local.as_ptr() })
    }
}

/***** impl Drop **********************************************************************************/

impl Drop for Guard {
    #[inline]
    fn drop(&mut self) {
        if let Some(local) = self.local_ref() {
            local.unpin();
        }
    }
}

/***** impl Debug *********************************************************************************/

impl fmt::Debug for Guard {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Guard { .. }")
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// unprotected
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Returns a reference to a dummy guard that allows unprotected access to
/// [`Atomic`][crate::Atomic] pointers.
///
/// The dummy guard does not keep any thread pinned; calling
/// [`defer`][Guard::defer] through it executes the function immediately.
///
/// # Safety
///
/// Loads through the dummy guard hand out unprotected references, so there
/// must not be any concurrent access to the data structure. The intended use
/// is constructing or destroying a data structure while no other thread can
/// observe it.
#[inline]
pub unsafe fn unprotected() -> &'static Guard {
    struct GuardWrapper(Guard);
    unsafe impl Sync for GuardWrapper {}

    static UNPROTECTED: GuardWrapper = GuardWrapper(Guard { local: None });
    &UNPROTECTED.0
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::unprotected;

    #[test]
    fn dummy_guard_defers_nothing() {
        let count = Cell::new(0);
        unsafe {
            let guard = unprotected();
            assert!(guard.is_dummy());
            assert!(guard.collector().is_none());

            // Deferred functions run immediately on a dummy guard.
            guard.defer_unchecked(|| count.set(count.get() + 1));
            assert_eq!(count.get(), 1);
        }
    }

    #[test]
    fn dummy_guard_repin_after_runs_inline() {
        let guard = &mut super::Guard { local: None };
        let value = guard.repin_after(|| 7);
        assert_eq!(value, 7);
        guard.repin();
        guard.flush();
    }
}
