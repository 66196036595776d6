//! The default collector and thread-local participant handles for *std*
//! environments.

use once_cell::sync::Lazy;

use crate::collector::{Collector, LocalHandle};
use crate::guard::Guard;

/// The global default collector, shared by all threads of the process.
static COLLECTOR: Lazy<Collector> = Lazy::new(Collector::new);

thread_local! {
    /// The per-thread participant handle for the default collector.
    static HANDLE: LocalHandle = COLLECTOR.register();
}

/// Pins the current thread to the default collector.
#[inline]
pub fn pin() -> Guard {
    with_handle(|handle| handle.pin())
}

/// Returns `true` if the current thread is pinned to the default collector.
#[inline]
pub fn is_pinned() -> bool {
    with_handle(|handle| handle.is_pinned())
}

/// Returns a reference to the default collector.
#[inline]
pub fn default_collector() -> &'static Collector {
    &COLLECTOR
}

#[inline]
fn with_handle<F, R>(mut f: F) -> R
where
    F: FnMut(&LocalHandle) -> R,
{
    // During thread teardown the thread-local handle may already be gone;
    // fall back to a one-shot registration.
    HANDLE.try_with(|handle| f(handle)).unwrap_or_else(|_| f(&COLLECTOR.register()))
}
