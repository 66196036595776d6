//! Collector instances and participant handles

#[cfg(not(feature = "std"))]
use alloc::sync::Arc;
#[cfg(feature = "std")]
use std::sync::Arc;

use core::fmt;

use crate::global::Global;
use crate::guard::Guard;
use crate::local::Local;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Collector
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An epoch-based garbage collector instance.
///
/// Cloning a collector shares the same global state. Once the last clone and
/// the last participant handle are gone, the global state is destroyed and
/// all deferred functions still queued in it are executed.
pub struct Collector {
    pub(crate) global: Arc<Global>,
}

/***** impl inherent ******************************************************************************/

impl Collector {
    /// Creates a new collector instance.
    #[inline]
    pub fn new() -> Self {
        Self { global: Arc::new(Global::new()) }
    }

    /// Registers a new participant and returns a handle to it.
    #[inline]
    pub fn register(&self) -> LocalHandle {
        Local::register(self)
    }
}

/***** impl Clone *********************************************************************************/

impl Clone for Collector {
    /// Creates another handle to the same collector instance.
    #[inline]
    fn clone(&self) -> Self {
        Self { global: self.global.clone() }
    }
}

/***** impl Default *******************************************************************************/

impl Default for Collector {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/***** impl PartialEq *****************************************************************************/

impl PartialEq for Collector {
    /// Two collectors are equal if they share the same global state.
    #[inline]
    fn eq(&self, rhs: &Self) -> bool {
        Arc::ptr_eq(&self.global, &rhs.global)
    }
}

impl Eq for Collector {}

/***** impl Debug *********************************************************************************/

impl fmt::Debug for Collector {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Collector { .. }")
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// LocalHandle
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A handle to a registered participant of a collector.
///
/// The handle keeps its participant alive across pinnings; dropping the last
/// handle of an unpinned participant unregisters it.
pub struct LocalHandle {
    local: *const Local,
}

/***** impl inherent ******************************************************************************/

impl LocalHandle {
    #[inline]
    pub(crate) fn new(local: *const Local) -> Self {
        Self { local }
    }

    /// Pins the participant, returning a guard that keeps it pinned.
    #[inline]
    pub fn pin(&self) -> Guard {
        unsafe { (*self.local).pin() }
    }

    /// Returns `true` if the participant is currently pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        unsafe { (*self.local).is_pinned() }
    }

    /// Returns a reference to the collector this participant belongs to.
    #[inline]
    pub fn collector(&self) -> &Collector {
        unsafe { (*self.local).collector() }
    }
}

/***** impl Drop **********************************************************************************/

impl Drop for LocalHandle {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            (*self.local).release_handle();
        }
    }
}

/***** impl Debug *********************************************************************************/

impl fmt::Debug for LocalHandle {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("LocalHandle { .. }")
    }
}
