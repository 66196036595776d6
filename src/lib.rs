//! Epoch-based memory reclamation for lock-free data structures.
//!
//! When a thread unlinks a node from a lock-free data structure, other
//! threads may still hold references to it, so its memory cannot be freed
//! right away. Instead, the destruction is *deferred*: threads announce every
//! access by pinning the current epoch, and a node unlinked in one epoch is
//! only reclaimed once every thread pinned at that time has moved on. The
//! scheme is best-effort and lock-free; it bounds how far reclamation can lag
//! behind, but makes no promises about exactly when a deferred function runs.
//!
//! # Pinning
//!
//! Threads participate through a [`Collector`]. Registering with a collector
//! yields a [`LocalHandle`], and [`pin`][LocalHandle::pin]ning the handle
//! yields a [`Guard`]. While a guard is live, [`Atomic`] loads hand out
//! [`Shared`] references that cannot be reclaimed under the reader's feet,
//! and [`Guard::defer_destroy`] schedules unlinked nodes for reclamation.
//! For convenience, the crate-level [`pin`] function pins the current thread
//! to a process-wide default collector.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::Ordering::{Acquire, Release};
//!
//! use quiesce::{pin, Atomic, Owned};
//!
//! let shared = Atomic::new(1234);
//!
//! {
//!     let guard = pin();
//!     let value = shared.load(Acquire, &guard);
//!     assert_eq!(unsafe { *value.deref() }, 1234);
//!
//!     // Readers in earlier epochs may still use the old cell; defer its
//!     // destruction instead of freeing it in place.
//!     let previous = shared.swap(Owned::new(5678), Release, &guard);
//!     unsafe { guard.defer_destroy(previous) };
//! }
//!
//! // The pointer is no longer shared; take the last cell back directly.
//! drop(unsafe { shared.into_owned() });
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

#[cfg(not(feature = "std"))]
extern crate alloc;

mod atomic;
mod bag;
mod collector;
mod deferred;
mod epoch;
mod global;
mod guard;
mod local;
mod sync;

#[cfg(feature = "std")]
mod default;

pub use crate::atomic::{
    Atomic, CompareAndSetError, CompareAndSetOrdering, Owned, Pointable, Pointer, Shared,
};
pub use crate::collector::{Collector, LocalHandle};
pub use crate::guard::{unprotected, Guard};

#[cfg(feature = "std")]
pub use crate::default::{default_collector, is_pinned, pin};
