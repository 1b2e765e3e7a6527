//! Reentrancy guards for the collector.
//!
//! `DebugReentrancy` detects nested entry into the collector's registry
//! while it is being traced. In debug builds, entering twice without
//! dropping the guard panics. In release builds, this compiles to a
//! zero-cost no-op.
//!
//! `PassGuard` is always on: it owns the collector phase for one pass and
//! rejects a second pass started from inside the first.

use core::cell::Cell;
use core::marker::PhantomData;

use crate::collector::Phase;
use crate::error::RefError;

/// Per-collector reentrancy tracker. Registry mutations and tracing take
/// `let _g = heap.critical.enter();`.
#[derive(Debug)]
pub(crate) struct DebugReentrancy {
    #[cfg(debug_assertions)]
    depth: Cell<u32>,
    // Keep !Send + !Sync in line with single-threaded design.
    _nosend: PhantomData<*mut ()>,
}

impl DebugReentrancy {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            depth: Cell::new(0),
            _nosend: PhantomData,
        }
    }

    /// Enter a guarded section. In debug builds, panics if already entered.
    #[inline]
    pub(crate) fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            let d = self.depth.get();
            assert!(
                d == 0,
                "reentrancy detected: collector registry touched while tracing"
            );
            self.depth.set(d + 1);
            return ReentrancyGuard { owner: self };
        }

        #[cfg(not(debug_assertions))]
        {
            return ReentrancyGuard { _z: PhantomData };
        }
    }
}

/// RAII guard returned by `DebugReentrancy::enter`.
pub(crate) struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl<'a> Drop for ReentrancyGuard<'a> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let d = self.owner.depth.get();
            debug_assert!(d > 0);
            self.owner.depth.set(d - 1);
        }
    }
}

/// Holds the collector phase away from `Done` for one pass. Dropping the
/// guard, including while unwinding, returns the phase to `Done`.
pub(crate) struct PassGuard<'a> {
    phase: &'a Cell<Phase>,
}

impl<'a> PassGuard<'a> {
    pub(crate) fn begin(phase: &'a Cell<Phase>) -> Result<Self, RefError> {
        if phase.get() != Phase::Done {
            return Err(RefError::ReentrantCollection);
        }
        phase.set(Phase::Scan);
        Ok(Self { phase })
    }

    pub(crate) fn advance(&self, to: Phase) {
        self.phase.set(to);
    }
}

impl<'a> Drop for PassGuard<'a> {
    fn drop(&mut self) {
        self.phase.set(Phase::Done);
    }
}
