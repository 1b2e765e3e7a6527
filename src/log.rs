//! Structured logging for collection passes.
//!
//! With the `tracing` feature these helpers emit `tracing` spans and
//! events. Without it they compile to nothing, so call sites stay free of
//! `cfg` noise.

use crate::collector::Phase;

#[cfg(feature = "tracing")]
mod internal {
    use super::Phase;

    pub fn span_collect(pass: u64, live: usize) -> ::tracing::span::EnteredSpan {
        ::tracing::debug_span!("rc_ptr_collect", pass, live).entered()
    }

    pub fn log_phase(phase: Phase, slots: usize) {
        ::tracing::debug!(phase = ?phase, slots, "phase_start");
    }

    pub fn log_roots(roots: usize) {
        ::tracing::debug!(roots, "roots_found");
    }

    pub fn log_freed(freed: usize, failed: usize) {
        ::tracing::debug!(freed, failed, "collect_done");
    }

    pub fn log_destroy_panic(slot: usize) {
        ::tracing::warn!(slot, "destroy action panicked during collection; continuing");
    }

    pub fn log_reentrant_collect() {
        ::tracing::warn!("collect() called while a pass is in progress; rejected");
    }
}

#[cfg(not(feature = "tracing"))]
mod internal {
    use super::Phase;

    pub struct NoSpan;

    #[inline(always)]
    pub fn span_collect(_pass: u64, _live: usize) -> NoSpan {
        NoSpan
    }

    #[inline(always)]
    pub fn log_phase(_phase: Phase, _slots: usize) {}

    #[inline(always)]
    pub fn log_roots(_roots: usize) {}

    #[inline(always)]
    pub fn log_freed(_freed: usize, _failed: usize) {}

    #[inline(always)]
    pub fn log_destroy_panic(_slot: usize) {}

    #[inline(always)]
    pub fn log_reentrant_collect() {}
}

pub(crate) use internal::*;
