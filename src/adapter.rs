//! Count adapters.
//!
//! When a projection moves a pointer to a different address inside the
//! same allocation, the new pointer reaches its counter block through a
//! `CountAdapter`. The adapter forwards every count change to its delegate
//! and tracks how many handles are routed through it, freeing itself when
//! the last one goes. Adapters may chain.

use core::cell::Cell;
use core::ptr::NonNull;

use crate::block::{bump, CounterBlock};
use crate::error::invariant;

/// How a handle reaches the counter block of its allocation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum CounterRef {
    Direct(NonNull<CounterBlock>),
    Adapted(NonNull<CountAdapter>),
}

pub(crate) struct CountAdapter {
    delegate: CounterRef,
    holders: Cell<usize>,
}

impl CounterRef {
    /// Wrap `delegate` in a fresh adapter with no holders. The caller must
    /// immediately increment through the returned reference.
    pub(crate) fn adapt(delegate: CounterRef) -> CounterRef {
        let adapter = Box::new(CountAdapter {
            delegate,
            holders: Cell::new(0),
        });
        CounterRef::Adapted(NonNull::from(Box::leak(adapter)))
    }

    /// The counter block at the end of the chain.
    pub(crate) fn block(self) -> NonNull<CounterBlock> {
        let mut cur = self;
        loop {
            match cur {
                CounterRef::Direct(b) => return b,
                CounterRef::Adapted(a) => cur = unsafe { a.as_ref().delegate },
            }
        }
    }

    /// Number of adapters between this reference and its block.
    pub(crate) fn depth(self) -> usize {
        let mut cur = self;
        let mut n = 0;
        while let CounterRef::Adapted(a) = cur {
            n += 1;
            cur = unsafe { a.as_ref().delegate };
        }
        n
    }

    pub(crate) fn strong_count(self) -> usize {
        unsafe { self.block().as_ref().strong_count() }
    }

    pub(crate) fn weak_count(self) -> usize {
        unsafe { self.block().as_ref().weak_count() }
    }

    pub(crate) unsafe fn inc_strong(self) {
        match self {
            CounterRef::Direct(b) => CounterBlock::increment_strong(b),
            CounterRef::Adapted(a) => {
                Self::hold(a);
                a.as_ref().delegate.inc_strong();
            }
        }
    }

    pub(crate) unsafe fn inc_weak(self) {
        match self {
            CounterRef::Direct(b) => CounterBlock::increment_weak(b),
            CounterRef::Adapted(a) => {
                Self::hold(a);
                a.as_ref().delegate.inc_weak();
            }
        }
    }

    pub(crate) unsafe fn dec_strong(self) {
        match self {
            CounterRef::Direct(b) => CounterBlock::decrement_strong(b),
            CounterRef::Adapted(a) => Self::unhold(a).dec_strong(),
        }
    }

    pub(crate) unsafe fn dec_weak(self) {
        match self {
            CounterRef::Direct(b) => CounterBlock::decrement_weak(b),
            CounterRef::Adapted(a) => Self::unhold(a).dec_weak(),
        }
    }

    unsafe fn hold(a: NonNull<CountAdapter>) {
        bump(&a.as_ref().holders);
    }

    /// Drop one holder and return the delegate. Frees the adapter when the
    /// last holder leaves, before the delegate sees the decrement.
    unsafe fn unhold(a: NonNull<CountAdapter>) -> CounterRef {
        let adapter = a.as_ref();
        let h = adapter.holders.get();
        if h == 0 {
            invariant("count adapter holder underflow");
        }
        let delegate = adapter.delegate;
        adapter.holders.set(h - 1);
        if h == 1 {
            drop(Box::from_raw(a.as_ptr()));
        }
        delegate
    }
}
