//! The cycle collector.
//!
//! Every [`Cc`] allocation is registered in its collector's slot arena.
//! Plain counting frees acyclic garbage as usual; [`Collector::collect`]
//! runs a Scan -> Mark -> Free pass over a snapshot of the arena to free
//! cycles that counting alone never reaches zero on.
//!
//! Scan: each slot's adjusted count starts at its strong count and loses
//! one for every edge found by tracing the snapshot. A slot left above
//! zero is held from outside the snapshot: a root. Finding more edges to
//! a slot than it has strong handles means some `Trace` impl visited a
//! handle it does not own; the pass panics with an invariant violation.
//!
//! Mark: everything reachable from a root is marked `Reachable`, with an
//! explicit worklist so cycles and deep chains are handled without
//! recursion.
//!
//! Free: every unmarked slot is garbage. All garbage is detached first
//! (held, marked dead, unregistered), then dropped, then released, so no
//! garbage object is deallocated while another garbage value still holds
//! a handle to it.

use core::cell::{Cell, RefCell};
use core::fmt;
use core::ptr::NonNull;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use slotmap::{new_key_type, SlotMap};

use crate::cc::{Cc, CcBox, CcHeader, CustomDestroy};
use crate::error::RefError;
use crate::log;
use crate::reentrancy::{DebugReentrancy, PassGuard};
use crate::trace::{Trace, Tracer};

new_key_type! {
    pub(crate) struct SlotKey;
}

/// Collector state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Done,
    Scan,
    Mark,
    Free,
}

/// Per-slot state during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// Strong count minus the edges Scan has found so far.
    Count(usize),
    Reachable,
}

pub(crate) struct Slot {
    header: NonNull<CcHeader>,
    mark: Mark,
}

pub(crate) struct Heap {
    slots: RefCell<SlotMap<SlotKey, Slot>>,
    phase: Cell<Phase>,
    passes: Cell<u64>,
    critical: DebugReentrancy,
    #[cfg(debug_assertions)]
    index: RefCell<hashbrown::HashSet<usize>>,
}

impl Heap {
    fn new() -> Self {
        Self {
            slots: RefCell::new(SlotMap::with_key()),
            phase: Cell::new(Phase::Done),
            passes: Cell::new(0),
            critical: DebugReentrancy::new(),
            #[cfg(debug_assertions)]
            index: RefCell::new(hashbrown::HashSet::new()),
        }
    }

    pub(crate) fn register(&self, header: NonNull<CcHeader>) -> SlotKey {
        let _g = self.critical.enter();
        #[cfg(debug_assertions)]
        if !self.index.borrow_mut().insert(header.as_ptr() as usize) {
            crate::error::invariant("allocation registered with the collector twice");
        }
        self.slots.borrow_mut().insert(Slot {
            header,
            mark: Mark::Count(0),
        })
    }

    pub(crate) fn unregister(&self, key: SlotKey, header: NonNull<CcHeader>) {
        let _g = self.critical.enter();
        #[cfg(debug_assertions)]
        self.index.borrow_mut().remove(&(header.as_ptr() as usize));
        let removed = self.slots.borrow_mut().remove(key);
        if removed.map(|s| s.header) != Some(header) {
            crate::error::invariant("collector slot does not match its allocation");
        }
    }

    fn trace_into(&self, header: NonNull<CcHeader>, tracer: &mut Tracer<'_>) {
        let _g = self.critical.enter();
        unsafe { CcHeader::trace(header, tracer) };
    }

    fn adjust(&self, header: NonNull<CcHeader>, f: impl FnOnce(&mut Mark)) {
        let key = unsafe { header.as_ref() }.key();
        if let Some(slot) = self.slots.borrow_mut().get_mut(key) {
            f(&mut slot.mark);
        }
    }
}

/// Summary of one collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Collection {
    /// Objects in the snapshot.
    pub scanned: usize,
    /// Snapshot objects held from outside the snapshot.
    pub roots: usize,
    /// Objects destroyed by the pass.
    pub freed: usize,
    /// Destroy actions that panicked. They are not retried.
    pub failed: usize,
}

/// Owner of a set of cycle-collectable allocations.
///
/// Cloning a `Collector` yields another handle to the same registry.
/// Independent collectors never see each other's objects.
#[derive(Clone)]
pub struct Collector {
    heap: Rc<Heap>,
}

impl Collector {
    pub fn new() -> Self {
        Self {
            heap: Rc::new(Heap::new()),
        }
    }

    /// Allocate `value` under this collector with a strong count of 1.
    pub fn alloc<T: Trace + 'static>(&self, value: T) -> Cc<T> {
        self.register(CcBox::new(value, self.heap.clone(), None))
    }

    /// Like [`alloc`](Self::alloc), but the value is handed to `destroy`
    /// instead of being dropped in place. `destroy` runs exactly once,
    /// whether the object dies by counting or is freed by a pass.
    pub fn alloc_with<T, D>(&self, value: T, destroy: D) -> Cc<T>
    where
        T: Trace + 'static,
        D: FnOnce(T) + 'static,
    {
        let destroy: CustomDestroy =
            Box::new(move |slot: NonNull<()>| destroy(unsafe { slot.cast::<T>().as_ptr().read() }));
        self.register(CcBox::new(value, self.heap.clone(), Some(destroy)))
    }

    fn register<T>(&self, boxed: NonNull<CcBox<T>>) -> Cc<T> {
        let header = boxed.cast::<CcHeader>();
        let key = self.heap.register(header);
        unsafe { header.as_ref() }.set_key(key);
        Cc::from_box(boxed)
    }

    /// Number of live registered objects.
    pub fn len(&self) -> usize {
        self.heap.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn phase(&self) -> Phase {
        self.heap.phase.get()
    }

    /// Number of passes started so far.
    pub fn passes(&self) -> u64 {
        self.heap.passes.get()
    }

    /// Run one full pass, freeing every registered object that is only
    /// reachable from other registered objects.
    ///
    /// Objects allocated while the pass runs are left for the next pass.
    /// Returns `ReentrantCollection` when called from inside a pass.
    pub fn collect(&self) -> Result<Collection, RefError> {
        let heap = &*self.heap;
        let pass = match PassGuard::begin(&heap.phase) {
            Ok(pass) => pass,
            Err(e) => {
                log::log_reentrant_collect();
                return Err(e);
            }
        };
        heap.passes.set(heap.passes.get() + 1);

        let snapshot: Vec<NonNull<CcHeader>> = heap
            .slots
            .borrow_mut()
            .values_mut()
            .map(|slot| {
                slot.mark = Mark::Count(unsafe { slot.header.as_ref() }.strong());
                slot.header
            })
            .collect();
        let _span = log::span_collect(heap.passes.get(), snapshot.len());
        let mut report = Collection {
            scanned: snapshot.len(),
            ..Collection::default()
        };

        // Scan
        log::log_phase(Phase::Scan, snapshot.len());
        let mut tracer = Tracer::new(heap);
        for &h in &snapshot {
            heap.trace_into(h, &mut tracer);
            for edge in tracer.drain() {
                heap.adjust(edge, |m| match m {
                    Mark::Count(0) => {
                        crate::error::invariant("trace reported more edges than handles")
                    }
                    Mark::Count(n) => *n -= 1,
                    Mark::Reachable => {}
                });
            }
        }

        // Mark
        pass.advance(Phase::Mark);
        log::log_phase(Phase::Mark, snapshot.len());
        let mut work = Vec::new();
        for &h in &snapshot {
            heap.adjust(h, |m| {
                if matches!(*m, Mark::Count(n) if n > 0) {
                    *m = Mark::Reachable;
                    work.push(h);
                }
            });
        }
        report.roots = work.len();
        log::log_roots(report.roots);
        while let Some(h) = work.pop() {
            heap.trace_into(h, &mut tracer);
            for edge in tracer.drain() {
                heap.adjust(edge, |m| {
                    if *m != Mark::Reachable {
                        *m = Mark::Reachable;
                        work.push(edge);
                    }
                });
            }
        }

        // Free
        pass.advance(Phase::Free);
        let mut garbage = Vec::new();
        for &h in &snapshot {
            let mut dead = false;
            heap.adjust(h, |m| {
                dead = *m != Mark::Reachable;
                *m = Mark::Count(0);
            });
            if dead {
                garbage.push(h);
            }
        }
        log::log_phase(Phase::Free, garbage.len());
        for &h in &garbage {
            unsafe { CcHeader::detach(h) };
        }
        for (i, &h) in garbage.iter().enumerate() {
            let res = catch_unwind(AssertUnwindSafe(|| unsafe { CcHeader::drop_value(h) }));
            if res.is_err() {
                report.failed += 1;
                log::log_destroy_panic(i);
            }
        }
        for &h in &garbage {
            unsafe { CcHeader::release_hold(h) };
        }
        report.freed = garbage.len() - report.failed;
        log::log_freed(report.freed, report.failed);
        Ok(report)
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("len", &self.len())
            .field("phase", &self.phase())
            .finish()
    }
}
