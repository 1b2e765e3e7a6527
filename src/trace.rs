//! The `Trace` trait: how the collector discovers `Cc` edges.

use core::cell::{Cell, RefCell};
use core::ptr::NonNull;
use std::collections::VecDeque;

use crate::cc::{Cc, CcHeader, CcWeak};
use crate::collector::Heap;
use crate::linked::LinkedPtr;
use crate::ptr::Ptr;
use crate::weak::WeakPtr;

/// A type whose [`Cc`] fields can be enumerated by the collector.
///
/// # Safety
///
/// `trace` must call `trace` on every `Cc` the value owns, exactly once
/// each, and must not create, drop or mutate any `Cc` while doing so.
/// Visiting a `Cc` the value does not own can get a live object freed;
/// the handle then reads as empty rather than dangling.
///
/// ```ignore
/// unsafe impl Trace for Node {
///     fn trace(&self, tracer: &mut Tracer<'_>) {
///         self.next.trace(tracer);
///     }
/// }
/// ```
pub unsafe trait Trace {
    fn trace(&self, tracer: &mut Tracer<'_>);
}

/// Collects the edges of one object during a collection pass. Only
/// objects alive in the tracing collector are recorded.
pub struct Tracer<'h> {
    heap: &'h Heap,
    edges: Vec<NonNull<CcHeader>>,
}

impl<'h> Tracer<'h> {
    pub(crate) fn new(heap: &'h Heap) -> Self {
        Self {
            heap,
            edges: Vec::new(),
        }
    }

    pub(crate) fn visit(&mut self, header: NonNull<CcHeader>) {
        let h = unsafe { header.as_ref() };
        if h.is_alive() && h.belongs_to(self.heap) {
            self.edges.push(header);
        }
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, NonNull<CcHeader>> {
        self.edges.drain(..)
    }
}

macro_rules! trace_leaf {
    ($($t:ty),* $(,)?) => {
        $(
            unsafe impl Trace for $t {
                #[inline]
                fn trace(&self, _tracer: &mut Tracer<'_>) {}
            }
        )*
    };
}

trace_leaf!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    &'static str,
);

unsafe impl<T: 'static> Trace for Cc<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        if let Some(h) = self.header() {
            tracer.visit(h);
        }
    }
}

// Weak handles and pointers outside the collector own no collectable
// edge. Objects reachable only through them are treated as externally held.
unsafe impl<T> Trace for CcWeak<T> {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}

unsafe impl<T: ?Sized> Trace for Ptr<T> {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}

unsafe impl<T: ?Sized> Trace for WeakPtr<T> {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}

unsafe impl<T: ?Sized> Trace for LinkedPtr<T> {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}

unsafe impl<T: Trace + ?Sized> Trace for Box<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        (**self).trace(tracer);
    }
}

unsafe impl<T: Trace> Trace for Option<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        if let Some(v) = self {
            v.trace(tracer);
        }
    }
}

unsafe impl<T: Trace> Trace for [T] {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        for v in self {
            v.trace(tracer);
        }
    }
}

unsafe impl<T: Trace, const N: usize> Trace for [T; N] {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.as_slice().trace(tracer);
    }
}

unsafe impl<T: Trace> Trace for Vec<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.as_slice().trace(tracer);
    }
}

unsafe impl<T: Trace> Trace for VecDeque<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        for v in self {
            v.trace(tracer);
        }
    }
}

// A cell mutably borrowed during a pass hides its edges from both Scan and
// Mark; its targets keep their external count and survive as roots.
unsafe impl<T: Trace + ?Sized> Trace for RefCell<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        if let Ok(v) = self.try_borrow() {
            v.trace(tracer);
        }
    }
}

unsafe impl<T: Trace + Copy> Trace for Cell<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.get().trace(tracer);
    }
}

macro_rules! trace_tuple {
    ($($name:ident),+) => {
        unsafe impl<$($name: Trace),+> Trace for ($($name,)+) {
            #[allow(non_snake_case)]
            fn trace(&self, tracer: &mut Tracer<'_>) {
                let ($($name,)+) = self;
                $($name.trace(tracer);)+
            }
        }
    };
}

trace_tuple!(A);
trace_tuple!(A, B);
trace_tuple!(A, B, C);
trace_tuple!(A, B, C, D);
